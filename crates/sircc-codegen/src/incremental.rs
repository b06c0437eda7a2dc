//! Incremental compilation bookkeeping: function-level dirty tracking.
//!
//! Tracks per-function compilation hashes and a call graph so that after an
//! edit, only the functions that actually changed (directly, or
//! transitively through a changed callee) need recompiling.
//!
//! - [`IncrementalState`]: persistent state tracking last-compiled hashes,
//!   a settings hash, and a cache directory for per-function object files.
//! - [`RecompilationPlan`]: the computed plan of dirty, dependent, and
//!   cached functions.
//! - [`build_call_graph`]: extracts caller -> callee relationships from
//!   `call` nodes across a program's `fn` nodes.
//! - [`hash_functions`]: content-addresses each `fn` node for dirty
//!   detection.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sircc_core::{NodeId, ProgramTables};

use crate::CompileOptions;

/// Tracks compilation state for incremental builds.
///
/// Persists per-function hashes from the last successful compilation so
/// that subsequent compilations can detect which functions changed. Also
/// tracks the compilation settings hash to invalidate the entire cache
/// when settings change (optimization level, target triple, debug flag).
#[derive(Debug, Serialize, Deserialize)]
pub struct IncrementalState {
    last_compiled_hashes: HashMap<u32, [u8; 32]>,
    settings_hash: [u8; 32],
    cache_dir: PathBuf,
}

/// A recompilation plan computed from dirty analysis.
#[derive(Debug, Clone, Serialize)]
pub struct RecompilationPlan {
    /// Functions whose content hash differs from the last compile.
    pub dirty: Vec<NodeId>,
    /// Functions unchanged themselves but calling a dirty function.
    pub dirty_dependents: Vec<NodeId>,
    /// Functions that can reuse a cached object file.
    pub cached: Vec<NodeId>,
    pub needs_recompilation: bool,
}

impl IncrementalState {
    pub fn new(cache_dir: PathBuf) -> Self {
        IncrementalState {
            last_compiled_hashes: HashMap::new(),
            settings_hash: [0u8; 32],
            cache_dir,
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Phase 1: compare current hashes against the last compile to find
    /// directly dirty functions. Phase 2: BFS the reverse call graph from
    /// dirty functions through callers to find transitive dependents.
    /// Phase 3: everything else is cached.
    pub fn compute_dirty(
        &self,
        current_hashes: &HashMap<NodeId, [u8; 32]>,
        call_graph: &HashMap<NodeId, Vec<NodeId>>,
    ) -> RecompilationPlan {
        let mut directly_dirty: HashSet<NodeId> = HashSet::new();
        for (&fn_id, current_hash) in current_hashes {
            match self.last_compiled_hashes.get(&fn_id.0) {
                Some(prev_hash) if prev_hash == current_hash => {}
                _ => {
                    directly_dirty.insert(fn_id);
                }
            }
        }

        let mut reverse_graph: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for (&caller, callees) in call_graph {
            for &callee in callees {
                reverse_graph.entry(callee).or_default().push(caller);
            }
        }

        let mut dirty_dependents: HashSet<NodeId> = HashSet::new();
        let mut queue: VecDeque<NodeId> = directly_dirty.iter().copied().collect();
        while let Some(fn_id) = queue.pop_front() {
            if let Some(callers) = reverse_graph.get(&fn_id) {
                for &caller in callers {
                    if !directly_dirty.contains(&caller) && dirty_dependents.insert(caller) {
                        queue.push_back(caller);
                    }
                }
            }
        }

        let all_dirty: HashSet<NodeId> = directly_dirty.union(&dirty_dependents).copied().collect();
        let cached: Vec<NodeId> = current_hashes
            .keys()
            .filter(|id| !all_dirty.contains(id))
            .copied()
            .collect();

        let needs_recompilation = !directly_dirty.is_empty() || !dirty_dependents.is_empty();

        let mut dirty: Vec<NodeId> = directly_dirty.into_iter().collect();
        dirty.sort_by_key(|f| f.0);
        let mut deps: Vec<NodeId> = dirty_dependents.into_iter().collect();
        deps.sort_by_key(|f| f.0);
        let mut cached_sorted = cached;
        cached_sorted.sort_by_key(|f| f.0);

        RecompilationPlan {
            dirty,
            dirty_dependents: deps,
            cached: cached_sorted,
            needs_recompilation,
        }
    }

    pub fn update_hashes(&mut self, hashes: HashMap<NodeId, [u8; 32]>) {
        self.last_compiled_hashes = hashes.into_iter().map(|(k, v)| (k.0, v)).collect();
    }

    pub fn cached_object_path(&self, fn_id: NodeId) -> PathBuf {
        self.cache_dir.join(format!("func_{}.o", fn_id.0))
    }

    pub fn is_settings_changed(&self, options: &CompileOptions) -> bool {
        self.settings_hash != compute_settings_hash(options)
    }

    pub fn update_settings_hash(&mut self, options: &CompileOptions) {
        self.settings_hash = compute_settings_hash(options);
    }

    pub fn last_compiled_hashes(&self) -> HashMap<NodeId, [u8; 32]> {
        self.last_compiled_hashes.iter().map(|(&k, &v)| (NodeId(k), v)).collect()
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }
}

/// Extracts caller -> callee relationships from `call` nodes reachable from
/// each `fn` node's blocks.
pub fn build_call_graph(tables: &ProgramTables) -> HashMap<NodeId, Vec<NodeId>> {
    let mut call_graph: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

    for fn_node in tables.nodes_with_tag("fn") {
        let mut callees: Vec<NodeId> = Vec::new();
        for block_ref in fn_node.field_refs("blocks") {
            let Some(block) = tables.node(block_ref.as_node_id()) else {
                continue;
            };
            for stmt_ref in block.field_refs("stmts") {
                let Some(stmt) = tables.node(stmt_ref.as_node_id()) else {
                    continue;
                };
                if sircc_core::node::normalize_tag(&stmt.tag) == "call" {
                    if let Some(callee) = stmt.field_ref("callee") {
                        let callee_id = callee.as_node_id();
                        if !callees.contains(&callee_id) {
                            callees.push(callee_id);
                        }
                    }
                }
            }
        }
        callees.sort_by_key(|f| f.0);
        call_graph.insert(fn_node.id, callees);
    }

    call_graph
}

/// Content-addresses each `fn` node (its fields plus its blocks' fields, in
/// declaration order) so unrelated whitespace/ordering in the source JSONL
/// does not spuriously mark a function dirty.
pub fn hash_functions(tables: &ProgramTables) -> HashMap<NodeId, [u8; 32]> {
    let mut out = HashMap::new();
    for fn_node in tables.nodes_with_tag("fn") {
        let mut hasher = blake3::Hasher::new();
        hasher.update(fn_node.fields.to_string().as_bytes());
        for block_ref in fn_node.field_refs("blocks") {
            if let Some(block) = tables.node(block_ref.as_node_id()) {
                hasher.update(block.fields.to_string().as_bytes());
                for stmt_ref in block.field_refs("stmts") {
                    if let Some(stmt) = tables.node(stmt_ref.as_node_id()) {
                        hasher.update(stmt.tag.as_bytes());
                        hasher.update(stmt.fields.to_string().as_bytes());
                    }
                }
            }
        }
        out.insert(fn_node.id, *hasher.finalize().as_bytes());
    }
    out
}

pub fn compute_settings_hash(options: &CompileOptions) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    let opt_byte = match options.opt_level {
        crate::OptLevel::O0 => 0u8,
        crate::OptLevel::O1 => 1u8,
        crate::OptLevel::O2 => 2u8,
        crate::OptLevel::O3 => 3u8,
    };
    hasher.update(&[opt_byte]);
    if let Some(ref triple) = options.target_triple {
        hasher.update(triple.as_bytes());
    } else {
        hasher.update(b"native");
    }
    hasher.update(&[options.debug_symbols as u8]);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    fn chain_tables() -> ProgramTables {
        // fn_a calls fn_b calls fn_c
        build_program_tables(
            &[
                r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
                r#"{"ir":"sir-v1.0","k":"type","id":100,"kind":"fn","params":[],"ret":3,"varargs":false}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":1}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"return","fields":{"value":{"ref":0}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[0,1]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","type_ref":100,"fields":{"name":"fn_c","entry":{"ref":2},"blocks":[2]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"call","fields":{"callee":{"ref":3},"args":[]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"return","fields":{"value":{"ref":4}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":6,"tag":"block","fields":{"params":[],"stmts":[4,5]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":7,"tag":"fn","type_ref":100,"fields":{"name":"fn_b","entry":{"ref":6},"blocks":[6]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":8,"tag":"call","fields":{"callee":{"ref":7},"args":[]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":9,"tag":"return","fields":{"value":{"ref":8}}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":10,"tag":"block","fields":{"params":[],"stmts":[8,9]}}"#,
                r#"{"ir":"sir-v1.0","k":"node","id":11,"tag":"fn","type_ref":100,"fields":{"name":"fn_a","entry":{"ref":10},"blocks":[10]}}"#,
            ]
            .join("\n"),
        )
        .unwrap()
    }

    #[test]
    fn call_graph_follows_call_chain() {
        let tables = chain_tables();
        let cg = build_call_graph(&tables);
        assert_eq!(cg[&NodeId(11)], vec![NodeId(7)]);
        assert_eq!(cg[&NodeId(7)], vec![NodeId(3)]);
        assert!(cg[&NodeId(3)].is_empty());
    }

    #[test]
    fn changed_leaf_dirties_its_callers_only() {
        let tables = chain_tables();
        let call_graph = build_call_graph(&tables);
        let hashes = hash_functions(&tables);

        let mut state = IncrementalState::new(PathBuf::from("/tmp/test_cache"));
        state.update_hashes(hashes.clone());

        let mut new_hashes = hashes;
        new_hashes.get_mut(&NodeId(3)).unwrap()[0] ^= 0xFF;

        let plan = state.compute_dirty(&new_hashes, &call_graph);
        assert!(plan.dirty.contains(&NodeId(3)));
        assert!(plan.dirty_dependents.contains(&NodeId(7)));
        assert!(plan.dirty_dependents.contains(&NodeId(11)));
        assert!(plan.cached.is_empty());
        assert!(plan.needs_recompilation);
    }

    #[test]
    fn no_changes_means_everything_cached() {
        let tables = chain_tables();
        let call_graph = build_call_graph(&tables);
        let hashes = hash_functions(&tables);

        let mut state = IncrementalState::new(PathBuf::from("/tmp/test_cache"));
        state.update_hashes(hashes.clone());

        let plan = state.compute_dirty(&hashes, &call_graph);
        assert!(plan.dirty.is_empty());
        assert!(plan.dirty_dependents.is_empty());
        assert_eq!(plan.cached.len(), 3);
        assert!(!plan.needs_recompilation);
    }

    #[test]
    fn settings_hash_changes_with_opt_level() {
        let opts1 = CompileOptions { opt_level: crate::OptLevel::O0, ..Default::default() };
        let opts2 = CompileOptions { opt_level: crate::OptLevel::O2, ..Default::default() };

        let mut state = IncrementalState::new(PathBuf::from("/tmp/test_cache"));
        state.update_settings_hash(&opts1);
        assert!(!state.is_settings_changed(&opts1));
        assert!(state.is_settings_changed(&opts2));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state_path = temp_dir.path().join("state.json");

        let mut state = IncrementalState::new(temp_dir.path().to_path_buf());
        let mut hashes = HashMap::new();
        hashes.insert(NodeId(0), [42u8; 32]);
        hashes.insert(NodeId(1), [99u8; 32]);
        state.update_hashes(hashes);
        state.update_settings_hash(&CompileOptions::default());

        state.save(&state_path).unwrap();
        let loaded = IncrementalState::load(&state_path).unwrap();

        let loaded_hashes = loaded.last_compiled_hashes();
        assert_eq!(loaded_hashes.len(), 2);
        assert_eq!(loaded_hashes[&NodeId(0)], [42u8; 32]);
        assert_eq!(loaded_hashes[&NodeId(1)], [99u8; 32]);
    }

    #[test]
    fn cached_object_path_uses_node_id() {
        let state = IncrementalState::new(PathBuf::from("/tmp/cache"));
        assert_eq!(state.cached_object_path(NodeId(42)), PathBuf::from("/tmp/cache/func_42.o"));
    }
}
