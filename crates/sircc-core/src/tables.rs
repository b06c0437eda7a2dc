//! Program tables (component B, `§4.B`).
//!
//! Three sparse arrays (types, symbols, nodes) indexed by id, plus feature
//! flags, target info (with override bookkeeping), and a diagnostic bus
//! doubling as the error-code accumulator and exit-code source.
//!
//! SIR has no edge-typed graph at the table level -- node-to-node
//! relationships are explicit integer/`{ref}` fields resolved by table
//! lookup (`§3` "Identifiers"), not graph edges held in an adjacency
//! structure. `petgraph` is kept only in `sircc-codegen`, where a function's
//! CFG blocks genuinely need a topological traversal during native-IR
//! lowering (`§4.G`).

use serde::{Deserialize, Serialize};

use crate::arena::{to_serde_json, Arena, JsonValue};
use crate::diag::DiagnosticBus;
use crate::error::CoreError;
use crate::id::{NodeId, SymbolId, TypeId};
use crate::node::{NodeRecord, SymbolRecord};
use crate::types::{PrimKind, SirType, StructField, SumVariant, TypeTable};

/// Feature flags gating categories of constructs (`§3` "Feature gates",
/// `§4.B`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub simd_v1: bool,
    pub fun_v1: bool,
    pub closure_v1: bool,
    pub adt_v1: bool,
    pub sem_v1: bool,
    pub atomics_v1: bool,
    pub coro_v1: bool,
    pub eh_v1: bool,
    pub gc_v1: bool,
}

impl FeatureFlags {
    pub fn from_names(names: &[String]) -> Self {
        let mut f = FeatureFlags::default();
        for n in names {
            match n.as_str() {
                "simd:v1" => f.simd_v1 = true,
                "fun:v1" => f.fun_v1 = true,
                "closure:v1" => f.closure_v1 = true,
                "adt:v1" => f.adt_v1 = true,
                "sem:v1" => f.sem_v1 = true,
                "atomics:v1" => f.atomics_v1 = true,
                "coro:v1" => f.coro_v1 = true,
                "eh:v1" => f.eh_v1 = true,
                "gc:v1" => f.gc_v1 = true,
                _ => {}
            }
        }
        f
    }
}

/// Per-primitive alignment and pointer-size/endianness ABI facts, either
/// declared by the producer or adopted from the backend (`§3` "Target ABI",
/// `§4.B`/`§4.J`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub triple: Option<String>,
    pub cpu: Option<String>,
    pub features: Option<String>,
    pub ptr_bits: Option<u32>,
    pub endian: Option<Endian>,
    pub int_align: Option<u32>,
    pub float_align: Option<u32>,
    pub struct_align: Option<String>,
    /// Which fields were explicitly declared by the producer, vs. left to be
    /// adopted from the backend (`§4.B`: "override flags recording which
    /// values came from the producer").
    pub overridden: TargetOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
    Little,
    Big,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOverrides {
    pub ptr_bits: bool,
    pub endian: bool,
    pub int_align: bool,
    pub float_align: bool,
    pub struct_align: bool,
}

impl Default for TargetInfo {
    fn default() -> Self {
        TargetInfo {
            triple: None,
            cpu: None,
            features: None,
            ptr_bits: None,
            endian: None,
            int_align: None,
            float_align: None,
            struct_align: None,
            overridden: TargetOverrides::default(),
        }
    }
}

/// The full set of program tables parsed from one SIR input (component B).
#[derive(Debug, Default)]
pub struct ProgramTables {
    pub types: TypeTable,
    symbols: Vec<Option<SymbolRecord>>,
    nodes: Vec<Option<NodeRecord>>,
    pub features: FeatureFlags,
    pub target: TargetInfo,
    pub producer: Option<String>,
    pub unit: Option<String>,
    pub bus: DiagnosticBus,
}

impl ProgramTables {
    pub fn new() -> Self {
        ProgramTables {
            types: TypeTable::new(),
            symbols: Vec::new(),
            nodes: Vec::new(),
            features: FeatureFlags::default(),
            target: TargetInfo::default(),
            producer: None,
            unit: None,
            bus: DiagnosticBus::new(),
        }
    }

    pub fn insert_symbol(&mut self, sym: SymbolRecord) -> Result<(), CoreError> {
        let idx = sym.id.0 as usize;
        if idx >= self.symbols.len() {
            self.symbols.resize_with(idx + 1, || None);
        }
        if self.symbols[idx].is_some() {
            return Err(CoreError::DuplicateId {
                namespace: "symbol",
                id: sym.id.0,
            });
        }
        self.symbols[idx] = Some(sym);
        Ok(())
    }

    pub fn insert_node(&mut self, node: NodeRecord) -> Result<(), CoreError> {
        let idx = node.id.0 as usize;
        if idx >= self.nodes.len() {
            self.nodes.resize_with(idx + 1, || None);
        }
        if self.nodes[idx].is_some() {
            return Err(CoreError::DuplicateId {
                namespace: "node",
                id: node.id.0,
            });
        }
        self.nodes[idx] = Some(node);
        Ok(())
    }

    pub fn symbol(&self, id: SymbolId) -> Option<&SymbolRecord> {
        self.symbols.get(id.0 as usize).and_then(|s| s.as_ref())
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.get(id.0 as usize).and_then(|n| n.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(id.0 as usize).and_then(|n| n.as_mut())
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|_| NodeId(i as u32)))
    }

    pub fn nodes_with_tag<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a NodeRecord> + 'a {
        self.nodes
            .iter()
            .filter_map(|n| n.as_ref())
            .filter(move |n| crate::node::normalize_tag(&n.tag) == tag)
    }
}

/// Parses a complete SIR program from JSON-Lines `input` into
/// [`ProgramTables`], bridging component A (the arena parser) into
/// component B (`§4.A`/`§4.B`/`§6`). Every `meta`/`type`/`sym`/`node` record
/// must carry `ir:"sir-v1.0"` and a recognized `k`.
pub fn build_program_tables(input: &str) -> Result<ProgramTables, CoreError> {
    let (arena, indices) = crate::arena::parse_program(input)?;
    let mut tables = ProgramTables::new();

    for (line_idx, &idx) in indices.iter().enumerate() {
        let record = arena.get(idx).expect("index returned by parser is valid");
        let line = line_idx + 1;

        let ir = record.get("ir").and_then(JsonValue::as_str);
        if ir != Some("sir-v1.0") {
            return Err(CoreError::MalformedRecord {
                kind: "record",
                line,
                reason: "missing or unrecognized ir tag (expected \"sir-v1.0\")".to_string(),
            });
        }
        let kind = record
            .get("k")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CoreError::MalformedRecord {
                kind: "record",
                line,
                reason: "missing required field 'k'".to_string(),
            })?;

        match kind {
            "meta" => apply_meta(&mut tables, record, line)?,
            "type" => apply_type(&mut tables, record, line)?,
            "sym" => apply_sym(&mut tables, record, line)?,
            "node" => apply_node(&mut tables, record, line)?,
            other => {
                return Err(CoreError::MalformedRecord {
                    kind: "record",
                    line,
                    reason: format!("unrecognized record kind '{other}'"),
                })
            }
        }
    }

    Ok(tables)
}

fn require_i64(record: &JsonValue, key: &str, kind: &'static str, line: usize) -> Result<i64, CoreError> {
    record
        .get(key)
        .and_then(JsonValue::as_i64)
        .ok_or_else(|| CoreError::MalformedRecord {
            kind,
            line,
            reason: format!("missing or non-integer required field '{key}'"),
        })
}

fn require_str<'a>(
    record: &'a JsonValue,
    key: &str,
    kind: &'static str,
    line: usize,
) -> Result<&'a str, CoreError> {
    record
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| CoreError::MalformedRecord {
            kind,
            line,
            reason: format!("missing or non-string required field '{key}'"),
        })
}

fn apply_meta(tables: &mut ProgramTables, record: &JsonValue, _line: usize) -> Result<(), CoreError> {
    if let Some(p) = record.get("producer").and_then(JsonValue::as_str) {
        tables.producer = Some(p.to_string());
    }
    if let Some(u) = record.get("unit").and_then(JsonValue::as_str) {
        tables.unit = Some(u.to_string());
    }
    if let Some(ext) = record.get("ext") {
        if let Some(features) = ext.get("features").and_then(JsonValue::as_array) {
            let names: Vec<String> = features
                .iter()
                .filter_map(JsonValue::as_str)
                .map(str::to_string)
                .collect();
            tables.features = FeatureFlags::from_names(&names);
        }
        if let Some(target) = ext.get("target") {
            apply_target(tables, target);
        }
    }
    Ok(())
}

fn apply_target(tables: &mut ProgramTables, target: &JsonValue) {
    let t = &mut tables.target;
    if let Some(v) = target.get("triple").and_then(JsonValue::as_str) {
        t.triple = Some(v.to_string());
    }
    if let Some(v) = target.get("cpu").and_then(JsonValue::as_str) {
        t.cpu = Some(v.to_string());
    }
    if let Some(v) = target.get("features").and_then(JsonValue::as_str) {
        t.features = Some(v.to_string());
    }
    if let Some(v) = target.get("ptrBits").and_then(JsonValue::as_i64) {
        t.ptr_bits = Some(v as u32);
        t.overridden.ptr_bits = true;
    }
    if let Some(v) = target.get("endian").and_then(JsonValue::as_str) {
        t.endian = Some(if v == "big" { Endian::Big } else { Endian::Little });
        t.overridden.endian = true;
    }
    if let Some(v) = target.get("intAlign").and_then(JsonValue::as_i64) {
        t.int_align = Some(v as u32);
        t.overridden.int_align = true;
    }
    if let Some(v) = target.get("floatAlign").and_then(JsonValue::as_i64) {
        t.float_align = Some(v as u32);
        t.overridden.float_align = true;
    }
    if let Some(v) = target.get("structAlign").and_then(JsonValue::as_str) {
        t.struct_align = Some(v.to_string());
        t.overridden.struct_align = true;
    }
}

fn apply_type(tables: &mut ProgramTables, record: &JsonValue, line: usize) -> Result<(), CoreError> {
    let id = TypeId(require_i64(record, "id", "type", line)? as u32);
    let kind = require_str(record, "kind", "type", line)?;

    let ty = match kind {
        "prim" => {
            let name = require_str(record, "name", "type", line)?;
            let prim = PrimKind::from_name(name).ok_or_else(|| CoreError::MalformedRecord {
                kind: "type",
                line,
                reason: format!("unknown prim name '{name}'"),
            })?;
            SirType::Prim(prim)
        }
        "ptr" => SirType::Ptr {
            of: TypeId(require_i64(record, "of", "type", line)? as u32),
        },
        "array" => SirType::Array {
            of: TypeId(require_i64(record, "of", "type", line)? as u32),
            len: require_i64(record, "len", "type", line)? as u64,
        },
        "struct" => {
            let name = record.get("name").and_then(JsonValue::as_str).map(str::to_string);
            let mut fields = Vec::new();
            if let Some(arr) = record.get("fields").and_then(JsonValue::as_array) {
                for f in arr {
                    let fname = f.get("name").and_then(JsonValue::as_str).map(str::to_string);
                    let type_ref = f
                        .get("type_ref")
                        .and_then(JsonValue::as_i64)
                        .ok_or_else(|| CoreError::MalformedRecord {
                            kind: "type",
                            line,
                            reason: "struct field missing 'type_ref'".to_string(),
                        })?;
                    fields.push(StructField {
                        name: fname,
                        type_ref: TypeId(type_ref as u32),
                    });
                }
            }
            SirType::Struct { name, fields }
        }
        "fn" => {
            let mut params = Vec::new();
            if let Some(arr) = record.get("params").and_then(JsonValue::as_array) {
                for p in arr {
                    let id = p.as_i64().ok_or_else(|| CoreError::MalformedRecord {
                        kind: "type",
                        line,
                        reason: "fn param is not an integer type ref".to_string(),
                    })?;
                    params.push(TypeId(id as u32));
                }
            }
            SirType::Fn {
                params,
                ret: TypeId(require_i64(record, "ret", "type", line)? as u32),
                varargs: record.get("varargs").and_then(JsonValue::as_bool).unwrap_or(false),
            }
        }
        "fun" => SirType::Fun {
            sig: TypeId(require_i64(record, "sig", "type", line)? as u32),
        },
        "closure" => SirType::Closure {
            call_sig: TypeId(require_i64(record, "call_sig", "type", line)? as u32),
            env_ty: TypeId(require_i64(record, "env_ty", "type", line)? as u32),
            name: record.get("name").and_then(JsonValue::as_str).map(str::to_string),
        },
        "vec" => SirType::Vec {
            lane: TypeId(require_i64(record, "lane", "type", line)? as u32),
            lanes: require_i64(record, "lanes", "type", line)? as u32,
        },
        "sum" => {
            let mut variants = Vec::new();
            if let Some(arr) = record.get("variants").and_then(JsonValue::as_array) {
                for v in arr {
                    variants.push(SumVariant {
                        name: v.get("name").and_then(JsonValue::as_str).map(str::to_string),
                        ty: v.get("ty").and_then(JsonValue::as_i64).map(|i| TypeId(i as u32)),
                    });
                }
            }
            SirType::Sum { variants }
        }
        other => {
            return Err(CoreError::MalformedRecord {
                kind: "type",
                line,
                reason: format!("unknown type kind '{other}'"),
            })
        }
    };

    tables.types.insert(id, ty)
}

fn apply_sym(tables: &mut ProgramTables, record: &JsonValue, line: usize) -> Result<(), CoreError> {
    let id = SymbolId(require_i64(record, "id", "sym", line)? as u32);
    let sym = SymbolRecord {
        id,
        name: record.get("name").and_then(JsonValue::as_str).map(str::to_string),
        kind: record.get("kind").and_then(JsonValue::as_str).map(str::to_string),
        linkage: record.get("linkage").and_then(JsonValue::as_str).map(str::to_string),
        type_ref: record.get("type_ref").and_then(JsonValue::as_i64).map(|i| TypeId(i as u32)),
        value: record.get("value").map(to_serde_json),
    };
    tables.insert_symbol(sym)
}

fn apply_node(tables: &mut ProgramTables, record: &JsonValue, line: usize) -> Result<(), CoreError> {
    let id = NodeId(require_i64(record, "id", "node", line)? as u32);
    let tag = require_str(record, "tag", "node", line)?.to_string();
    let node = NodeRecord {
        id,
        tag,
        type_ref: record.get("type_ref").and_then(JsonValue::as_i64).map(|i| TypeId(i as u32)),
        fields: record.get("fields").map(to_serde_json).unwrap_or(serde_json::Value::Null),
    };
    tables.insert_node(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_program() -> &'static str {
        "{\"ir\":\"sir-v1.0\",\"k\":\"meta\",\"producer\":\"test\",\"unit\":\"u\",\"ext\":{\"features\":[\"simd:v1\"],\"target\":{\"triple\":\"x86_64\",\"ptrBits\":64}}}\n\
         {\"ir\":\"sir-v1.0\",\"k\":\"type\",\"id\":9,\"kind\":\"ptr\",\"of\":3}\n\
         {\"ir\":\"sir-v1.0\",\"k\":\"sym\",\"id\":0,\"name\":\"g\",\"type_ref\":3}\n\
         {\"ir\":\"sir-v1.0\",\"k\":\"node\",\"id\":0,\"tag\":\"const.i32\",\"type_ref\":3,\"fields\":{\"value\":42}}\n"
    }

    #[test]
    fn builds_tables_from_sir_lines() {
        let tables = build_program_tables(sample_program()).unwrap();
        assert_eq!(tables.producer.as_deref(), Some("test"));
        assert_eq!(tables.unit.as_deref(), Some("u"));
        assert!(tables.features.simd_v1);
        assert_eq!(tables.target.triple.as_deref(), Some("x86_64"));
        assert_eq!(tables.target.ptr_bits, Some(64));
        assert!(tables.target.overridden.ptr_bits);

        assert!(matches!(tables.types.get(TypeId(9)), Some(SirType::Ptr { of }) if *of == TypeId::I32));
        assert_eq!(tables.symbol(SymbolId(0)).unwrap().name.as_deref(), Some("g"));
        let node = tables.node(NodeId(0)).unwrap();
        assert_eq!(node.tag, "const.i32");
        assert_eq!(node.field_i64("value"), Some(42));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let input = "{\"ir\":\"sir-v1.0\",\"k\":\"node\",\"id\":0,\"tag\":\"const.i32\"}\n\
                     {\"ir\":\"sir-v1.0\",\"k\":\"node\",\"id\":0,\"tag\":\"const.i64\"}\n";
        let err = build_program_tables(input).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId { namespace: "node", id: 0 }));
    }

    #[test]
    fn unrecognized_record_kind_is_rejected() {
        let input = "{\"ir\":\"sir-v1.0\",\"k\":\"bogus\"}\n";
        let err = build_program_tables(input).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[test]
    fn missing_ir_tag_is_rejected() {
        let input = "{\"k\":\"meta\"}\n";
        let err = build_program_tables(input).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[test]
    fn nodes_with_tag_normalizes_condbr_alias() {
        let input = "{\"ir\":\"sir-v1.0\",\"k\":\"node\",\"id\":0,\"tag\":\"term.condbr\"}\n";
        let tables = build_program_tables(input).unwrap();
        assert_eq!(tables.nodes_with_tag("term.cbr").count(), 1);
    }
}
