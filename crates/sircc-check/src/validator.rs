//! Program validator (component E, `§4.E`).
//!
//! Runs over parsed [`ProgramTables`] before lowering: feature-gates every
//! typed and node-level construct, walks each `fn`'s CFG (entry resolution,
//! block-parameter typing, terminator uniqueness, branch/switch arity), and
//! checks the inter-feature dependencies `closure:v1 => fun:v1` and
//! `sem.match_sum => adt:v1`. Every individual check pushes onto
//! [`ProgramTables::bus`] rather than short-circuiting, so one input can
//! report every problem it has (`§4.E` Ambient Stack: "accumulate, don't
//! short-circuit, across sibling items"); [`validate`] itself only branches
//! on `bus.has_errors()` once all checks have run.

use sircc_core::node::{
    is_terminator_tag, normalize_tag, requires_adt, requires_closure, requires_fun, requires_sem,
    requires_simd,
};
use sircc_core::{About, NodeId, NodeRecord, ProgramTables, SirType};

/// Runs every validator check over `tables`. Returns `Err(())` if any check
/// emitted a diagnostic; the diagnostics themselves (stable dotted codes,
/// human messages) live on `tables.bus`, not in the `Result`.
pub fn validate(tables: &mut ProgramTables) -> Result<(), ()> {
    validate_types(tables);
    validate_nodes(tables);
    validate_functions(tables);

    if tables.bus.has_errors() {
        Err(())
    } else {
        Ok(())
    }
}

fn validate_types(tables: &mut ProgramTables) {
    let ids: Vec<_> = tables.types.ids().collect();
    for id in ids {
        let ty = match tables.types.get(id) {
            Some(ty) => ty.clone(),
            None => continue,
        };
        match &ty {
            SirType::Vec { lanes, .. } if *lanes == 0 => {
                let about = About::ty(id);
                tables.bus.emit(
                    "sircc.type.vec.lanes",
                    format!("vec type {} has zero lanes", id.0),
                    Some(about),
                );
            }
            SirType::Vec { .. } if !tables.features.simd_v1 => {
                let about = About::ty(id);
                tables.bus.emit(
                    "sircc.feature.gate",
                    format!("vec type {} used without simd:v1", id.0),
                    Some(about),
                );
            }
            SirType::Fun { .. } if !tables.features.fun_v1 => {
                let about = About::ty(id);
                tables.bus.emit(
                    "sircc.feature.gate",
                    format!("fun type {} used without fun:v1", id.0),
                    Some(about),
                );
            }
            SirType::Closure { .. } => {
                let about = About::ty(id);
                if !tables.features.closure_v1 {
                    tables.bus.emit(
                        "sircc.feature.gate",
                        format!("closure type {} used without closure:v1", id.0),
                        Some(about.clone()),
                    );
                }
                if !tables.features.fun_v1 {
                    tables.bus.emit(
                        "sircc.feature.dep",
                        format!("closure type {} requires fun:v1 (closure:v1 => fun:v1)", id.0),
                        Some(about),
                    );
                }
            }
            _ => {}
        }
    }
}

fn validate_nodes(tables: &mut ProgramTables) {
    let ids: Vec<_> = tables.node_ids().collect();
    for id in ids {
        let node = match tables.node(id) {
            Some(n) => n.clone(),
            None => continue,
        };
        let tag = normalize_tag(&node.tag).to_string();

        feature_gate_node(tables, &node, &tag);

        if tag == "term.switch" {
            validate_switch_cases(tables, &node);
        }
        if tag == "call" {
            validate_call_arity(tables, &node);
        }
    }
}

fn feature_gate_node(tables: &mut ProgramTables, node: &NodeRecord, tag: &str) {
    let about = About::node_tagged(node.id, tag.to_string());
    if requires_simd(tag) && !tables.features.simd_v1 {
        tables.bus.emit(
            "sircc.feature.gate",
            format!("node {} ({}) used without simd:v1", node.id, tag),
            Some(about.clone()),
        );
    }
    if requires_fun(tag) && !tables.features.fun_v1 {
        tables.bus.emit(
            "sircc.feature.gate",
            format!("node {} ({}) used without fun:v1", node.id, tag),
            Some(about.clone()),
        );
    }
    if requires_closure(tag) {
        if !tables.features.closure_v1 {
            tables.bus.emit(
                "sircc.feature.gate",
                format!("node {} ({}) used without closure:v1", node.id, tag),
                Some(about.clone()),
            );
        }
        if !tables.features.fun_v1 {
            tables.bus.emit(
                "sircc.feature.dep",
                format!("node {} ({}) requires fun:v1 (closure:v1 => fun:v1)", node.id, tag),
                Some(about.clone()),
            );
        }
    }
    if requires_adt(tag) && !tables.features.adt_v1 {
        tables.bus.emit(
            "sircc.feature.gate",
            format!("node {} ({}) used without adt:v1", node.id, tag),
            Some(about.clone()),
        );
    }
    if requires_sem(tag) && !tables.features.sem_v1 {
        tables.bus.emit(
            "sircc.feature.gate",
            format!("node {} ({}) used without sem:v1", node.id, tag),
            Some(about.clone()),
        );
    }
    if tag == "sem.match_sum" && !tables.features.adt_v1 {
        tables.bus.emit(
            "sircc.feature.dep",
            format!("node {} (sem.match_sum) requires adt:v1", node.id),
            Some(about),
        );
    }
}

/// Every `term.switch.cases[*].lit` must reference a `const.*` node
/// (`§8` "Switch case literal").
fn validate_switch_cases(tables: &mut ProgramTables, node: &NodeRecord) {
    let cases = node.field("cases").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    for case in &cases {
        let lit_ref = case.get("lit").and_then(|v| serde_json::from_value::<sircc_core::Ref>(v.clone()).ok());
        let Some(lit_ref) = lit_ref else {
            tables.bus.emit(
                "sircc.cfg.switch.case.lit.missing",
                format!("term.switch {} has a case with no 'lit'", node.id),
                Some(About::node(node.id)),
            );
            continue;
        };
        match tables.node(lit_ref.as_node_id()) {
            Some(lit_node) if lit_node.tag.starts_with("const.") => {}
            Some(lit_node) => {
                tables.bus.emit(
                    "sircc.cfg.switch.case.lit.kind",
                    format!(
                        "term.switch {} case lit {} is not a const.* node (tag {})",
                        node.id, lit_ref.as_node_id(), lit_node.tag
                    ),
                    Some(About::node(node.id)),
                );
            }
            None => {
                tables.bus.emit(
                    "sircc.parse.dangling_ref",
                    format!("term.switch {} case lit references unresolved node {}", node.id, lit_ref.as_node_id()),
                    Some(About::node(node.id)),
                );
            }
        }
    }
}

/// `call {callee, args}`: the callee's `fn` signature type gives the
/// non-vararg parameter count the args must match exactly (`§4.G` "Calls",
/// `§8` scenario 6).
fn validate_call_arity(tables: &mut ProgramTables, node: &NodeRecord) {
    let Some(callee_ref) = node.field_ref("callee") else {
        tables.bus.emit(
            "sircc.parse.missing_field",
            format!("call {} missing 'callee'", node.id),
            Some(About::node(node.id)),
        );
        return;
    };
    let callee_id = callee_ref.as_node_id();
    let Some(callee) = tables.node(callee_id) else {
        tables.bus.emit(
            "sircc.parse.dangling_ref",
            format!("call {} callee references unresolved node {}", node.id, callee_id),
            Some(About::node(node.id)),
        );
        return;
    };
    let Some(sig_ty) = callee.type_ref else {
        return;
    };
    let args_len = node.field_refs("args").len();
    let Some(SirType::Fn { params, varargs, .. }) = tables.types.get(sig_ty).cloned() else {
        return;
    };
    let ok = if varargs {
        args_len >= params.len()
    } else {
        args_len == params.len()
    };
    if !ok {
        tables.bus.emit(
            "sircc.cfg.call.arity",
            format!(
                "call {} to {} passes {} args but callee signature has {} params",
                node.id, callee_id, args_len, params.len()
            ),
            Some(About::node(node.id)),
        );
    }
}

fn validate_functions(tables: &mut ProgramTables) {
    let fn_ids: Vec<NodeId> = tables
        .node_ids()
        .filter(|id| tables.node(*id).map(|n| n.tag == "fn").unwrap_or(false))
        .collect();

    for fn_id in fn_ids {
        let f = tables.node(fn_id).unwrap().clone();
        let Some(entry_ref) = f.field_ref("entry") else {
            tables.bus.emit(
                "sircc.cfg.fn.entry.missing",
                format!("fn {} has no 'entry'", fn_id),
                Some(About::node(fn_id)),
            );
            continue;
        };
        let entry = entry_ref.as_node_id();
        if tables.node(entry).is_none() {
            tables.bus.emit(
                "sircc.parse.dangling_ref",
                format!("fn {} entry references unresolved block {}", fn_id, entry),
                Some(About::node(fn_id)),
            );
            continue;
        }

        let blocks = f.field_refs("blocks");
        if !blocks.iter().any(|r| r.as_node_id() == entry) {
            tables.bus.emit(
                "sircc.cfg.fn.entry.not_in_blocks",
                format!("fn {} entry {} is not listed in 'blocks'", fn_id, entry),
                Some(About::node(fn_id)),
            );
        }

        for block_ref in &blocks {
            validate_block(tables, fn_id, block_ref.as_node_id());
        }
    }
}

fn validate_block(tables: &mut ProgramTables, fn_id: NodeId, block_id: NodeId) {
    let Some(block) = tables.node(block_id).cloned() else {
        tables.bus.emit(
            "sircc.parse.dangling_ref",
            format!("fn {} references unresolved block {}", fn_id, block_id),
            Some(About::node(fn_id)),
        );
        return;
    };

    for param_ref in block.field_refs("params") {
        let pid = param_ref.as_node_id();
        match tables.node(pid) {
            Some(p) if p.tag == "bparam" => {
                if p.type_ref.is_none() {
                    tables.bus.emit(
                        "sircc.cfg.bparam.type.missing",
                        format!("bparam {} in block {} has no type_ref", pid, block_id),
                        Some(About::node(pid)),
                    );
                }
            }
            Some(p) => {
                tables.bus.emit(
                    "sircc.cfg.bparam.kind",
                    format!("block {} param {} is not a bparam node (tag {})", block_id, pid, p.tag),
                    Some(About::node(block_id)),
                );
            }
            None => {
                tables.bus.emit(
                    "sircc.parse.dangling_ref",
                    format!("block {} param references unresolved node {}", block_id, pid),
                    Some(About::node(block_id)),
                );
            }
        }
    }

    let stmts = block.field_refs("stmts");
    if stmts.is_empty() {
        tables.bus.emit(
            "sircc.cfg.block.term.missing",
            format!("block {} has no statements (needs a terminator)", block_id),
            Some(About::node(block_id)),
        );
        return;
    }

    for (i, stmt_ref) in stmts.iter().enumerate() {
        let sid = stmt_ref.as_node_id();
        let Some(stmt) = tables.node(sid) else {
            tables.bus.emit(
                "sircc.parse.dangling_ref",
                format!("block {} stmt references unresolved node {}", block_id, sid),
                Some(About::node(block_id)),
            );
            continue;
        };
        let is_last = i + 1 == stmts.len();
        let is_term = is_terminator_tag(&stmt.tag);
        if is_term && !is_last {
            tables.bus.emit(
                "sircc.cfg.block.term.not_last",
                format!("block {} has a terminator ({}) before its last statement", block_id, sid),
                Some(About::node(block_id)),
            );
        }
        if is_last && !is_term {
            tables.bus.emit(
                "sircc.cfg.block.term.missing",
                format!("block {} does not end in a terminator (last stmt {} is {})", block_id, sid, stmt.tag),
                Some(About::node(block_id)),
            );
        }
        if is_term {
            validate_terminator(tables, block_id, sid);
        }
    }
}

fn validate_terminator(tables: &mut ProgramTables, block_id: NodeId, term_id: NodeId) {
    let Some(term) = tables.node(term_id).cloned() else { return };
    match normalize_tag(&term.tag) {
        "term.br" => {
            if let Some(to) = term.field_ref("to") {
                validate_branch_arity(tables, term_id, to.as_node_id(), term.field_refs("args").len());
            } else {
                tables.bus.emit(
                    "sircc.cfg.branch.to.missing",
                    format!("term.br {} has no 'to'", term_id),
                    Some(About::node(term_id)),
                );
            }
        }
        "term.cbr" => {
            if term.field_ref("cond").is_none() {
                tables.bus.emit(
                    "sircc.cfg.branch.cond.missing",
                    format!("term.cbr {} has no 'cond'", term_id),
                    Some(About::node(term_id)),
                );
            }
            for key in ["then", "else"] {
                let Some(branch) = term.field(key) else {
                    tables.bus.emit(
                        "sircc.cfg.branch.to.missing",
                        format!("term.cbr {} has no '{}'", term_id, key),
                        Some(About::node(term_id)),
                    );
                    continue;
                };
                let to = branch.get("to").and_then(|v| serde_json::from_value::<sircc_core::Ref>(v.clone()).ok());
                let args_len = branch
                    .get("args")
                    .and_then(|v| v.as_array())
                    .map(|a| a.len())
                    .unwrap_or(0);
                match to {
                    Some(to) => validate_branch_arity(tables, term_id, to.as_node_id(), args_len),
                    None => {
                        tables.bus.emit(
                            "sircc.cfg.branch.to.missing",
                            format!("term.cbr {} '{}' branch has no 'to'", term_id, key),
                            Some(About::node(term_id)),
                        );
                    }
                }
            }
        }
        "term.switch" => {
            if term.field_ref("scrut").is_none() {
                tables.bus.emit(
                    "sircc.cfg.switch.scrut.missing",
                    format!("term.switch {} has no 'scrut'", term_id),
                    Some(About::node(term_id)),
                );
            }
            let Some(default) = term.field("default") else {
                tables.bus.emit(
                    "sircc.cfg.switch.default.missing",
                    format!("term.switch {} has no 'default'", term_id),
                    Some(About::node(term_id)),
                );
                return;
            };
            let to = default.get("to").and_then(|v| serde_json::from_value::<sircc_core::Ref>(v.clone()).ok());
            let args_len = default.get("args").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
            if let Some(to) = to {
                validate_branch_arity(tables, term_id, to.as_node_id(), args_len);
            }
            let cases = term.field("cases").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            for case in &cases {
                let to = case.get("to").and_then(|v| serde_json::from_value::<sircc_core::Ref>(v.clone()).ok());
                let args_len = case.get("args").and_then(|v| v.as_array()).map(|a| a.len()).unwrap_or(0);
                if let Some(to) = to {
                    validate_branch_arity(tables, term_id, to.as_node_id(), args_len);
                }
            }
        }
        "term.ret" | "return" => {}
        other => {
            tables.bus.emit(
                "sircc.cfg.term.unknown",
                format!("node {} ({}) is not a recognized terminator", term_id, other),
                Some(About::node(block_id)),
            );
        }
    }
}

/// `|args| == |dest.params|` (`§8` "Branch-arity soundness").
fn validate_branch_arity(tables: &mut ProgramTables, term_id: NodeId, dest: NodeId, args_len: usize) {
    let Some(dest_block) = tables.node(dest) else {
        tables.bus.emit(
            "sircc.parse.dangling_ref",
            format!("term {} branches to unresolved block {}", term_id, dest),
            Some(About::node(term_id)),
        );
        return;
    };
    let params_len = dest_block.field_refs("params").len();
    if params_len != args_len {
        tables.bus.emit(
            "sircc.cfg.branch.arity",
            format!(
                "term {} branches to block {} with {} args but it has {} params",
                term_id, dest, args_len, params_len
            ),
            Some(About::node(term_id)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    fn sir_with(lines: &[&str]) -> ProgramTables {
        build_program_tables(&lines.join("\n")).unwrap()
    }

    #[test]
    fn well_formed_function_validates_clean() {
        let mut tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":1}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"return","fields":{"value":{"ref":0}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[0,1]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","fields":{"name":"main","entry":{"ref":2},"blocks":[2]}}"#,
        ]);
        assert!(validate(&mut tables).is_ok());
        assert!(!tables.bus.has_errors());
    }

    #[test]
    fn block_without_terminator_fails() {
        let mut tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"const.i32","fields":{"value":1}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[],"stmts":[0]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","fields":{"name":"main","entry":{"ref":2},"blocks":[2]}}"#,
        ]);
        assert!(validate(&mut tables).is_err());
        assert!(tables.bus.diagnostics().iter().any(|d| d.code == "sircc.cfg.block.term.missing"));
    }

    #[test]
    fn branch_arity_mismatch_fails() {
        let mut tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"term.br","fields":{"to":{"ref":2},"args":[]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":10,"tag":"bparam","type_ref":3}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"block","fields":{"params":[{"ref":10}],"stmts":[20]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":20,"tag":"return","fields":{}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"block","fields":{"params":[],"stmts":[0]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","fields":{"name":"main","entry":{"ref":1},"blocks":[1,2]}}"#,
        ]);
        assert!(validate(&mut tables).is_err());
        assert!(tables.bus.diagnostics().iter().any(|d| d.code == "sircc.cfg.branch.arity"));
    }

    /// `§8` scenario 6: a call with fewer args than the callee's declared
    /// parameter count fails validation with a non-empty code and message.
    #[test]
    fn mismatched_call_arity_fails_validation() {
        let mut tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"type","id":9,"kind":"fn","params":[3,3,3],"ret":3}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"decl.fn","type_ref":9,"fields":{"name":"callee"}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":1}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"const.i32","fields":{"value":2}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"call","fields":{"callee":{"ref":0},"args":[{"ref":1},{"ref":2}]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":4,"tag":"return","fields":{"value":{"ref":3}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":5,"tag":"block","fields":{"params":[],"stmts":[1,2,3,4]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":6,"tag":"fn","fields":{"name":"main","entry":{"ref":5},"blocks":[5]}}"#,
        ]);
        let result = validate(&mut tables);
        assert!(result.is_err());
        let diag = tables
            .bus
            .diagnostics()
            .iter()
            .find(|d| d.code == "sircc.cfg.call.arity")
            .expect("expected a call-arity diagnostic");
        assert!(!diag.code.is_empty());
        assert!(!diag.message.is_empty());
    }

    #[test]
    fn switch_case_lit_must_be_const_node() {
        let mut tables = sir_with(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u"}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"term.br","fields":{"to":{"ref":1},"args":[]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"block","fields":{"params":[],"stmts":[2]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"term.switch","fields":{"scrut":{"ref":0},"cases":[{"lit":{"ref":0},"to":{"ref":1}}],"default":{"to":{"ref":1}}}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"fn","fields":{"name":"main","entry":{"ref":1},"blocks":[1]}}"#,
        ]);
        assert!(validate(&mut tables).is_err());
        assert!(tables.bus.diagnostics().iter().any(|d| d.code == "sircc.cfg.switch.case.lit.kind"));
    }
}
