//! High-level lowering (component F, `§4.F`).
//!
//! Rewrites `sem.if`/`sem.and_sc`/`sem.or_sc` in place into their
//! lower-level equivalents (`select`/`bool.and`/`bool.or`), then re-emits a
//! canonical SIR text form. Mutation is scoped to the already-owned
//! [`ProgramTables`] arena, following the design note that in-place
//! rewriting during lowering should stay confined to the lowering arena
//! (`§9`): nothing here reaches back into the original input text.
//!
//! Lowering is idempotent (`§8` "Round trip of lowered SIR"): once a
//! `sem.if`/`sem.and_sc`/`sem.or_sc` node is rewritten its tag no longer
//! matches [`requires_sem`], so a second pass over the same tables is a
//! no-op.

use sircc_core::node::requires_sem;
use sircc_core::{About, NodeId, ProgramTables};

/// Lowers every high-level `sem.*` node in `tables` in place. Returns
/// `Err(())` if any node uses an unsupported `sem.*` form; the diagnostic
/// (`sircc.lower_hl.sem.<form>.unsupported`) is on `tables.bus`.
pub fn lower_high_level(tables: &mut ProgramTables) -> Result<(), ()> {
    let ids: Vec<NodeId> = tables.node_ids().collect();
    for id in ids {
        let tag = match tables.node(id) {
            Some(n) => n.tag.clone(),
            None => continue,
        };
        if !requires_sem(&tag) {
            continue;
        }
        match tag.as_str() {
            "sem.if" => lower_sem_if(tables, id),
            "sem.and_sc" => lower_sem_short_circuit(tables, id, "bool.and", "lhs"),
            "sem.or_sc" => lower_sem_short_circuit(tables, id, "bool.or", "lhs"),
            other => {
                let form = other.strip_prefix("sem.").unwrap_or(other);
                tables.bus.emit(
                    &format!("sircc.lower_hl.sem.{form}.unsupported"),
                    format!("node {id} ({other}) has no high-level lowering"),
                    Some(About::node_tagged(id, other.to_string())),
                );
            }
        }
    }

    if tables.bus.has_errors() {
        Err(())
    } else {
        Ok(())
    }
}

/// `sem.if(cond, {kind:"val",v:vt}, {kind:"val",v:ve})` -> `select(cond, vt, ve)`.
fn lower_sem_if(tables: &mut ProgramTables, id: NodeId) {
    let node = tables.node(id).unwrap().clone();
    let cond = node.field("cond").cloned();
    let then_v = val_payload(&node, "then");
    let else_v = val_payload(&node, "else");

    match (cond, then_v, else_v) {
        (Some(cond), Some(t), Some(e)) => {
            let n = tables.node_mut(id).unwrap();
            n.tag = "select".to_string();
            n.fields = serde_json::json!({ "cond": cond, "t": t, "e": e });
        }
        _ => {
            tables.bus.emit(
                "sircc.lower_hl.sem.if.unsupported",
                format!("node {id} (sem.if) has a non-'val' branch; only {{kind:\"val\",v}} branches lower"),
                Some(About::node_tagged(id, "sem.if")),
            );
        }
    }
}

/// `sem.and_sc(lhs, {kind:"val",v:rhs})` -> `bool.and(lhs, rhs)`; `sem.or_sc`
/// is symmetric.
fn lower_sem_short_circuit(tables: &mut ProgramTables, id: NodeId, new_tag: &str, lhs_key: &str) {
    let node = tables.node(id).unwrap().clone();
    let lhs = node.field(lhs_key).cloned();
    let rhs = val_payload(&node, "rhs");

    match (lhs, rhs) {
        (Some(a), Some(b)) => {
            let n = tables.node_mut(id).unwrap();
            n.tag = new_tag.to_string();
            n.fields = serde_json::json!({ "a": a, "b": b });
        }
        _ => {
            let form = node.tag.strip_prefix("sem.").unwrap_or(&node.tag).to_string();
            tables.bus.emit(
                &format!("sircc.lower_hl.sem.{form}.unsupported"),
                format!(
                    "node {id} ({}) has a non-'val' rhs branch; only {{kind:\"val\",v}} branches lower",
                    node.tag
                ),
                Some(About::node_tagged(id, node.tag.clone())),
            );
        }
    }
}

/// Extracts `node.fields[key].v` when `node.fields[key].kind == "val"`.
fn val_payload(node: &sircc_core::NodeRecord, key: &str) -> Option<serde_json::Value> {
    let branch = node.field(key)?;
    if branch.get("kind").and_then(|v| v.as_str()) != Some("val") {
        return None;
    }
    branch.get("v").cloned()
}

/// Re-emits `tables` as canonical SIR text: one JSON-Lines record per meta,
/// type, symbol, and node entry (`§4.F` "the pass emits a canonical SIR...
/// with the active feature set, unit name, and target metadata"). Output
/// parity with the original input text is not required (`§4.A`); only the
/// table contents round-trip.
pub fn emit_canonical(tables: &ProgramTables) -> String {
    let mut lines = Vec::new();

    let mut features = Vec::new();
    if tables.features.simd_v1 {
        features.push("simd:v1");
    }
    if tables.features.fun_v1 {
        features.push("fun:v1");
    }
    if tables.features.closure_v1 {
        features.push("closure:v1");
    }
    if tables.features.adt_v1 {
        features.push("adt:v1");
    }
    if tables.features.sem_v1 {
        features.push("sem:v1");
    }
    if tables.features.atomics_v1 {
        features.push("atomics:v1");
    }
    if tables.features.coro_v1 {
        features.push("coro:v1");
    }
    if tables.features.eh_v1 {
        features.push("eh:v1");
    }
    if tables.features.gc_v1 {
        features.push("gc:v1");
    }

    let mut target = serde_json::Map::new();
    if let Some(v) = &tables.target.triple {
        target.insert("triple".to_string(), serde_json::json!(v));
    }
    if let Some(v) = &tables.target.cpu {
        target.insert("cpu".to_string(), serde_json::json!(v));
    }
    if let Some(v) = tables.target.ptr_bits {
        target.insert("ptrBits".to_string(), serde_json::json!(v));
    }

    lines.push(
        serde_json::json!({
            "ir": "sir-v1.0",
            "k": "meta",
            "producer": tables.producer.clone().unwrap_or_default(),
            "unit": tables.unit.clone().unwrap_or_default(),
            "ext": { "features": features, "target": target },
        })
        .to_string(),
    );

    for id in tables.types.ids() {
        if let Some(line) = emit_type_line(tables, id) {
            lines.push(line);
        }
    }

    for id in tables.node_ids() {
        let node = tables.node(id).unwrap();
        lines.push(
            serde_json::json!({
                "ir": "sir-v1.0",
                "k": "node",
                "id": id.0,
                "tag": node.tag,
                "type_ref": node.type_ref.map(|t| t.0),
                "fields": node.fields,
            })
            .to_string(),
        );
    }

    lines.join("\n")
}

fn emit_type_line(tables: &ProgramTables, id: sircc_core::TypeId) -> Option<String> {
    use sircc_core::SirType;

    let ty = tables.types.get(id)?;
    let body = match ty {
        SirType::Prim(p) => serde_json::json!({ "kind": "prim", "name": p.name() }),
        SirType::Ptr { of } => serde_json::json!({ "kind": "ptr", "of": of.0 }),
        SirType::Array { of, len } => serde_json::json!({ "kind": "array", "of": of.0, "len": len }),
        SirType::Struct { name, fields } => serde_json::json!({
            "kind": "struct",
            "name": name,
            "fields": fields.iter().map(|f| serde_json::json!({"name": f.name, "type_ref": f.type_ref.0})).collect::<Vec<_>>(),
        }),
        SirType::Fn { params, ret, varargs } => serde_json::json!({
            "kind": "fn",
            "params": params.iter().map(|p| p.0).collect::<Vec<_>>(),
            "ret": ret.0,
            "varargs": varargs,
        }),
        SirType::Fun { sig } => serde_json::json!({ "kind": "fun", "sig": sig.0 }),
        SirType::Closure { call_sig, env_ty, name } => serde_json::json!({
            "kind": "closure",
            "call_sig": call_sig.0,
            "env_ty": env_ty.0,
            "name": name,
        }),
        SirType::Vec { lane, lanes } => serde_json::json!({ "kind": "vec", "lane": lane.0, "lanes": lanes }),
        SirType::Sum { variants } => serde_json::json!({
            "kind": "sum",
            "variants": variants.iter().map(|v| serde_json::json!({"name": v.name, "ty": v.ty.map(|t| t.0)})).collect::<Vec<_>>(),
        }),
    };
    let mut obj = body.as_object().unwrap().clone();
    obj.insert("ir".to_string(), serde_json::json!("sir-v1.0"));
    obj.insert("k".to_string(), serde_json::json!("type"));
    obj.insert("id".to_string(), serde_json::json!(id.0));
    Some(serde_json::Value::Object(obj).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sircc_core::build_program_tables;

    #[test]
    fn sem_if_lowers_to_select() {
        let mut tables = build_program_tables(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u","ext":{"features":["sem:v1"]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"bool.const","fields":{"value":true}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":1}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"const.i32","fields":{"value":2}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"sem.if","fields":{"cond":{"ref":0},"then":{"kind":"val","v":{"ref":1}},"else":{"kind":"val","v":{"ref":2}}}}"#,
        ].join("\n")).unwrap();

        assert!(lower_high_level(&mut tables).is_ok());
        let node = tables.node(NodeId(3)).unwrap();
        assert_eq!(node.tag, "select");
        assert_eq!(node.field_i64("cond"), None);
        assert!(node.field("t").is_some());
        assert!(node.field("e").is_some());
    }

    #[test]
    fn sem_and_sc_lowers_to_bool_and() {
        let mut tables = build_program_tables(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u","ext":{"features":["sem:v1"]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"bool.const","fields":{"value":true}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"bool.const","fields":{"value":false}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"sem.and_sc","fields":{"lhs":{"ref":0},"rhs":{"kind":"val","v":{"ref":1}}}}"#,
        ].join("\n")).unwrap();

        assert!(lower_high_level(&mut tables).is_ok());
        let node = tables.node(NodeId(2)).unwrap();
        assert_eq!(node.tag, "bool.and");
    }

    #[test]
    fn non_val_branch_is_unsupported() {
        let mut tables = build_program_tables(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u","ext":{"features":["sem:v1"]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"bool.const","fields":{"value":true}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"sem.if","fields":{"cond":{"ref":0},"then":{"kind":"block"},"else":{"kind":"val","v":{"ref":0}}}}"#,
        ].join("\n")).unwrap();

        assert!(lower_high_level(&mut tables).is_err());
        assert!(tables.bus.diagnostics().iter().any(|d| d.code == "sircc.lower_hl.sem.if.unsupported"));
    }

    #[test]
    fn lowering_twice_is_idempotent() {
        let mut tables = build_program_tables(&[
            r#"{"ir":"sir-v1.0","k":"meta","producer":"test","unit":"u","ext":{"features":["sem:v1"]}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":0,"tag":"bool.const","fields":{"value":true}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":1,"tag":"const.i32","fields":{"value":1}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":2,"tag":"const.i32","fields":{"value":2}}"#,
            r#"{"ir":"sir-v1.0","k":"node","id":3,"tag":"sem.if","fields":{"cond":{"ref":0},"then":{"kind":"val","v":{"ref":1}},"else":{"kind":"val","v":{"ref":2}}}}"#,
        ].join("\n")).unwrap();

        assert!(lower_high_level(&mut tables).is_ok());
        let once = emit_canonical(&tables);
        assert!(lower_high_level(&mut tables).is_ok());
        let twice = emit_canonical(&tables);
        assert_eq!(once, twice);
    }
}
