//! Node and symbol records, and tag-family classification (part of
//! component B, `§3 DATA MODEL` "Nodes"/"Symbols").
//!
//! A reference is either a bare integer or a single-key object `{ref: N}`
//! (`§3` "Identifiers"). Nodes are `{id, tag, type_ref?, fields?}`; tags
//! follow a dotted-mnemonic scheme grouped into families (terminal values,
//! integer ops, float ops, bool ops, pointer ops, memory, SIMD, control,
//! semantic, ADT/closure/fun). Rather than encode all ~90 tags as enum
//! variants, nodes here carry their tag as a `String` plus a
//! `serde_json::Value` field bag: the tag space is large and open-ended, and
//! a single flat enum would not let downstream passes group tags by family
//! the way the validator (`§4.E`), high-level lowering (`§4.F`), and the two
//! code-lowering passes (`§4.G`/`§4.H`) all need to. Family classification
//! is instead done with free functions matching dotted-prefix patterns, an
//! open string-family match rather than a closed enum match.

use serde::{Deserialize, Serialize};

use crate::id::{NodeId, SymbolId, TypeId};

/// A reference to a type, symbol, or node: either a bare integer id or
/// `{ref: N}` (`§3` "Identifiers").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
    Bare(u32),
    Keyed { r#ref: u32 },
}

impl Ref {
    pub fn id(&self) -> u32 {
        match self {
            Ref::Bare(id) => *id,
            Ref::Keyed { r#ref } => *r#ref,
        }
    }

    pub fn as_type_id(&self) -> TypeId {
        TypeId(self.id())
    }

    pub fn as_node_id(&self) -> NodeId {
        NodeId(self.id())
    }

    pub fn as_symbol_id(&self) -> SymbolId {
        SymbolId(self.id())
    }
}

/// A symbol: global, extern, or named constant (`§3` "Symbols").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub id: SymbolId,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub linkage: Option<String>,
    pub type_ref: Option<TypeId>,
    pub value: Option<serde_json::Value>,
}

/// A node: the IR's only executable/structural entity (`§3` "Nodes").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub tag: String,
    pub type_ref: Option<TypeId>,
    /// Tag-specific payload, keyed by field name. Field shapes are
    /// documented per tag family in `§3`/`§4`.
    pub fields: serde_json::Value,
}

impl NodeRecord {
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }

    pub fn field_ref(&self, key: &str) -> Option<Ref> {
        self.field(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn field_refs(&self, key: &str) -> Vec<Ref> {
        self.field(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| serde_json::from_value(v.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(|v| v.as_str())
    }

    pub fn field_i64(&self, key: &str) -> Option<i64> {
        self.field(key).and_then(|v| v.as_i64())
    }

    pub fn field_bool(&self, key: &str) -> Option<bool> {
        self.field(key).and_then(|v| v.as_bool())
    }
}

/// Normalizes `term.cbr` and `term.condbr` to a single tag so every
/// consumer matches one spelling (`§9` open question: "`term.cbr` vs
/// `term.condbr` appear interchangeable; the validator accepts both").
pub fn normalize_tag(tag: &str) -> &str {
    if tag == "term.condbr" {
        "term.cbr"
    } else {
        tag
    }
}

/// Terminator tags (`§3`: "Control... `term.br|cbr|condbr|switch|ret`",
/// plus the legacy-body `return`).
pub fn is_terminator_tag(tag: &str) -> bool {
    matches!(
        normalize_tag(tag),
        "term.br" | "term.cbr" | "term.switch" | "term.ret" | "return"
    )
}

/// `block`/`bparam`/`fn`/`decl.fn`/`param` -- structural control-flow scaffolding
/// rather than computation.
pub fn is_structural_tag(tag: &str) -> bool {
    matches!(tag, "block" | "bparam" | "fn" | "decl.fn" | "param")
}

/// Tags gated by `simd:v1`.
pub fn requires_simd(tag: &str) -> bool {
    tag.starts_with("vec.") || tag == "load.vec" || tag == "store.vec"
}

/// Tags gated by `fun:v1` (function-pointer types/ops).
pub fn requires_fun(tag: &str) -> bool {
    tag.starts_with("fun.") || tag == "call.fun"
}

/// Tags gated by `closure:v1` (implies `fun:v1`, `§3`).
pub fn requires_closure(tag: &str) -> bool {
    tag.starts_with("closure.") || tag == "call.closure"
}

/// Tags gated by `adt:v1` (sum types and their ops).
pub fn requires_adt(tag: &str) -> bool {
    tag.starts_with("adt.")
}

/// Tags gated by `sem:v1` (high-level, pre-lowering forms).
pub fn requires_sem(tag: &str) -> bool {
    tag.starts_with("sem.")
}

/// Integer-op family: `iN.<op>` (`§3` "Integer ops").
pub fn is_int_op(tag: &str) -> bool {
    tag.starts_with("i8.")
        || tag.starts_with("i16.")
        || tag.starts_with("i32.")
        || tag.starts_with("i64.")
}

/// Float-op family: `fN.<op>` (`§3` "Float ops").
pub fn is_float_op(tag: &str) -> bool {
    tag.starts_with("f32.") || tag.starts_with("f64.")
}

/// Integer width encoded in an `iN.*`/`load.iN`/`alloca.iN` style tag, if any.
pub fn int_width_of_tag(tag: &str) -> Option<u32> {
    let head = tag.split('.').next()?;
    match head {
        "i8" => Some(8),
        "i16" => Some(16),
        "i32" => Some(32),
        "i64" => Some(64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_parses_bare_integer() {
        let r: Ref = serde_json::from_str("5").unwrap();
        assert_eq!(r.id(), 5);
    }

    #[test]
    fn ref_parses_keyed_object() {
        let r: Ref = serde_json::from_str(r#"{"ref": 9}"#).unwrap();
        assert_eq!(r.id(), 9);
    }

    #[test]
    fn term_condbr_normalizes_to_term_cbr() {
        assert_eq!(normalize_tag("term.condbr"), "term.cbr");
        assert_eq!(normalize_tag("term.cbr"), "term.cbr");
        assert!(is_terminator_tag("term.condbr"));
        assert!(is_terminator_tag("term.cbr"));
    }

    #[test]
    fn terminator_tags_classified_correctly() {
        for tag in ["term.br", "term.cbr", "term.switch", "term.ret", "return"] {
            assert!(is_terminator_tag(tag), "{tag} should be a terminator");
        }
        assert!(!is_terminator_tag("i32.add"));
        assert!(!is_terminator_tag("block"));
    }

    #[test]
    fn feature_gated_tag_families() {
        assert!(requires_simd("vec.splat"));
        assert!(requires_simd("load.vec"));
        assert!(requires_fun("call.fun"));
        assert!(requires_closure("call.closure"));
        assert!(requires_adt("adt.create"));
        assert!(requires_sem("sem.if"));
        assert!(!requires_simd("i32.add"));
    }

    #[test]
    fn int_and_float_op_family_matching() {
        assert!(is_int_op("i32.add"));
        assert!(is_int_op("i64.div.s.trap"));
        assert!(!is_int_op("f32.add"));
        assert!(is_float_op("f64.sqrt"));
        assert_eq!(int_width_of_tag("i16.shl"), Some(16));
        assert_eq!(int_width_of_tag("f32.add"), None);
    }

    #[test]
    fn node_record_field_accessors() {
        let node = NodeRecord {
            id: NodeId(1),
            tag: "const.i32".to_string(),
            type_ref: Some(TypeId::I32),
            fields: serde_json::json!({"value": 42, "name": "x"}),
        };
        assert_eq!(node.field_i64("value"), Some(42));
        assert_eq!(node.field_str("name"), Some("x"));
        assert_eq!(node.field_i64("missing"), None);
    }

    #[test]
    fn node_record_field_refs_list() {
        let node = NodeRecord {
            id: NodeId(1),
            tag: "term.br".to_string(),
            type_ref: None,
            fields: serde_json::json!({"args": [1, {"ref": 2}, 3]}),
        };
        let refs = node.field_refs("args");
        assert_eq!(refs.iter().map(Ref::id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }
}
