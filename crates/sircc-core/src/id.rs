//! Stable ID newtypes for SIR table entities.
//!
//! Types, symbols, and nodes each live in their own namespace, identified by
//! small non-negative integers assigned by the producer (see `§3 DATA MODEL`:
//! "Within one program, every id is unique in its namespace; forward
//! references are permitted"). All IDs are distinct newtype wrappers over
//! `u32` so a `TypeId` cannot be accidentally used where a `NodeId` is
//! expected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a type in the program's type table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

/// Identifies a symbol (global, extern, named constant) in the symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// Identifies a node (the IR's only executable/structural entity) in the
/// node table. Blocks, block parameters, functions, and statements are all
/// nodes distinguished by their `tag`; a `BlockId` or `FunctionId` is simply
/// a `NodeId` known (by validation) to carry the right tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats_bare_integer() {
        assert_eq!(format!("{}", TypeId(7)), "7");
        assert_eq!(format!("{}", SymbolId(9)), "9");
        assert_eq!(format!("{}", NodeId(0)), "0");
    }

    #[test]
    fn id_types_are_distinct_at_type_level() {
        let t = TypeId(1);
        let s = SymbolId(1);
        let n = NodeId(1);
        assert_eq!(t.0, s.0);
        assert_eq!(s.0, n.0);
    }

    #[test]
    fn serde_roundtrip() {
        for id in [NodeId(0), NodeId(42), NodeId(u32::MAX)] {
            let json = serde_json::to_string(&id).unwrap();
            let back: NodeId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, back);
        }
    }

    #[test]
    fn ids_are_ordered_by_inner_value() {
        assert!(TypeId(1) < TypeId(2));
        assert!(NodeId(5) > NodeId(4));
    }
}
