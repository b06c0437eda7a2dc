//! Runtime error types with trap semantics for the semantic evaluator.
//!
//! Covers the wider trap taxonomy SIR's numeric and memory ops require
//! (`§4.G`, `§7`): integer overflow/division traps, alignment failures, and
//! out-of-bounds memory access, in addition to plain type/shape errors.
//! Every variant carries the [`NodeId`] responsible for attribution.

use sircc_core::NodeId;

/// Runtime errors produced by the semantic evaluator. Each variant is a trap
/// condition that halts execution of the current call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("divide by zero at node {node}")]
    DivideByZero { node: NodeId },

    #[error("signed division overflow (INT_MIN / -1) at node {node}")]
    SignedDivisionOverflow { node: NodeId },

    #[error("misaligned access at node {node}: address not aligned to {align}")]
    Misaligned { node: NodeId, align: u64 },

    #[error("vector index out of bounds at node {node}: index {index}, lanes {lanes}")]
    VecIndexOutOfBounds {
        node: NodeId,
        index: i64,
        lanes: u32,
    },

    #[error("memory access out of bounds at node {node}: addr {addr}, len {len}")]
    MemoryOutOfBounds { node: NodeId, addr: u64, len: u64 },

    #[error("type mismatch at runtime: node {node}, expected {expected}, got {got}")]
    TypeMismatch {
        node: NodeId,
        expected: String,
        got: String,
    },

    #[error("node {node} is missing required field {field}")]
    MissingField { node: NodeId, field: &'static str },

    #[error("node {node} references unresolved id {target}")]
    UnresolvedRef { node: NodeId, target: u32 },

    #[error("node {node} has unsupported tag {tag}")]
    UnsupportedTag { node: NodeId, tag: String },

    #[error("recursion depth limit ({limit}) exceeded at node {node}")]
    RecursionLimitExceeded { node: NodeId, limit: usize },

    #[error("internal evaluator error: {message}")]
    InternalError { message: String },
}
