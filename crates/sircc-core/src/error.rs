//! Core error types for sircc-core.
//!
//! Uses `thiserror` for structured, matchable error variants. These are
//! Rust-level `Result` errors for malformed API usage or I/O failure; they
//! are distinct from the diagnostic bus (`diag.rs`), which carries the
//! stable dotted error codes that are part of the compiler's public contract
//! (`§7 ERROR HANDLING DESIGN`, `§9` "treat the dotted-code table as a
//! stable public API").

use thiserror::Error;

/// Core errors produced by the sircc-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Attempting to insert an id that already has an entry in its table.
    #[error("duplicate {namespace} id: {id}")]
    DuplicateId { namespace: &'static str, id: u32 },

    /// Attempting to register a named type whose name already exists.
    #[error("duplicate type name: '{name}'")]
    DuplicateTypeName { name: String },

    /// A malformed SIR record: missing a required field or wrong shape.
    #[error("malformed {kind} record at line {line}: {reason}")]
    MalformedRecord {
        kind: &'static str,
        line: usize,
        reason: String,
    },

    /// Failure reading or opening an input file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Allocation failure while growing a table (`sircc.oom`).
    #[error("out of memory")]
    OutOfMemory,
}
