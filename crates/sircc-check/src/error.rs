//! Programmer-facing `Result` errors for this crate, distinct from the
//! SIR-program-facing diagnostic bus (`§7.A`): these are bail conditions in
//! the Rust API itself (malformed input handed to a driver function), not
//! dotted diagnostic codes accumulated while checking a program.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Core(#[from] sircc_core::CoreError),

    #[error("validation failed with {count} diagnostic(s)")]
    ValidationFailed { count: usize },

    #[error("high-level lowering failed with {count} diagnostic(s)")]
    LoweringFailed { count: usize },

    #[error("interpreter trapped: {0}")]
    Runtime(#[from] crate::interp::RuntimeError),
}
