//! Codegen error types covering all compilation failure modes.

/// Errors that can occur during LLVM code generation and compilation.
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    /// Unsupported or unresolvable type during LLVM type mapping.
    #[error("type mapping error: {0}")]
    TypeMapping(String),

    /// Op node not yet implemented in codegen.
    #[error("unsupported op: {0}")]
    UnsupportedOp(String),

    /// No entry point function found in the program.
    #[error("no entry function found")]
    NoEntryFunction,

    /// SIR structure issue preventing compilation (dangling ref, malformed
    /// node) discovered only once lowering reaches the node -- validation
    /// should have caught most of these earlier (`§4.E`), this is the
    /// backstop.
    #[error("invalid SIR: {0}")]
    InvalidSir(String),

    /// Target triple could not be resolved against the backend (`§4.J`).
    #[error("target error: {0}")]
    Target(String),

    /// LLVM API failure (module verification, pass failures).
    #[error("LLVM error: {0}")]
    LlvmError(String),

    /// System linker (cc) subprocess failure.
    #[error("linker failed: {0}")]
    LinkerFailed(String),

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Pre-codegen validation or high-level lowering found diagnostics.
    #[error("check failed: {0}")]
    CheckFailed(#[from] sircc_check::CheckError),

    #[error(transparent)]
    Core(#[from] sircc_core::CoreError),
}
