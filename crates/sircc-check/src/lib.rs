//! Validation, high-level lowering, and the semantic evaluator for SIR
//! programs.
//!
//! This crate provides the pre-codegen half of the toolchain: it checks a
//! parsed [`ProgramTables`](sircc_core::ProgramTables) for well-formedness,
//! rewrites high-level `sem.*` forms into their lowered equivalents, and
//! executes SIR directly (without going through native code generation) for
//! testing, coverage, and tracing.
//!
//! # Modules
//!
//! - [`validator`] -- feature gating, CFG well-formedness, branch/switch
//!   arity, inter-feature dependencies.
//! - [`lower_hl`] -- `sem.if`/`sem.and_sc`/`sem.or_sc` rewriting and
//!   canonical SIR re-emission.
//! - [`interp`] -- the semantic evaluator (`Interpreter`, `Value`,
//!   `RuntimeError`, execution trace/coverage).
//! - [`error`] -- Rust-facing error type for this crate's driver functions.

pub mod error;
pub mod interp;
pub mod lower_hl;
pub mod validator;

pub use error::CheckError;
pub use interp::{ExecutionState, Interpreter, InterpreterConfig, RuntimeError, Value};
pub use lower_hl::{emit_canonical, lower_high_level};
pub use validator::validate;

use sircc_core::ProgramTables;

/// Runs the validator, then high-level lowering, over `tables`. Mirrors the
/// driver's own sequencing (`§4.E`: "Failure signals a code and halts
/// lowering"): lowering only runs if validation produced no diagnostics.
pub fn check_and_lower(tables: &mut ProgramTables) -> Result<(), CheckError> {
    validate(tables).map_err(|_| CheckError::ValidationFailed {
        count: tables.bus.diagnostics().len(),
    })?;
    lower_high_level(tables).map_err(|_| CheckError::LoweringFailed {
        count: tables.bus.diagnostics().len(),
    })
}
