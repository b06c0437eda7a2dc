//! Semantic evaluator for SIR programs: a CFG-walking state machine that
//! runs a function to completion (or a trap) without going through native
//! code generation (`§1` "non-normative reference semantics").
//!
//! # Architecture
//!
//! - [`Interpreter`] walks one [`ProgramTables`](sircc_core::ProgramTables)
//!   function's blocks statement by statement, maintaining a call stack,
//!   flat byte memory for `alloca`/`load`/`store`, and an optional execution
//!   [`Recorder`].
//! - [`ExecutionState`] tracks the lifecycle: `Ready -> Running ->
//!   (Paused | Completed | Error)`.
//! - [`CallFrame`] is one function activation: current block, statement
//!   index, and memoized node values, suspended on `pending_call_node` while
//!   a nested `call` runs.
//! - [`Value`] is the runtime representation of a SIR scalar, pointer, or
//!   aggregate.
//! - [`RuntimeError`] captures trap conditions (divide-by-zero, misaligned
//!   access, out-of-bounds, recursion limit) tagged with the node that
//!   raised them.
//! - [`Recorder`] accumulates `cov_step`/`trace_step` records (`§8`
//!   scenarios 3-4).
//!
//! # Usage
//!
//! ```ignore
//! let mut interp = Interpreter::new(&tables, &node_lines, InterpreterConfig::default());
//! interp.start(fn_node, vec![Value::I32(3), Value::I32(5)]);
//! match interp.run() {
//!     ExecutionState::Completed { result } => { /* use result */ }
//!     ExecutionState::Error { error } => { /* report trap */ }
//!     _ => {}
//! }
//! ```

pub mod error;
pub mod eval;
pub mod state;
pub mod trace;
pub mod value;

pub use error::RuntimeError;
pub use state::{exit_code_for, CallFrame, ExecutionState, Interpreter, InterpreterConfig};
pub use trace::{CovStep, Recorder, TraceEntry, TraceStep, ValueSnapshot};
pub use value::Value;
