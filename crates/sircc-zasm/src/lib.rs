//! Lowers validated SIR programs to `zasm-v1.1`, a retargetable assembly IR
//! for a register-starved two-register (`HL`/`DE`) CPU backend.
//!
//! # Modules
//!
//! - [`model`] -- `zasm-v1.1` record and operand types, plus source-map
//!   entries correlating emitted records back to their originating SIR node.
//! - [`regs`] -- the `HL`/`DE` value cache used during statement lowering.
//! - [`lower`] -- the driver: finds `zir_main`, walks its CFG, and lowers
//!   each block's statements and terminator.
//! - [`error`] -- error type for lowering failures.

pub mod error;
pub mod lower;
pub mod model;
pub mod regs;

pub use error::ZasmError;
pub use lower::{lower_program, ZasmOptions};
pub use model::{SourceMapEntry, ZasmModule, ZasmOperand, ZasmRecord, ZasmRecordKind};
