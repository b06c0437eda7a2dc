//! Error type for ZASM lowering failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZasmError {
    #[error("no function named zir_main")]
    NoEntryFunction,
    #[error("malformed SIR node: {0}")]
    InvalidSir(String),
    #[error("unsupported op for zasm lowering: {0}")]
    UnsupportedOp(String),
    #[error(transparent)]
    Core(#[from] sircc_core::CoreError),
}
