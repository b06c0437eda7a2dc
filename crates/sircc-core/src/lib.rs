//! SIR data model: the JSON-Lines parser & arena, program tables, the type
//! system & layout engine, and the diagnostic bus (components A-D).

pub mod arena;
pub mod diag;
pub mod error;
pub mod id;
pub mod node;
pub mod tables;
pub mod types;

pub use arena::{Arena, JsonError, JsonValue};
pub use diag::{About, AboutKind, DiagMode, Diagnostic, DiagnosticBus};
pub use error::CoreError;
pub use id::{NodeId, SymbolId, TypeId};
pub use node::{NodeRecord, Ref, SymbolRecord};
pub use tables::{build_program_tables, Endian, FeatureFlags, ProgramTables, TargetInfo, TargetOverrides};
pub use types::{
    layout_of, roundup, sum_payload_offset, Layout, PrimKind, SirType, StructField, SumVariant,
    TypeTable,
};
