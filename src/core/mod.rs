//! Core types: value types, cost vectors, errors, diagnostics

pub mod cost;
pub mod diag;
pub mod errors;
pub mod types;

pub use cost::{CostVec, EventRegistry, EventSchema, EventType};
pub use diag::{CollectedDiagnostics, Diagnostic, DiagnosticSink, Severity};
pub use errors::{ProfileError, Result};
pub use types::{
    Addr, CallId, EventTypeId, FileId, FunctionId, InstrId, JumpId, LineId, ObjectId, Position,
    SourceRefId,
};
