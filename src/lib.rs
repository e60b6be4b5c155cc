//! Loader core for Callgrind/Cachegrind profile data files
//!
//! Ingests a textual profile dump and materialises it into an in-memory cost
//! graph linking binary objects, source files, functions, lines, and
//! instructions, with per-edge call and jump costs keyed by the event-vector
//! schema declared in the dump's own header.
//!
//! The graph store ([`ProfileGraph`]) owns all entities and interns them by
//! name tuple; a [`Part`] holds the per-dump cost arena; the [`Loader`]
//! decodes one dump into both.

// Core types
pub mod core;

// Internal implementation modules
pub(crate) mod data;
pub(crate) mod loader;
pub(crate) mod parser;
pub(crate) mod reader;

// Re-export the public API
pub use crate::core::cost::{CostVec, EventRegistry, EventSchema, EventType};
pub use crate::core::diag::{CollectedDiagnostics, Diagnostic, DiagnosticSink, Severity};
pub use crate::core::errors::{ProfileError, Result};
pub use crate::core::types::{
    Addr, CallId, EventTypeId, FileId, FunctionId, InstrId, JumpId, LineId, ObjectId, Position,
    SourceRefId,
};
pub use data::entities::{
    BinaryObject, Call, Function, FunctionSource, Instr, Jump, SourceFile, SourceLine,
};
pub use data::graph::{JumpKey, ProfileGraph};
pub use data::part::{CallCost, JumpCost, Part, PartMeta};
pub use loader::Loader;
pub use parser::compress::NameRef;
pub use parser::position::PositionColumns;
pub use reader::{detect, DumpFile, Lines};
