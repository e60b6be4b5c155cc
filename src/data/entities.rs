//! Entities of the cost graph
//!
//! All entities are owned by the graph store and referenced through typed
//! handles; no entity points back at its owner.

use crate::core::types::{
    Addr, CallId, FileId, FunctionId, InstrId, JumpId, LineId, ObjectId, SourceRefId,
};
use std::sync::Arc;

/// Binary object (shared library or executable)
#[derive(Debug)]
pub struct BinaryObject {
    pub name: Arc<str>,
    /// Functions attributed to this object
    pub functions: Vec<FunctionId>,
}

/// Source file
#[derive(Debug)]
pub struct SourceFile {
    pub name: Arc<str>,
    pub functions: Vec<FunctionId>,
    pub lines: Vec<LineId>,
}

/// Function; identity is the (name, file, object) triple
#[derive(Debug)]
pub struct Function {
    pub name: Arc<str>,
    pub file: FileId,
    /// Unset when the dump referenced the function before naming its object;
    /// the first later binding wins
    pub object: Option<ObjectId>,
    pub sources: Vec<SourceRefId>,
    pub lines: Vec<LineId>,
    pub instrs: Vec<InstrId>,
    /// Outgoing call edges
    pub calls: Vec<CallId>,
    /// Outgoing jumps
    pub jumps: Vec<JumpId>,
}

/// Per-file projection of a function; one function may span several files
#[derive(Debug)]
pub struct FunctionSource {
    pub function: FunctionId,
    pub file: FileId,
}

/// One source line of a function
#[derive(Debug)]
pub struct SourceLine {
    pub function: FunctionId,
    pub file: FileId,
    pub line: u64,
}

/// One machine instruction of a function
#[derive(Debug)]
pub struct Instr {
    pub function: FunctionId,
    pub addr: Addr,
    /// Source line this instruction maps to, when line info is present
    pub line: Option<LineId>,
}

/// Static call edge between two functions
#[derive(Debug)]
pub struct Call {
    pub caller: FunctionId,
    pub callee: FunctionId,
}

/// Control-flow transfer between two positions
#[derive(Debug)]
pub struct Jump {
    pub from: FunctionId,
    pub to: FunctionId,
    pub from_source: SourceRefId,
    pub to_source: SourceRefId,
    pub from_line: u64,
    pub from_addr: Addr,
    pub to_line: u64,
    pub to_addr: Addr,
    pub conditional: bool,
}
