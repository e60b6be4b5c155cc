//! The graph store: interning maps and ownership root for all entities
//!
//! Every accessor returns the canonical entity for its identity key,
//! creating it on first use. Inconsistent input (the same logical function
//! under several compression ids, files referenced across objects) converges
//! here because identity is the name tuple, never the dump's numeric ids.

use crate::core::cost::{CostVec, EventRegistry, EventSchema};
use crate::core::types::{
    Addr, CallId, FileId, FunctionId, InstrId, JumpId, LineId, ObjectId, SourceRefId,
};
use crate::data::entities::{
    BinaryObject, Call, Function, FunctionSource, Instr, Jump, SourceFile, SourceLine,
};
use std::collections::HashMap;
use std::ops::Index;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FunctionKey {
    name: Arc<str>,
    file: FileId,
    object: Option<ObjectId>,
}

/// Identity of a jump edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JumpKey {
    pub from: FunctionId,
    pub to: FunctionId,
    pub from_line: u64,
    pub from_addr: Addr,
    pub to_line: u64,
    pub to_addr: Addr,
    pub conditional: bool,
}

#[derive(Debug, Default)]
pub struct ProfileGraph {
    objects: Vec<BinaryObject>,
    object_ids: HashMap<Arc<str>, ObjectId>,
    files: Vec<SourceFile>,
    file_ids: HashMap<Arc<str>, FileId>,
    functions: Vec<Function>,
    function_ids: HashMap<FunctionKey, FunctionId>,
    sources: Vec<FunctionSource>,
    source_ids: HashMap<(FunctionId, FileId), SourceRefId>,
    lines: Vec<SourceLine>,
    line_ids: HashMap<(FunctionId, FileId, u64), LineId>,
    instrs: Vec<Instr>,
    instr_ids: HashMap<(FunctionId, Addr), InstrId>,
    calls: Vec<Call>,
    call_ids: HashMap<(FunctionId, FunctionId), CallId>,
    jumps: Vec<Jump>,
    jump_ids: HashMap<JumpKey, JumpId>,

    /// Event types seen across all loaded parts
    pub events: EventRegistry,
    command: Option<String>,
    call_max: CostVec,
    totals: CostVec,
}

impl ProfileGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical binary object for a name
    pub fn object(&mut self, name: &str) -> ObjectId {
        if let Some(&id) = self.object_ids.get(name) {
            return id;
        }
        let name: Arc<str> = Arc::from(name);
        let id = ObjectId::from_index(self.objects.len());
        self.objects.push(BinaryObject {
            name: name.clone(),
            functions: Vec::new(),
        });
        self.object_ids.insert(name, id);
        id
    }

    /// Canonical source file for a name
    pub fn file(&mut self, name: &str) -> FileId {
        if let Some(&id) = self.file_ids.get(name) {
            return id;
        }
        let name: Arc<str> = Arc::from(name);
        let id = FileId::from_index(self.files.len());
        self.files.push(SourceFile {
            name: name.clone(),
            functions: Vec::new(),
            lines: Vec::new(),
        });
        self.file_ids.insert(name, id);
        id
    }

    /// Canonical function for a (name, file, object) identity
    pub fn function(&mut self, name: &str, file: FileId, object: Option<ObjectId>) -> FunctionId {
        let key = FunctionKey {
            name: Arc::from(name),
            file,
            object,
        };
        if let Some(&id) = self.function_ids.get(&key) {
            return id;
        }
        let id = FunctionId::from_index(self.functions.len());
        self.functions.push(Function {
            name: key.name.clone(),
            file,
            object,
            sources: Vec::new(),
            lines: Vec::new(),
            instrs: Vec::new(),
            calls: Vec::new(),
            jumps: Vec::new(),
        });
        self.files[file.index()].functions.push(id);
        if let Some(object) = object {
            self.objects[object.index()].functions.push(id);
        }
        self.function_ids.insert(key, id);
        id
    }

    /// Bind the object of a function created without one. The first binding
    /// wins; `Err` carries the already-bound object on mismatch.
    pub(crate) fn bind_function_object(
        &mut self,
        function: FunctionId,
        object: ObjectId,
    ) -> Result<(), ObjectId> {
        match self.functions[function.index()].object {
            None => {
                self.functions[function.index()].object = Some(object);
                self.objects[object.index()].functions.push(function);
                let entry = &self.functions[function.index()];
                let alias = FunctionKey {
                    name: entry.name.clone(),
                    file: entry.file,
                    object: Some(object),
                };
                self.function_ids.entry(alias).or_insert(function);
                Ok(())
            }
            Some(existing) if existing == object => Ok(()),
            Some(existing) => Err(existing),
        }
    }

    /// Per-file projection of a function, created lazily
    pub fn source(&mut self, function: FunctionId, file: FileId) -> SourceRefId {
        if let Some(&id) = self.source_ids.get(&(function, file)) {
            return id;
        }
        let id = SourceRefId::from_index(self.sources.len());
        self.sources.push(FunctionSource { function, file });
        self.functions[function.index()].sources.push(id);
        self.source_ids.insert((function, file), id);
        id
    }

    /// Source line entity of a function
    pub fn line(&mut self, function: FunctionId, file: FileId, line: u64) -> LineId {
        if let Some(&id) = self.line_ids.get(&(function, file, line)) {
            return id;
        }
        let id = LineId::from_index(self.lines.len());
        self.lines.push(SourceLine {
            function,
            file,
            line,
        });
        self.functions[function.index()].lines.push(id);
        self.files[file.index()].lines.push(id);
        self.line_ids.insert((function, file, line), id);
        id
    }

    /// Instruction entity of a function
    pub fn instr(&mut self, function: FunctionId, addr: Addr) -> InstrId {
        if let Some(&id) = self.instr_ids.get(&(function, addr)) {
            return id;
        }
        let id = InstrId::from_index(self.instrs.len());
        self.instrs.push(Instr {
            function,
            addr,
            line: None,
        });
        self.functions[function.index()].instrs.push(id);
        self.instr_ids.insert((function, addr), id);
        id
    }

    pub(crate) fn link_instr_line(&mut self, instr: InstrId, line: LineId) {
        self.instrs[instr.index()].line = Some(line);
    }

    /// Call edge between two functions
    pub fn call(&mut self, caller: FunctionId, callee: FunctionId) -> CallId {
        if let Some(&id) = self.call_ids.get(&(caller, callee)) {
            return id;
        }
        let id = CallId::from_index(self.calls.len());
        self.calls.push(Call { caller, callee });
        self.functions[caller.index()].calls.push(id);
        self.call_ids.insert((caller, callee), id);
        id
    }

    /// Jump edge for an identity key
    pub fn jump(&mut self, key: JumpKey, from_source: SourceRefId, to_source: SourceRefId) -> JumpId {
        if let Some(&id) = self.jump_ids.get(&key) {
            return id;
        }
        let id = JumpId::from_index(self.jumps.len());
        self.jumps.push(Jump {
            from: key.from,
            to: key.to,
            from_source,
            to_source,
            from_line: key.from_line,
            from_addr: key.from_addr,
            to_line: key.to_line,
            to_addr: key.to_addr,
            conditional: key.conditional,
        });
        self.functions[key.from.index()].jumps.push(id);
        self.jump_ids.insert(key, id);
        id
    }

    // Non-creating lookups

    pub fn find_object(&self, name: &str) -> Option<ObjectId> {
        self.object_ids.get(name).copied()
    }

    pub fn find_file(&self, name: &str) -> Option<FileId> {
        self.file_ids.get(name).copied()
    }

    pub fn find_function(
        &self,
        name: &str,
        file: FileId,
        object: Option<ObjectId>,
    ) -> Option<FunctionId> {
        let key = FunctionKey {
            name: Arc::from(name),
            file,
            object,
        };
        self.function_ids.get(&key).copied()
    }

    pub fn find_line(&self, function: FunctionId, file: FileId, line: u64) -> Option<LineId> {
        self.line_ids.get(&(function, file, line)).copied()
    }

    pub fn find_instr(&self, function: FunctionId, addr: Addr) -> Option<InstrId> {
        self.instr_ids.get(&(function, addr)).copied()
    }

    pub fn find_call(&self, caller: FunctionId, callee: FunctionId) -> Option<CallId> {
        self.call_ids.get(&(caller, callee)).copied()
    }

    // Arena views

    pub fn objects(&self) -> &[BinaryObject] {
        &self.objects
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn lines(&self) -> &[SourceLine] {
        &self.lines
    }

    pub fn instrs(&self) -> &[Instr] {
        &self.instrs
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn jumps(&self) -> &[Jump] {
        &self.jumps
    }

    // Graph-wide aggregates

    /// Profiled command line, from the first `cmd:` header seen
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    pub(crate) fn set_command(&mut self, command: String) {
        self.command = Some(command);
    }

    /// Pointwise maximum over all attributed call costs
    pub fn call_max(&self) -> &CostVec {
        &self.call_max
    }

    pub(crate) fn merge_call_max(&mut self, cost: &CostVec) {
        self.call_max.max_of(cost);
    }

    /// Pointwise sum over all attributed self costs
    pub fn totals(&self) -> &CostVec {
        &self.totals
    }

    pub(crate) fn add_totals(&mut self, schema: &EventSchema, values: &[u64]) {
        self.totals.add_mapped(schema, values);
    }
}

impl Index<ObjectId> for ProfileGraph {
    type Output = BinaryObject;
    fn index(&self, id: ObjectId) -> &BinaryObject {
        &self.objects[id.index()]
    }
}

impl Index<FileId> for ProfileGraph {
    type Output = SourceFile;
    fn index(&self, id: FileId) -> &SourceFile {
        &self.files[id.index()]
    }
}

impl Index<FunctionId> for ProfileGraph {
    type Output = Function;
    fn index(&self, id: FunctionId) -> &Function {
        &self.functions[id.index()]
    }
}

impl Index<SourceRefId> for ProfileGraph {
    type Output = FunctionSource;
    fn index(&self, id: SourceRefId) -> &FunctionSource {
        &self.sources[id.index()]
    }
}

impl Index<LineId> for ProfileGraph {
    type Output = SourceLine;
    fn index(&self, id: LineId) -> &SourceLine {
        &self.lines[id.index()]
    }
}

impl Index<InstrId> for ProfileGraph {
    type Output = Instr;
    fn index(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }
}

impl Index<CallId> for ProfileGraph {
    type Output = Call;
    fn index(&self, id: CallId) -> &Call {
        &self.calls[id.index()]
    }
}

impl Index<JumpId> for ProfileGraph {
    type Output = Jump;
    fn index(&self, id: JumpId) -> &Jump {
        &self.jumps[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_canonical() {
        let mut graph = ProfileGraph::new();
        let a = graph.file("main.c");
        let b = graph.file("main.c");
        assert_eq!(a, b);
        assert_eq!(graph.files().len(), 1);

        let obj = graph.object("libA");
        let f1 = graph.function("f", a, Some(obj));
        let f2 = graph.function("f", a, Some(obj));
        assert_eq!(f1, f2);
        assert_eq!(graph[obj].functions, vec![f1]);
    }

    #[test]
    fn test_function_identity_is_a_triple() {
        let mut graph = ProfileGraph::new();
        let file_a = graph.file("a.c");
        let file_b = graph.file("b.c");
        let obj = graph.object("bin");
        let f1 = graph.function("f", file_a, Some(obj));
        let f2 = graph.function("f", file_b, Some(obj));
        assert_ne!(f1, f2);
    }

    #[test]
    fn test_late_object_binding() {
        let mut graph = ProfileGraph::new();
        let file = graph.file("a.c");
        let f = graph.function("f", file, None);
        let obj = graph.object("libA");
        assert!(graph.bind_function_object(f, obj).is_ok());
        assert_eq!(graph[f].object, Some(obj));
        // the alias key makes later direct lookups converge
        assert_eq!(graph.find_function("f", file, Some(obj)), Some(f));

        // a second, different binding is refused
        let other = graph.object("libB");
        assert_eq!(graph.bind_function_object(f, other), Err(obj));
        assert_eq!(graph[f].object, Some(obj));
    }

    #[test]
    fn test_line_and_instr_entities() {
        let mut graph = ProfileGraph::new();
        let file = graph.file("a.c");
        let f = graph.function("f", file, None);
        let l = graph.line(f, file, 10);
        assert_eq!(graph.line(f, file, 10), l);
        let i = graph.instr(f, Addr(0x1000));
        graph.link_instr_line(i, l);
        assert_eq!(graph[i].line, Some(l));
        assert_eq!(graph[f].lines.len(), 1);
        assert_eq!(graph[f].instrs.len(), 1);
    }
}
