//! The dump decoder: line dispatch, running cursors, and cost attribution
//!
//! Lines are classified by their first non-blank character. Header lines
//! mutate the loader configuration (event schema, position columns, part
//! metadata); entity-binding lines move the object/file/function cursors;
//! position lines are decoded against the running cursor and then attributed
//! according to the pending record type armed by the previous `calls=`,
//! `jump=`, or `jcnd=` line.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::core::cost::{CostVec, EventSchema};
use crate::core::diag::{Diagnostic, DiagnosticSink, Severity};
use crate::core::errors::{ProfileError, Result};
use crate::core::types::{Addr, FileId, FunctionId, ObjectId, Position};
use crate::data::graph::{JumpKey, ProfileGraph};
use crate::data::part::Part;
use crate::parser::compress::{parse_name_ref, NameRef, NameTables};
use crate::parser::position::{parse_position, ParsedPosition, PositionColumns};
use crate::parser::scan::Scanner;
use crate::reader::{DumpFile, Lines};

/// Name substituted when an object, file, or function is missing
const UNKNOWN: &str = "???";

/// What the next position line should be recorded as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordKind {
    SelfCost,
    CallCost,
    BoringJump,
    CondJump,
}

/// Streaming loader for one dump part.
///
/// One loader instance decodes one part; loads of different parts use
/// independent instances, each with its own compression tables and cursors.
pub struct Loader<'a> {
    graph: &'a mut ProfileGraph,
    part: &'a mut Part,
    diags: Option<&'a mut dyn DiagnosticSink>,
    progress: Option<Box<dyn FnMut(u32) + 'a>>,
    cancel: Option<Arc<AtomicBool>>,

    dump_name: String,
    line_no: u64,

    columns: PositionColumns,
    next_record: RecordKind,
    cursor: Position,
    target_pos: Position,
    names: NameTables,

    cur_object: Option<ObjectId>,
    cur_file: Option<FileId>,
    cur_function: Option<FunctionId>,

    called_object: Option<ObjectId>,
    called_file: Option<FileId>,
    called_function: Option<FunctionId>,
    call_count: u64,

    jump_to_file: Option<FileId>,
    jump_to_function: Option<FunctionId>,
    jumps_followed: u64,
    jumps_executed: u64,

    cost_scratch: Vec<u64>,
    last_progress: u32,
}

impl<'a> Loader<'a> {
    pub fn new(graph: &'a mut ProfileGraph, part: &'a mut Part) -> Self {
        let dump_name = part.name().to_string();
        Self {
            graph,
            part,
            diags: None,
            progress: None,
            cancel: None,
            dump_name,
            line_no: 0,
            columns: PositionColumns::default(),
            next_record: RecordKind::SelfCost,
            cursor: Position::default(),
            target_pos: Position::default(),
            names: NameTables::new(),
            cur_object: None,
            cur_file: None,
            cur_function: None,
            called_object: None,
            called_file: None,
            called_function: None,
            call_count: 0,
            jump_to_file: None,
            jump_to_function: None,
            jumps_followed: 0,
            jumps_executed: 0,
            cost_scratch: Vec::new(),
            last_progress: u32::MAX,
        }
    }

    /// Receive warnings and recoverable errors; the sink must not re-enter
    /// the loader
    pub fn with_diagnostics(mut self, sink: &'a mut dyn DiagnosticSink) -> Self {
        self.diags = Some(sink);
        self
    }

    /// Called with the integer percent of bytes consumed whenever it changes
    pub fn with_progress(mut self, callback: impl FnMut(u32) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Cooperative cancellation, checked between lines
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn load_file(mut self, dump: &DumpFile) -> Result<()> {
        self.dump_name = dump.name();
        self.run(dump.bytes())
    }

    pub fn load_bytes(mut self, name: &str, bytes: &[u8]) -> Result<()> {
        self.dump_name = name.to_string();
        self.run(bytes)
    }

    fn run(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("loading {}", self.dump_name);
        self.emit_progress(0);
        let total = bytes.len();
        let mut lines = Lines::new(bytes);

        while let Some(raw) = lines.next() {
            self.line_no += 1;
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(ProfileError::Cancelled.into());
                }
            }

            let mut s = Scanner::new(raw);
            let Some(first) = s.first() else { continue };
            if first.is_ascii_whitespace() {
                s.strip_spaces();
                if s.is_empty() {
                    continue;
                }
            }
            let Some(c) = s.first() else { continue };

            if c <= b'9' {
                match parse_position(&mut s, &self.cursor, self.columns) {
                    Some(parsed) => {
                        if parsed.line_underflow {
                            self.warn_at("negative line number in position, clamped to 0".into());
                        }
                        self.cursor = parsed.pos;
                        self.record_costs(&mut s)?;
                    }
                    None => self.warn_invalid(raw),
                }
                continue;
            }

            s.strip_first();
            // in order of probability
            let handled = match c {
                b'f' => {
                    if s.strip_prefix("l=") || s.strip_prefix("i=") || s.strip_prefix("e=") {
                        self.set_file(&mut s);
                        true
                    } else if s.strip_prefix("n=") {
                        self.set_function(&mut s);
                        let pct = percent(lines.offset(), total);
                        self.emit_progress(pct);
                        true
                    } else {
                        false
                    }
                }
                b'c' => self.key_c(&mut s),
                b'j' => self.key_j(&mut s),
                b'o' => {
                    if s.strip_prefix("b=") {
                        self.set_object(&mut s);
                        true
                    } else {
                        false
                    }
                }
                b'#' => true,
                b't' => self.key_t(&mut s),
                b'd' => self.key_d(&mut s),
                b'e' => self.key_e(&mut s),
                b'p' => self.key_p(&mut s),
                b'v' => {
                    if s.strip_prefix("ersion:") {
                        s.trim();
                        self.part.meta.version = Some(s.as_str().into_owned());
                        true
                    } else {
                        false
                    }
                }
                b's' => self.key_s(&mut s)?,
                b'r' => self.key_r(&mut s),
                _ => false,
            };
            if !handled {
                self.warn_invalid(raw);
            }
        }

        self.emit_progress(100);
        self.part.seal();
        debug!("loaded {} ({} lines)", self.dump_name, self.line_no);
        Ok(())
    }

    // Keyword dispatch, one handler per leading character

    fn key_c(&mut self, s: &mut Scanner<'_>) -> bool {
        if s.strip_prefix("ob=") {
            self.set_called_object(s);
        } else if s.strip_prefix("fi=") {
            self.set_called_file(s);
        } else if s.strip_prefix("fn=") {
            self.set_called_function(s);
        } else if s.strip_prefix("alls=") {
            self.call_count = s.strip_uint().unwrap_or(0);
            self.next_record = RecordKind::CallCost;
        } else if s.strip_prefix("md:") {
            s.trim();
            let command = s.as_str().into_owned();
            let previous = self.graph.command().map(str::to_string);
            if let Some(previous) = previous {
                if previous != command {
                    self.warn_at(format!("redefined command, was '{previous}'"));
                }
            }
            self.graph.set_command(command);
        } else if s.strip_prefix("reator:") {
            s.trim();
            self.part.meta.creator = Some(s.as_str().into_owned());
        } else {
            return false;
        }
        true
    }

    fn key_j(&mut self, s: &mut Scanner<'_>) -> bool {
        if s.strip_prefix("cnd=") {
            match self.parse_cond_jump(s) {
                Some((followed, executed, parsed)) => {
                    if parsed.line_underflow {
                        self.warn_at("negative line number in jump target, clamped to 0".into());
                    }
                    self.jumps_followed = followed;
                    self.jumps_executed = executed;
                    self.target_pos = parsed.pos;
                    self.next_record = RecordKind::CondJump;
                }
                None => self.error_at("invalid jcnd line".into()),
            }
        } else if s.strip_prefix("ump=") {
            match self.parse_plain_jump(s) {
                Some((executed, parsed)) => {
                    if parsed.line_underflow {
                        self.warn_at("negative line number in jump target, clamped to 0".into());
                    }
                    self.jumps_executed = executed;
                    self.target_pos = parsed.pos;
                    self.next_record = RecordKind::BoringJump;
                }
                None => self.error_at("invalid jump line".into()),
            }
        } else if s.strip_prefix("fi=") {
            s.trim();
            let text = s.as_str();
            self.jump_to_file = self.resolve_file(text.as_ref());
        } else if s.strip_prefix("fn=") {
            let file = match self.jump_to_file.or(self.cur_file) {
                Some(file) => file,
                None => self.graph.file(UNKNOWN),
            };
            s.trim();
            let text = s.as_str();
            self.jump_to_function = self.resolve_function(text.as_ref(), file, self.cur_object);
        } else {
            return false;
        }
        true
    }

    fn parse_cond_jump(&self, s: &mut Scanner<'_>) -> Option<(u64, u64, ParsedPosition)> {
        let followed = s.strip_uint()?;
        if !s.strip_prefix("/") {
            return None;
        }
        let executed = s.strip_uint()?;
        let parsed = parse_position(s, &self.cursor, self.columns)?;
        Some((followed, executed, parsed))
    }

    fn parse_plain_jump(&self, s: &mut Scanner<'_>) -> Option<(u64, ParsedPosition)> {
        let executed = s.strip_uint()?;
        let parsed = parse_position(s, &self.cursor, self.columns)?;
        Some((executed, parsed))
    }

    fn key_t(&mut self, s: &mut Scanner<'_>) -> bool {
        if s.strip_prefix("otals:") {
            // redundant with the summary, ignored
        } else if s.strip_prefix("hread:") {
            s.trim();
            self.part.meta.thread = s.as_str().parse().ok();
        } else if s.strip_prefix("imeframe (BB):") {
            s.trim();
            self.part.meta.timeframe = Some(s.as_str().into_owned());
        } else {
            return false;
        }
        true
    }

    fn key_d(&mut self, s: &mut Scanner<'_>) -> bool {
        if !s.strip_prefix("esc:") {
            return false;
        }
        s.trim();
        if s.strip_prefix("Trigger:") {
            s.trim();
            self.part.meta.trigger = Some(s.as_str().into_owned());
        }
        true
    }

    fn key_e(&mut self, s: &mut Scanner<'_>) -> bool {
        if s.strip_prefix("vents:") {
            s.trim();
            let text = s.as_str();
            let schema = EventSchema::from_names(&mut self.graph.events, text.split_whitespace());
            self.part.set_schema(schema);
            return true;
        }
        if !s.strip_prefix("vent:") {
            return false;
        }
        s.trim();
        let Some(name) = s.strip_name() else {
            self.error_at("invalid event specification".into());
            return true;
        };
        s.strip_spaces();
        let mut formula = None;
        match s.first() {
            Some(b'=') => {
                s.strip_first();
                let text = String::from_utf8_lossy(s.strip_until(b':'));
                let text = text.trim();
                if !text.is_empty() {
                    formula = Some(text.to_string());
                }
            }
            Some(b':') => {
                s.strip_first();
            }
            _ => {}
        }
        s.trim();
        let long_name = if s.is_empty() {
            name.to_string()
        } else {
            s.as_str().into_owned()
        };
        self.graph.events.register(name, &long_name, formula.as_deref());
        true
    }

    fn key_p(&mut self, s: &mut Scanner<'_>) -> bool {
        if s.strip_prefix("art:") {
            s.trim();
            self.part.meta.part_number = s.as_str().parse().ok();
        } else if s.strip_prefix("id:") {
            s.trim();
            self.part.meta.pid = s.as_str().parse().ok();
        } else if s.strip_prefix("ositions:") {
            let text = s.as_str();
            self.columns = PositionColumns {
                has_instr: text.contains("instr"),
                has_line: text.contains("line"),
            };
        } else {
            return false;
        }
        true
    }

    fn key_s(&mut self, s: &mut Scanner<'_>) -> Result<bool> {
        if !s.strip_prefix("ummary:") {
            return Ok(false);
        }
        if self.part.schema().is_none() {
            self.error_at("summary before an 'events:' header".into());
            return Err(ProfileError::MissingEventHeader {
                dump: self.dump_name.clone(),
                line: self.line_no,
            }
            .into());
        }
        s.strip_spaces();
        self.read_cost_vector(s);
        let mut totals = CostVec::new();
        if let Some(schema) = self.part.schema() {
            totals.add_mapped(schema, &self.cost_scratch);
        }
        self.part.set_summary(totals);
        Ok(true)
    }

    fn key_r(&mut self, s: &mut Scanner<'_>) -> bool {
        if !s.strip_prefix("calls=") {
            return false;
        }
        // deprecated alias for calls=
        self.warn_at("'rcalls=' is deprecated, treating as 'calls='".into());
        self.call_count = s.strip_uint().unwrap_or(0);
        self.next_record = RecordKind::CallCost;
        true
    }

    // Cursor setters

    fn set_object(&mut self, s: &mut Scanner<'_>) {
        s.trim();
        let text = s.as_str();
        let id = match self.resolve_object(text.as_ref()) {
            Some(id) => id,
            None => {
                self.warn_at(format!("invalid object spec, using '{UNKNOWN}'"));
                self.graph.object(UNKNOWN)
            }
        };
        self.cur_object = Some(id);
        // a new object invalidates the function cursor
        self.cur_function = None;
    }

    fn set_file(&mut self, s: &mut Scanner<'_>) {
        s.trim();
        let text = s.as_str();
        let id = match self.resolve_file(text.as_ref()) {
            Some(id) => id,
            None => {
                self.warn_at(format!("invalid file spec, using '{UNKNOWN}'"));
                self.graph.file(UNKNOWN)
            }
        };
        self.cur_file = Some(id);
    }

    fn set_function(&mut self, s: &mut Scanner<'_>) {
        let file = self.ensure_file();
        let object = self.ensure_object();
        s.trim();
        let text = s.as_str();
        let id = match self.resolve_function(text.as_ref(), file, Some(object)) {
            Some(id) => id,
            None => {
                self.warn_at(format!("invalid function spec, using '{UNKNOWN}'"));
                let dummy_file = self.graph.file(UNKNOWN);
                self.graph.function(UNKNOWN, dummy_file, None)
            }
        };
        self.cur_function = Some(id);
    }

    fn set_called_object(&mut self, s: &mut Scanner<'_>) {
        s.trim();
        let text = s.as_str();
        let id = match self.resolve_object(text.as_ref()) {
            Some(id) => id,
            None => {
                self.warn_at(format!("invalid called object spec, using '{UNKNOWN}'"));
                self.graph.object(UNKNOWN)
            }
        };
        self.called_object = Some(id);
    }

    fn set_called_file(&mut self, s: &mut Scanner<'_>) {
        s.trim();
        let text = s.as_str();
        let id = match self.resolve_file(text.as_ref()) {
            Some(id) => id,
            None => {
                self.warn_at(format!("invalid called file spec, using '{UNKNOWN}'"));
                self.graph.file(UNKNOWN)
            }
        };
        self.called_file = Some(id);
    }

    fn set_called_function(&mut self, s: &mut Scanner<'_>) {
        // unset call target object/file default to the current ones
        if self.called_object.is_none() {
            self.called_object = self.cur_object;
        }
        let file = match self.called_file.or(self.cur_file) {
            Some(file) => file,
            None => self.graph.file(UNKNOWN),
        };
        self.called_file = Some(file);
        s.trim();
        let text = s.as_str();
        let id = match self.resolve_function(text.as_ref(), file, self.called_object) {
            Some(id) => id,
            None => {
                self.warn_at(format!("invalid called function spec, using '{UNKNOWN}'"));
                let dummy_file = self.graph.file(UNKNOWN);
                self.graph.function(UNKNOWN, dummy_file, None)
            }
        };
        self.called_function = Some(id);
    }

    // Dummy synthesis at the attribution site

    fn ensure_object(&mut self) -> ObjectId {
        if let Some(id) = self.cur_object {
            return id;
        }
        self.warn_at(format!("object name not set, using '{UNKNOWN}'"));
        let id = self.graph.object(UNKNOWN);
        self.cur_object = Some(id);
        id
    }

    fn ensure_file(&mut self) -> FileId {
        if let Some(id) = self.cur_file {
            return id;
        }
        self.warn_at(format!("source file name not set, using '{UNKNOWN}'"));
        let id = self.graph.file(UNKNOWN);
        self.cur_file = Some(id);
        id
    }

    fn ensure_function(&mut self) -> FunctionId {
        if let Some(id) = self.cur_function {
            return id;
        }
        let file = self.ensure_file();
        let object = self.ensure_object();
        self.warn_at(format!("function name not set, using '{UNKNOWN}'"));
        let id = self.graph.function(UNKNOWN, file, Some(object));
        self.cur_function = Some(id);
        id
    }

    // Compressed-name resolution

    fn resolve_object(&mut self, text: &str) -> Option<ObjectId> {
        match parse_name_ref(text) {
            NameRef::Plain(name) => Some(self.graph.object(name)),
            NameRef::Bind(index, name) => {
                let id = self.graph.object(name);
                self.names.objects.bind(index, id);
                Some(id)
            }
            NameRef::Ref(index) => {
                let found = self.names.objects.lookup(index);
                if found.is_none() {
                    self.error_at(format!("invalid compressed object index {index}"));
                }
                found
            }
            NameRef::Invalid => {
                self.error_at(format!("invalid compressed object spec '{text}'"));
                None
            }
        }
    }

    fn resolve_file(&mut self, text: &str) -> Option<FileId> {
        match parse_name_ref(text) {
            NameRef::Plain(name) => Some(self.graph.file(name)),
            NameRef::Bind(index, name) => {
                let id = self.graph.file(name);
                self.names.files.bind(index, id);
                Some(id)
            }
            NameRef::Ref(index) => {
                let found = self.names.files.lookup(index);
                if found.is_none() {
                    self.error_at(format!("invalid compressed file index {index}"));
                }
                found
            }
            NameRef::Invalid => {
                self.error_at(format!("invalid compressed file spec '{text}'"));
                None
            }
        }
    }

    fn resolve_function(
        &mut self,
        text: &str,
        file: FileId,
        object: Option<ObjectId>,
    ) -> Option<FunctionId> {
        match parse_name_ref(text) {
            NameRef::Plain(name) => Some(self.graph.function(name, file, object)),
            NameRef::Bind(index, name) => {
                let id = self.graph.function(name, file, object);
                self.names.functions.bind(index, id);
                Some(id)
            }
            NameRef::Ref(index) => {
                let Some(id) = self.names.functions.lookup(index) else {
                    self.error_at(format!("invalid compressed function index {index}"));
                    return None;
                };
                if let Some(object) = object {
                    if let Err(existing) = self.graph.bind_function_object(id, object) {
                        let name = self.graph[id].name.clone();
                        let bound = self.graph[existing].name.clone();
                        let given = self.graph[object].name.clone();
                        self.warn_at(format!(
                            "object mismatch for function '{name}': bound to '{bound}', given '{given}'"
                        ));
                    }
                }
                Some(id)
            }
            NameRef::Invalid => {
                self.error_at(format!("invalid compressed function spec '{text}'"));
                None
            }
        }
    }

    // Cost attribution

    fn read_cost_vector(&mut self, s: &mut Scanner<'_>) {
        let expected = self.part.schema().map_or(0, EventSchema::len);
        self.cost_scratch.clear();
        while self.cost_scratch.len() < expected {
            match s.strip_uint() {
                Some(value) => self.cost_scratch.push(value),
                None => break,
            }
        }
        // trailing zero columns may be omitted
        self.cost_scratch.resize(expected, 0);
    }

    fn record_costs(&mut self, s: &mut Scanner<'_>) -> Result<()> {
        if self.part.schema().is_none() {
            self.error_at("cost line before an 'events:' header".into());
            return Err(ProfileError::MissingEventHeader {
                dump: self.dump_name.clone(),
                line: self.line_no,
            }
            .into());
        }

        let fun = self.ensure_function();
        let file = self.ensure_file();
        self.graph.source(fun, file);

        let instr = self
            .columns
            .has_instr
            .then(|| self.graph.instr(fun, self.cursor.from_addr));
        let line = self
            .columns
            .has_line
            .then(|| self.graph.line(fun, file, self.cursor.from_line));
        if let (Some(instr), Some(line)) = (instr, line) {
            self.graph.link_instr_line(instr, line);
        }

        self.read_cost_vector(s);

        match self.next_record {
            RecordKind::SelfCost => {
                if let Some(instr) = instr {
                    self.part.add_instr_cost(instr, &self.cost_scratch);
                }
                if let Some(line) = line {
                    self.part.add_line_cost(line, &self.cost_scratch);
                }
                self.part.add_function_cost(fun, &self.cost_scratch);
                if let Some(schema) = self.part.schema() {
                    self.graph.add_totals(schema, &self.cost_scratch);
                }
            }
            RecordKind::CallCost => {
                self.next_record = RecordKind::SelfCost;
                let callee = match self.called_function {
                    Some(callee) => callee,
                    None => {
                        self.warn_at(format!(
                            "call cost without a called function, using '{UNKNOWN}'"
                        ));
                        self.graph.function(UNKNOWN, file, self.cur_object)
                    }
                };
                let call = self.graph.call(fun, callee);
                let count = self.call_count;
                if let Some(instr) = instr {
                    if let Some(cost) = self.part.add_instr_call(call, instr, count, &self.cost_scratch)
                    {
                        self.graph.merge_call_max(cost);
                    }
                }
                if let Some(line) = line {
                    if let Some(cost) = self.part.add_line_call(call, line, count, &self.cost_scratch)
                    {
                        self.graph.merge_call_max(cost);
                    }
                }
                self.part.add_call(call, count, &self.cost_scratch);
                self.called_object = None;
                self.called_file = None;
                self.called_function = None;
                self.call_count = 0;
            }
            RecordKind::BoringJump | RecordKind::CondJump => {
                let conditional = self.next_record == RecordKind::CondJump;
                self.next_record = RecordKind::SelfCost;
                let to_fun = self.jump_to_function.unwrap_or(fun);
                let to_file = self.jump_to_file.unwrap_or(file);
                let from_source = self.graph.source(fun, file);
                let to_source = self.graph.source(to_fun, to_file);
                let key = JumpKey {
                    from: fun,
                    to: to_fun,
                    from_line: if self.columns.has_line {
                        self.cursor.from_line
                    } else {
                        0
                    },
                    from_addr: if self.columns.has_instr {
                        self.cursor.from_addr
                    } else {
                        Addr(0)
                    },
                    to_line: if self.columns.has_line {
                        self.target_pos.from_line
                    } else {
                        0
                    },
                    to_addr: if self.columns.has_instr {
                        self.target_pos.from_addr
                    } else {
                        Addr(0)
                    },
                    conditional,
                };
                let jump = self.graph.jump(key, from_source, to_source);
                self.part
                    .add_jump(jump, self.jumps_executed, self.jumps_followed);
                self.jump_to_function = None;
                self.jump_to_file = None;
                self.jumps_executed = 0;
                self.jumps_followed = 0;
            }
        }
        Ok(())
    }

    // Diagnostics and progress

    fn warn_invalid(&mut self, line: &[u8]) {
        let text = String::from_utf8_lossy(line);
        self.warn_at(format!("invalid line '{text}'"));
    }

    fn warn_at(&mut self, message: String) {
        warn!("{}:{}: {}", self.dump_name, self.line_no, message);
        self.report(Severity::Warning, message);
    }

    fn error_at(&mut self, message: String) {
        error!("{}:{}: {}", self.dump_name, self.line_no, message);
        self.report(Severity::Error, message);
    }

    fn report(&mut self, severity: Severity, message: String) {
        if let Some(sink) = self.diags.as_mut() {
            sink.report(Diagnostic {
                severity,
                dump: self.dump_name.clone(),
                line: self.line_no,
                message,
            });
        }
    }

    fn emit_progress(&mut self, percent: u32) {
        if percent == self.last_progress {
            return;
        }
        self.last_progress = percent;
        if let Some(callback) = self.progress.as_mut() {
            callback(percent);
        }
    }
}

fn percent(offset: usize, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    ((100.0 * offset as f64 / total as f64) + 0.5) as u32
}
