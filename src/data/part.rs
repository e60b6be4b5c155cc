//! One loaded dump part: header metadata plus the per-part cost arena
//!
//! The part holds every cost vector the loader attributes, keyed by entity
//! handle. Dropping the part releases the whole arena; the graph's interned
//! entities survive and carry no part-local cost themselves.

use crate::core::cost::{CostVec, EventSchema};
use crate::core::types::{CallId, FunctionId, InstrId, JumpId, LineId};
use std::collections::HashMap;

/// Header metadata of one dump part
#[derive(Debug, Default, Clone)]
pub struct PartMeta {
    pub version: Option<String>,
    pub creator: Option<String>,
    pub trigger: Option<String>,
    pub timeframe: Option<String>,
    pub part_number: Option<u32>,
    pub pid: Option<u32>,
    pub thread: Option<u32>,
}

/// Call-cost record: call count plus accumulated cost vector
#[derive(Debug, Default, Clone)]
pub struct CallCost {
    pub count: u64,
    pub cost: CostVec,
}

/// Executed/followed counters of one jump
#[derive(Debug, Default, Clone, Copy)]
pub struct JumpCost {
    pub executed: u64,
    pub followed: u64,
}

#[derive(Debug)]
pub struct Part {
    name: String,
    pub meta: PartMeta,
    schema: Option<EventSchema>,
    summary: Option<CostVec>,
    self_totals: CostVec,
    sealed: bool,

    line_costs: HashMap<LineId, CostVec>,
    instr_costs: HashMap<InstrId, CostVec>,
    function_costs: HashMap<FunctionId, CostVec>,
    call_costs: HashMap<CallId, CallCost>,
    line_call_costs: HashMap<(CallId, LineId), CallCost>,
    instr_call_costs: HashMap<(CallId, InstrId), CallCost>,
    jump_costs: HashMap<JumpId, JumpCost>,
}

impl Part {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            meta: PartMeta::default(),
            schema: None,
            summary: None,
            self_totals: CostVec::new(),
            sealed: false,
            line_costs: HashMap::new(),
            instr_costs: HashMap::new(),
            function_costs: HashMap::new(),
            call_costs: HashMap::new(),
            line_call_costs: HashMap::new(),
            instr_call_costs: HashMap::new(),
            jump_costs: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event column layout of this part, once `events:` has been parsed
    pub fn schema(&self) -> Option<&EventSchema> {
        self.schema.as_ref()
    }

    pub(crate) fn set_schema(&mut self, schema: EventSchema) {
        debug_assert!(!self.sealed, "schema change on a sealed part");
        self.schema = Some(schema);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    /// Part totals: the `summary:` vector when present, otherwise the
    /// pointwise sum of all attributed self costs
    pub fn totals(&self) -> &CostVec {
        self.summary.as_ref().unwrap_or(&self.self_totals)
    }

    pub(crate) fn set_summary(&mut self, totals: CostVec) {
        debug_assert!(!self.sealed, "summary on a sealed part");
        self.summary = Some(totals);
    }

    // Accumulation; all writers map the part's columns through its schema

    pub(crate) fn add_line_cost(&mut self, line: LineId, values: &[u64]) {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let Some(schema) = &self.schema else { return };
        self.line_costs
            .entry(line)
            .or_default()
            .add_mapped(schema, values);
    }

    pub(crate) fn add_instr_cost(&mut self, instr: InstrId, values: &[u64]) {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let Some(schema) = &self.schema else { return };
        self.instr_costs
            .entry(instr)
            .or_default()
            .add_mapped(schema, values);
    }

    /// Self-cost projection of the owning function; also feeds the part's
    /// own totals. Called once per cost line, never per column kind.
    pub(crate) fn add_function_cost(&mut self, function: FunctionId, values: &[u64]) {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let Some(schema) = &self.schema else { return };
        self.function_costs
            .entry(function)
            .or_default()
            .add_mapped(schema, values);
        self.self_totals.add_mapped(schema, values);
    }

    pub(crate) fn add_call(&mut self, call: CallId, count: u64, values: &[u64]) {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let Some(schema) = &self.schema else { return };
        let record = self.call_costs.entry(call).or_default();
        record.count += count;
        record.cost.add_mapped(schema, values);
    }

    /// Accumulate a call cost at its source line; returns the record's cost
    /// so the caller can fold it into the graph-wide call maximum
    pub(crate) fn add_line_call(
        &mut self,
        call: CallId,
        line: LineId,
        count: u64,
        values: &[u64],
    ) -> Option<&CostVec> {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let schema = self.schema.as_ref()?;
        let record = self.line_call_costs.entry((call, line)).or_default();
        record.count += count;
        record.cost.add_mapped(schema, values);
        Some(&record.cost)
    }

    /// As `add_line_call`, at the source instruction
    pub(crate) fn add_instr_call(
        &mut self,
        call: CallId,
        instr: InstrId,
        count: u64,
        values: &[u64],
    ) -> Option<&CostVec> {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let schema = self.schema.as_ref()?;
        let record = self.instr_call_costs.entry((call, instr)).or_default();
        record.count += count;
        record.cost.add_mapped(schema, values);
        Some(&record.cost)
    }

    pub(crate) fn add_jump(&mut self, jump: JumpId, executed: u64, followed: u64) {
        debug_assert!(!self.sealed, "cost write on a sealed part");
        let record = self.jump_costs.entry(jump).or_default();
        record.executed += executed;
        record.followed += followed;
    }

    // Read access to the arena

    pub fn line_cost(&self, line: LineId) -> Option<&CostVec> {
        self.line_costs.get(&line)
    }

    pub fn instr_cost(&self, instr: InstrId) -> Option<&CostVec> {
        self.instr_costs.get(&instr)
    }

    pub fn function_cost(&self, function: FunctionId) -> Option<&CostVec> {
        self.function_costs.get(&function)
    }

    pub fn call_cost(&self, call: CallId) -> Option<&CallCost> {
        self.call_costs.get(&call)
    }

    pub fn line_call_cost(&self, call: CallId, line: LineId) -> Option<&CallCost> {
        self.line_call_costs.get(&(call, line))
    }

    pub fn instr_call_cost(&self, call: CallId, instr: InstrId) -> Option<&CallCost> {
        self.instr_call_costs.get(&(call, instr))
    }

    pub fn jump_cost(&self, jump: JumpId) -> Option<JumpCost> {
        self.jump_costs.get(&jump).copied()
    }

    pub fn line_costs(&self) -> impl Iterator<Item = (LineId, &CostVec)> {
        self.line_costs.iter().map(|(&id, cost)| (id, cost))
    }

    pub fn instr_costs(&self) -> impl Iterator<Item = (InstrId, &CostVec)> {
        self.instr_costs.iter().map(|(&id, cost)| (id, cost))
    }

    pub fn function_costs(&self) -> impl Iterator<Item = (FunctionId, &CostVec)> {
        self.function_costs.iter().map(|(&id, cost)| (id, cost))
    }

    pub fn call_costs(&self) -> impl Iterator<Item = (CallId, &CallCost)> {
        self.call_costs.iter().map(|(&id, cost)| (id, cost))
    }

    pub fn jump_costs(&self) -> impl Iterator<Item = (JumpId, JumpCost)> + use<'_> {
        self.jump_costs.iter().map(|(&id, &cost)| (id, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cost::EventRegistry;

    fn part_with_schema(events: &str) -> Part {
        let mut registry = EventRegistry::default();
        let schema = EventSchema::from_names(&mut registry, events.split_whitespace());
        let mut part = Part::new("test.out");
        part.set_schema(schema);
        part
    }

    #[test]
    fn test_totals_fall_back_to_self_sum() {
        let mut part = part_with_schema("Ir");
        part.add_function_cost(FunctionId::from_index(0), &[100]);
        part.add_function_cost(FunctionId::from_index(1), &[50]);
        assert_eq!(part.totals().values(), &[150]);

        // an explicit summary takes precedence over the accumulated sum
        let mut summary = CostVec::new();
        summary.add(part.totals());
        summary.add(part.totals());
        part.set_summary(summary);
        assert_eq!(part.totals().values(), &[300]);
    }

    #[test]
    fn test_call_records_accumulate() {
        let mut part = part_with_schema("Ir Dr");
        let call = CallId::from_index(0);
        let line = LineId::from_index(0);
        part.add_line_call(call, line, 3, &[60, 6]);
        part.add_line_call(call, line, 2, &[40, 4]);
        let record = part.line_call_cost(call, line).unwrap();
        assert_eq!(record.count, 5);
        assert_eq!(record.cost.values(), &[100, 10]);
    }
}
