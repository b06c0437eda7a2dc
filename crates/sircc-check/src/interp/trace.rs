//! Execution trace and coverage recording for the semantic evaluator.
//!
//! One entry per node evaluation. Covers the coverage stream required by
//! `§8` scenario 3 (`{k:"cov_step", node, line}` records keyed to the SIR
//! source map) plus the `{k:"trace_step"}` records required by scenario 4.

use serde::Serialize;

use sircc_core::NodeId;

use super::value::Value;

/// A single entry in the execution trace, recording one node evaluation.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub node_id: NodeId,
    pub op_description: String,
    pub inputs: Vec<(u16, ValueSnapshot)>,
    pub output: Option<ValueSnapshot>,
}

/// A `Display`-friendly, JSON-serializable snapshot of a [`Value`] for trace
/// output. The runtime `Value` itself is not `Serialize` -- it can hold
/// recursive arrays/structs/sums that are awkward to round-trip without a
/// type context, so traces record a rendered summary instead.
#[derive(Debug, Clone, Serialize)]
pub struct ValueSnapshot(pub String);

impl From<&Value> for ValueSnapshot {
    fn from(v: &Value) -> Self {
        ValueSnapshot(format!("{v:?}"))
    }
}

/// One `{k:"cov_step", node, line}` record (`§8` scenario 3).
#[derive(Debug, Clone, Serialize)]
pub struct CovStep {
    pub k: &'static str,
    pub node: u32,
    pub line: u32,
}

impl CovStep {
    pub fn new(node: NodeId, line: u32) -> Self {
        CovStep {
            k: "cov_step",
            node: node.0,
            line,
        }
    }
}

/// One `{k:"trace_step", ...}` record (`§8` scenario 4).
#[derive(Debug, Clone, Serialize)]
pub struct TraceStep {
    pub k: &'static str,
    pub node: u32,
    pub op: String,
    pub output: Option<String>,
}

impl From<&TraceEntry> for TraceStep {
    fn from(e: &TraceEntry) -> Self {
        TraceStep {
            k: "trace_step",
            node: e.node_id.0,
            op: e.op_description.clone(),
            output: e.output.as_ref().map(|v| v.0.clone()),
        }
    }
}

/// Accumulates coverage and trace records over one interpreter run.
#[derive(Debug, Default)]
pub struct Recorder {
    pub coverage: Vec<CovStep>,
    pub entries: Vec<TraceEntry>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder::default()
    }

    pub fn record_step(&mut self, node: NodeId, line: u32) {
        self.coverage.push(CovStep::new(node, line));
    }

    pub fn record_entry(&mut self, entry: TraceEntry) {
        self.entries.push(entry);
    }

    pub fn trace_steps(&self) -> Vec<TraceStep> {
        self.entries.iter().map(TraceStep::from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cov_step_serializes_with_k_tag() {
        let step = CovStep::new(NodeId(3), 12);
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["k"], "cov_step");
        assert_eq!(json["node"], 3);
        assert_eq!(json["line"], 12);
    }

    #[test]
    fn trace_step_from_entry_carries_output() {
        let entry = TraceEntry {
            node_id: NodeId(1),
            op_description: "const.i32".to_string(),
            inputs: vec![],
            output: Some(ValueSnapshot("I32(9029)".to_string())),
        };
        let step = TraceStep::from(&entry);
        assert_eq!(step.k, "trace_step");
        assert_eq!(step.output.as_deref(), Some("I32(9029)"));
    }

    #[test]
    fn recorder_accumulates_coverage_and_trace() {
        let mut rec = Recorder::new();
        rec.record_step(NodeId(1), 4);
        rec.record_step(NodeId(2), 5);
        rec.record_entry(TraceEntry {
            node_id: NodeId(1),
            op_description: "i32.add".to_string(),
            inputs: vec![],
            output: None,
        });
        assert_eq!(rec.coverage.len(), 2);
        assert_eq!(rec.trace_steps().len(), 1);
    }
}
