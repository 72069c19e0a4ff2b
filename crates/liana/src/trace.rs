//! Evaluation tracing.
//!
//! The engine never writes to stdout/stderr on its own; everything
//! observable goes through an [`EvalTracer`]. The default is [`NoopTracer`].
//! [`StderrTracer`] is handy for CLI use, [`RecordingTracer`] for tests.

use std::fmt;

/// Outcome of one optimizer fold attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// The subtree was evaluated and replaced with its value.
    Folded,
    /// The subtree was pure but is a value constructor that stays unfolded.
    Skipped,
    /// Evaluation failed; the original subtree was kept.
    Failed,
}

/// Hooks into evaluation, script logging, and the optimizer.
///
/// All hooks have empty defaults so implementations only override what they
/// observe.
pub trait EvalTracer: fmt::Debug + Send {
    /// Called once per opcode dispatch in the interpreter.
    fn on_op(&mut self, _name: &str) {}

    /// Output of `std.log`.
    fn on_log(&mut self, _message: &str) {}

    /// A warning appended via `std.warn` or raised by the engine.
    fn on_warning(&mut self, _message: &str) {}

    /// An optimizer decision about a pure subtree.
    fn on_fold(&mut self, _op: &str, _outcome: FoldOutcome) {}
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Writes logs and warnings to stderr. Opcode dispatch is not reported.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl EvalTracer for StderrTracer {
    fn on_log(&mut self, message: &str) {
        eprintln!("[script] {message}");
    }

    fn on_warning(&mut self, message: &str) {
        eprintln!("[script warning] {message}");
    }

    fn on_fold(&mut self, op: &str, outcome: FoldOutcome) {
        if outcome == FoldOutcome::Failed {
            eprintln!("[optimizer] fold of '{op}' failed; subtree kept");
        }
    }
}

/// A recorded trace event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Op(String),
    Log(String),
    Warning(String),
    Fold { op: String, outcome: FoldOutcome },
}

impl PartialEq<FoldOutcome> for TraceEvent {
    fn eq(&self, other: &FoldOutcome) -> bool {
        matches!(self, Self::Fold { outcome, .. } if outcome == other)
    }
}

/// Captures every event, for assertions in tests.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded `Log` messages, in order.
    #[must_use]
    pub fn logs(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Log(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EvalTracer for RecordingTracer {
    fn on_op(&mut self, name: &str) {
        self.events.push(TraceEvent::Op(name.to_owned()));
    }

    fn on_log(&mut self, message: &str) {
        self.events.push(TraceEvent::Log(message.to_owned()));
    }

    fn on_warning(&mut self, message: &str) {
        self.events.push(TraceEvent::Warning(message.to_owned()));
    }

    fn on_fold(&mut self, op: &str, outcome: FoldOutcome) {
        self.events.push(TraceEvent::Fold {
            op: op.to_owned(),
            outcome,
        });
    }
}
