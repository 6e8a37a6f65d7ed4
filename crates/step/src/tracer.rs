//! Trace/debugging hooks.
//!
//! A trait-based tracing system: the VM
//! (here, [`crate::interp::Interpreter`]) is generic over a `Tracer`, so
//! [`NoopTracer`] compiles away entirely via monomorphization and production
//! callers pay nothing. A controlling thread can plug in [`StderrTracer`]
//! for a human-readable log or [`RecordingTracer`] to capture events for
//! later replay. The hook thread copies data out rather than
//! holding references into interpreter state.

use crate::{intern::TaskId, value::Value};

/// One event fired from the interpreter's `call` entry point.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    Enter { task: TaskId, args: Vec<Value> },
    Succeed { task: TaskId },
    MethodFail { task: TaskId, method_index: usize },
    CallFail { task: TaskId },
}

/// Hook points the interpreter fires at task-call boundaries.
///
/// Implementors may block (e.g. to let a controlling thread single-step),
/// implementors may block to allow a controlling thread to single-step.
pub trait Tracer {
    fn on_enter(&mut self, task: TaskId, args: &[Value]);
    fn on_succeed(&mut self, task: TaskId);
    fn on_method_fail(&mut self, task: TaskId, method_index: usize);
    fn on_call_fail(&mut self, task: TaskId);
}

/// Zero-cost tracer used in production; every method is inlined to nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    #[inline]
    fn on_enter(&mut self, _task: TaskId, _args: &[Value]) {}
    #[inline]
    fn on_succeed(&mut self, _task: TaskId) {}
    #[inline]
    fn on_method_fail(&mut self, _task: TaskId, _method_index: usize) {}
    #[inline]
    fn on_call_fail(&mut self, _task: TaskId) {}
}

/// Writes a human-readable trace to stderr as execution proceeds.
#[derive(Debug, Default)]
pub struct StderrTracer {
    depth: usize,
}

impl Tracer for StderrTracer {
    fn on_enter(&mut self, task: TaskId, args: &[Value]) {
        eprintln!("{}-> enter {:?} {:?}", "  ".repeat(self.depth), task, args);
        self.depth += 1;
    }
    fn on_succeed(&mut self, task: TaskId) {
        self.depth = self.depth.saturating_sub(1);
        eprintln!("{}<- succeed {:?}", "  ".repeat(self.depth), task);
    }
    fn on_method_fail(&mut self, task: TaskId, method_index: usize) {
        eprintln!("{}   method {method_index} of {:?} failed", "  ".repeat(self.depth), task);
    }
    fn on_call_fail(&mut self, task: TaskId) {
        self.depth = self.depth.saturating_sub(1);
        eprintln!("{}<- call failed {:?}", "  ".repeat(self.depth), task);
    }
}

/// Records every event in order, for deterministic replay or post-mortem
/// inspection. Unbounded -- callers running long programs under this
/// tracer should expect memory proportional to the number of calls made.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}

impl Tracer for RecordingTracer {
    fn on_enter(&mut self, task: TaskId, args: &[Value]) {
        self.events.push(TraceEvent::Enter {
            task,
            args: args.to_vec(),
        });
    }
    fn on_succeed(&mut self, task: TaskId) {
        self.events.push(TraceEvent::Succeed { task });
    }
    fn on_method_fail(&mut self, task: TaskId, method_index: usize) {
        self.events.push(TraceEvent::MethodFail { task, method_index });
    }
    fn on_call_fail(&mut self, task: TaskId) {
        self.events.push(TraceEvent::CallFail { task });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_tracer_captures_events_in_order() {
        let mut tracer = RecordingTracer::new();
        let task = TaskId::from(0u32);
        tracer.on_enter(task, &[Value::Int(1)]);
        tracer.on_succeed(task);
        assert_eq!(tracer.events().len(), 2);
        assert!(matches!(tracer.events()[0], TraceEvent::Enter { .. }));
        assert!(matches!(tracer.events()[1], TraceEvent::Succeed { .. }));
    }
}
