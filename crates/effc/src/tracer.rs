//! Zero-cost execution tracing for the delimited-control trampoline
//! (§4.8): a trait with no-op defaults so [`NoopTracer`] compiles away
//! entirely, plus a couple of concrete implementations for debugging and
//! tests.

use crate::runtime::PromptId;

/// One observed runtime event, used by [`RecordingTracer`] for
/// deterministic replay in tests (§8's runtime-order properties).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Step,
    Shift(PromptId),
    Resume(PromptId),
    Unwind(PromptId),
    Rewind(PromptId),
    CellGet,
    CellPut,
}

/// Hook points into the trampoline. All methods default to no-ops so a
/// tracer only needs to override what it cares about.
pub trait RuntimeTracer {
    #[inline(always)]
    fn on_step(&mut self) {}
    #[inline(always)]
    fn on_shift(&mut self, _prompt: PromptId) {}
    #[inline(always)]
    fn on_resume(&mut self, _prompt: PromptId) {}
    #[inline(always)]
    fn on_unwind(&mut self, _prompt: PromptId) {}
    #[inline(always)]
    fn on_rewind(&mut self, _prompt: PromptId) {}
    #[inline(always)]
    fn on_cell_get(&mut self) {}
    #[inline(always)]
    fn on_cell_put(&mut self) {}
}

/// Production default: every hook is a no-op and monomorphizes away.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl RuntimeTracer for NoopTracer {}

/// Writes a one-line trace of every event to stderr. Useful when
/// debugging handler ordering by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrTracer;

impl RuntimeTracer for StderrTracer {
    fn on_step(&mut self) {
        eprintln!("step");
    }
    fn on_shift(&mut self, prompt: PromptId) {
        eprintln!("shift {prompt:?}");
    }
    fn on_resume(&mut self, prompt: PromptId) {
        eprintln!("resume {prompt:?}");
    }
    fn on_unwind(&mut self, prompt: PromptId) {
        eprintln!("unwind {prompt:?}");
    }
    fn on_rewind(&mut self, prompt: PromptId) {
        eprintln!("rewind {prompt:?}");
    }
}

/// Records every event in order, for assertions in tests (§8: "the
/// runtime trace shows one `shift`...", "`onUnwind` runs exactly once per
/// capture per segment").
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    pub events: Vec<TraceEvent>,
}

impl RuntimeTracer for RecordingTracer {
    fn on_step(&mut self) {
        self.events.push(TraceEvent::Step);
    }
    fn on_shift(&mut self, prompt: PromptId) {
        self.events.push(TraceEvent::Shift(prompt));
    }
    fn on_resume(&mut self, prompt: PromptId) {
        self.events.push(TraceEvent::Resume(prompt));
    }
    fn on_unwind(&mut self, prompt: PromptId) {
        self.events.push(TraceEvent::Unwind(prompt));
    }
    fn on_rewind(&mut self, prompt: PromptId) {
        self.events.push(TraceEvent::Rewind(prompt));
    }
    fn on_cell_get(&mut self) {
        self.events.push(TraceEvent::CellGet);
    }
    fn on_cell_put(&mut self) {
        self.events.push(TraceEvent::CellPut);
    }
}

impl RecordingTracer {
    #[must_use]
    pub fn count(&self, event: &TraceEvent) -> usize {
        self.events.iter().filter(|e| *e == event).count()
    }
}
