//! The delimited-control runtime (§4.6): a trampolined evaluator over a
//! segmented metacontinuation stack, realizing `shift`/`reset` handlers
//! with `onUnwind`/`onRewind`/`onReturn` clauses and backup-restorable
//! state cells.
//!
//! The source semantics are given against a JavaScript monadic backend
//! with polymorphic `a`/`t`/`r` type parameters per handler; this port
//! collapses those to one runtime value type ([`RtValue`]) since Rust has
//! no ergonomic way to keep existential per-handler type parameters
//! object-safe across a trampoline. See the design ledger for the
//! trade-off.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::tracer::RuntimeTracer;

/// The runtime's only value representation. `Closure` stores a
/// trampoline-callable body directly; there is no separate bytecode
/// representation at this layer.
#[derive(Clone)]
pub enum RtValue {
    Unit,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Tuple(Rc<Vec<RtValue>>),
    Closure(Rc<dyn Fn(Vec<RtValue>) -> Control>),
}

impl fmt::Debug for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Tuple(items) => write!(f, "{items:?}"),
            Self::Closure(_) => write!(f, "<closure>"),
        }
    }
}

/// Unique, monotonically-allocated, non-zero identity for a handler
/// prompt. `toplevel` is always `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromptId(u32);

impl PromptId {
    pub const TOPLEVEL: Self = Self(1);
}

/// Allocates fresh, never-reused prompt ids starting just past
/// [`PromptId::TOPLEVEL`].
#[derive(Debug)]
pub struct PromptAllocator {
    next: u32,
}

impl Default for PromptAllocator {
    fn default() -> Self {
        Self { next: PromptId::TOPLEVEL.0 + 1 }
    }
}

impl PromptAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> PromptId {
        let id = PromptId(self.next);
        self.next += 1;
        id
    }
}

/// A continuation frame. `Rc`-shared rather than `Box`-owned so a captured
/// segment's frames survive being cloned out of a [`SubStack`] and replayed
/// by more than one `resume` call (§4.6: resuming a continuation twice must
/// be possible, not just resuming it once).
type Frame = Rc<dyn Fn(RtValue) -> Control>;
type UnwindFn = Rc<RefCell<dyn FnMut() -> RtValue>>;
type RewindFn = Rc<RefCell<dyn FnMut(RtValue) -> Control>>;
type ReturnFn = Rc<RefCell<dyn FnMut(RtValue) -> Control>>;

/// The three optional lifecycle hooks a `reset` segment can carry. Shared
/// via `Rc<RefCell<_>>` rather than owned outright, so a [`CapturedSegment`]
/// can be cloned and its clauses run again on a second `resume`.
#[derive(Clone, Default)]
pub struct Clauses {
    pub on_unwind: Option<UnwindFn>,
    pub on_rewind: Option<RewindFn>,
    pub on_return: Option<ReturnFn>,
}

/// A mutable cell, scoped to the segment that created it so unwinding one
/// handler invocation never disturbs another's copy.
#[derive(Debug, Clone)]
struct Cell {
    value: RtValue,
}

/// One frame-group on the metacontinuation, bounded by a prompt.
struct Segment {
    frames: Vec<Frame>,
    cells: Vec<Cell>,
    prompt: PromptId,
    clauses: Clauses,
}

impl Segment {
    fn fresh(prompt: PromptId, clauses: Clauses) -> Self {
        Self { frames: Vec::new(), cells: Vec::new(), prompt, clauses }
    }
}

/// The metacontinuation: a stack of [`Segment`]s, topmost last.
#[derive(Default)]
pub struct Stack {
    segments: Vec<Segment>,
}

impl Stack {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn top_mut(&mut self) -> Option<&mut Segment> {
        self.segments.last_mut()
    }
}

/// A previously-unwound segment: frames are preserved, cells are replaced
/// by value snapshots, and `on_unwind_data` threads whatever `on_unwind`
/// produced through to the matching `on_rewind` call. `Clone` is what makes
/// a captured continuation multi-shot: cloning duplicates the snapshot and
/// the `Rc`-shared frames/clauses, never the live cells backing some other
/// in-flight resumption.
#[derive(Clone)]
struct CapturedSegment {
    frames: Vec<Frame>,
    cell_snapshots: Vec<RtValue>,
    prompt: PromptId,
    clauses: Clauses,
    on_unwind_data: Option<RtValue>,
}

/// A captured sub-continuation: the chain of segments unwound between the
/// point of `shift` and the target prompt, innermost first. Cheap to clone,
/// so a handler's `resume` closure can call it more than once, each time
/// rebuilding independent cells from the same immutable snapshot (§4.6).
#[derive(Clone)]
pub struct SubStack {
    segments: Vec<CapturedSegment>,
}

/// One trampoline instruction. [`step`] interprets exactly one of these
/// against a [`Stack`], producing either a final value or the next
/// `(Control, Stack)` pair.
pub enum Control {
    /// Returns `a` to the stack (the `apply` operation).
    Apply(RtValue),
    /// Sequences `first`, feeding its result into `then`.
    FlatMap(Box<Control>, Frame),
    /// Pushes a fresh segment for `prompt` and continues with `body`.
    Reset(PromptId, Clauses, Box<Control>),
    /// Unwinds the stack up to `prompt`, handing the captured
    /// continuation to `with_continuation`.
    Shift(PromptId, Box<dyn FnOnce(SubStack) -> Control>),
    /// Pushes a captured sub-continuation back, restoring cells and
    /// running `onRewind` bottom to top, then applies `a`.
    Resume(SubStack, RtValue),
    /// Allocates a fresh cell initialized to `init` in the current
    /// segment, then continues with `k` applied to the cell's index.
    WithState(RtValue, Box<dyn FnOnce(usize) -> Control>),
    CellGet(usize, Frame),
    CellPut(usize, RtValue, Frame),
}

enum Trampoline {
    Step(Control, Stack),
    Done(RtValue),
}

/// Runs `control` against `stack` to completion, reporting every hook
/// through `tracer`.
pub fn run(control: Control, stack: Stack, tracer: &mut impl RuntimeTracer) -> RtValue {
    let mut trampoline = Trampoline::Step(control, stack);
    loop {
        tracer.on_step();
        trampoline = match trampoline {
            Trampoline::Done(value) => return value,
            Trampoline::Step(control, stack) => step(control, stack, tracer),
        };
    }
}

/// Like [`run`], but checks `budget` once per trampoline step and aborts
/// with [`crate::resource::ResourceError::Step`] instead of looping
/// forever on a runaway program (§4.9, `CompileSession::run`'s sandboxed
/// entry point).
pub fn run_with_budget(
    control: Control,
    stack: Stack,
    tracer: &mut impl RuntimeTracer,
    budget: &impl crate::resource::ResourceTracker,
) -> Result<RtValue, crate::resource::ResourceError> {
    let mut trampoline = Trampoline::Step(control, stack);
    let mut steps = 0usize;
    loop {
        tracer.on_step();
        steps += 1;
        budget.check_step(steps)?;
        trampoline = match trampoline {
            Trampoline::Done(value) => return Ok(value),
            Trampoline::Step(control, stack) => step(control, stack, tracer),
        };
    }
}

fn step(control: Control, mut stack: Stack, tracer: &mut impl RuntimeTracer) -> Trampoline {
    match control {
        Control::Apply(value) => apply(&mut stack, value),
        Control::FlatMap(first, then) => flat_map(*first, then, stack),
        Control::Reset(prompt, clauses, body) => reset(prompt, clauses, *body, stack),
        Control::Shift(prompt, with_continuation) => shift(prompt, with_continuation, stack, tracer),
        Control::Resume(sub, value) => resume(sub, value, stack, tracer),
        Control::WithState(init, k) => {
            ensure_segment(&mut stack);
            let segment = stack.top_mut().expect("segment just ensured");
            let index = segment.cells.len();
            segment.cells.push(Cell { value: init });
            Trampoline::Step(k(index), stack)
        }
        Control::CellGet(index, k) => {
            ensure_segment(&mut stack);
            let value = stack.top_mut().expect("segment just ensured").cells[index].value.clone();
            Trampoline::Step(k(value), stack)
        }
        Control::CellPut(index, value, k) => {
            ensure_segment(&mut stack);
            stack.top_mut().expect("segment just ensured").cells[index].value = value;
            Trampoline::Step(k(RtValue::Unit), stack)
        }
    }
}

/// Pushes an implicit toplevel segment if the stack hasn't got one yet, so
/// a program that never explicitly `reset`s still has somewhere to hold its
/// frames and state cells.
fn ensure_segment(stack: &mut Stack) {
    if stack.segments.is_empty() {
        stack.segments.push(Segment::fresh(PromptId::TOPLEVEL, Clauses::default()));
    }
}

/// `apply(stack, a)`: returns `a` to the stack's current segment.
fn apply(stack: &mut Stack, value: RtValue) -> Trampoline {
    loop {
        if stack.segments.is_empty() {
            return Trampoline::Done(value);
        }
        let last = stack.segments.len() - 1;
        if let Some(frame) = stack.segments[last].frames.pop() {
            return Trampoline::Step(frame(value), std::mem::take(stack));
        }
        if let Some(on_return) = stack.segments[last].clauses.on_return.as_ref().cloned() {
            let next = (*on_return.borrow_mut())(value);
            stack.segments.pop();
            return Trampoline::Step(next, std::mem::take(stack));
        }
        stack.segments.pop();
    }
}

/// `flatMap(stack, f)`: pushes `f` as a frame on the top segment, creating
/// one if the stack is empty.
fn flat_map(first: Control, then: Frame, mut stack: Stack) -> Trampoline {
    match first {
        Control::Apply(value) => {
            ensure_segment(&mut stack);
            stack.top_mut().expect("segment just ensured").frames.push(then);
            apply(&mut stack, value)
        }
        other => Trampoline::Step(other, {
            ensure_segment(&mut stack);
            stack.top_mut().expect("segment just ensured").frames.push(then);
            stack
        }),
    }
}

/// `reset(prompt, clauses)(c)`: pushes a fresh segment, then continues
/// with `c`.
fn reset(prompt: PromptId, clauses: Clauses, body: Control, mut stack: Stack) -> Trampoline {
    stack.segments.push(Segment::fresh(prompt, clauses));
    Trampoline::Step(body, stack)
}

/// `shift(prompt)(f)`: unwinds segments until `prompt` is found,
/// snapshotting cells and running each segment's `onUnwind`, then calls
/// `f` with the captured [`SubStack`].
fn shift(prompt: PromptId, with_continuation: Box<dyn FnOnce(SubStack) -> Control>, mut stack: Stack, tracer: &mut impl RuntimeTracer) -> Trampoline {
    let mut captured = Vec::new();
    loop {
        let Some(segment) = stack.segments.pop() else {
            panic!("[error] internal: shift on unknown prompt {prompt:?}");
        };
        let found = segment.prompt == prompt;
        let on_unwind_data = segment.clauses.on_unwind.as_ref().map(|f| (*f.borrow_mut())());
        let cell_snapshots = segment.cells.iter().map(|c| c.value.clone()).collect();
        captured.push(CapturedSegment {
            frames: segment.frames,
            cell_snapshots,
            prompt: segment.prompt,
            clauses: segment.clauses,
            on_unwind_data,
        });
        if found {
            tracer.on_shift(prompt);
            break;
        }
    }
    let sub = SubStack { segments: captured };
    Trampoline::Step(with_continuation(sub), stack)
}

/// Pushes `sub`'s segments back onto `stack`, restores their cells from
/// the snapshots taken at unwind time, runs each segment's `onRewind` in
/// bottom-to-top order, and finally applies `value`.
fn resume(sub: SubStack, value: RtValue, mut stack: Stack, tracer: &mut impl RuntimeTracer) -> Trampoline {
    let prompt = sub.segments.first().map_or(PromptId::TOPLEVEL, |s| s.prompt);
    tracer.on_resume(prompt);
    let mut rewinds: Vec<Control> = Vec::new();
    for captured in sub.segments.into_iter().rev() {
        let on_unwind_data = captured.on_unwind_data.clone();
        let cells = captured.cell_snapshots.iter().map(|v| Cell { value: v.clone() }).collect();
        let rewind_prompt = captured.prompt;
        if let Some(on_rewind) = captured.clauses.on_rewind.as_ref().cloned() {
            tracer.on_rewind(rewind_prompt);
            let data = on_unwind_data.unwrap_or(RtValue::Unit);
            rewinds.push((*on_rewind.borrow_mut())(data));
        }
        stack.segments.push(Segment {
            frames: captured.frames,
            cells,
            prompt: captured.prompt,
            clauses: captured.clauses,
        });
    }
    let finish = Control::Apply(value);
    // `Control` carries `FnOnce` trait objects (`Shift`/`WithState`), so it
    // can't derive `Clone`; each fold step's continuation is still only
    // ever invoked once per `resume` call, so a take-once cell satisfies
    // `Frame`'s `Fn` bound without actually needing to run twice.
    let combined = rewinds.into_iter().rev().fold(finish, |acc, rewind| {
        let acc = Rc::new(RefCell::new(Some(acc)));
        Control::FlatMap(
            Box::new(rewind),
            Rc::new(move |_| acc.borrow_mut().take().expect("rewind continuation invoked more than once")),
        )
    });
    Trampoline::Step(combined, stack)
}

/// `withState(init, f)`: allocates a cell in the current segment and
/// passes its index to `f`.
#[must_use]
pub fn with_state(init: RtValue, f: impl FnOnce(usize) -> Control + 'static) -> Control {
    Control::WithState(init, Box::new(f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::{NoopTracer, RecordingTracer, TraceEvent};

    fn run_noop(control: Control) -> RtValue {
        run(control, Stack::new(), &mut NoopTracer)
    }

    #[test]
    fn apply_on_empty_stack_is_final_value() {
        let value = run_noop(Control::Apply(RtValue::Int(42)));
        assert!(matches!(value, RtValue::Int(42)));
    }

    #[test]
    fn reset_then_pure_shift_returns_to_body() {
        let prompt = PromptId::TOPLEVEL;
        let body = Control::Shift(
            prompt,
            Box::new(|_sub: SubStack| Control::Apply(RtValue::Int(7))),
        );
        let control = Control::Reset(prompt, Clauses::default(), Box::new(body));
        let value = run_noop(control);
        assert!(matches!(value, RtValue::Int(7)));
    }

    #[test]
    fn resume_restores_and_applies() {
        let prompt = PromptId::TOPLEVEL;
        let body = Control::FlatMap(
            Box::new(Control::Shift(
                prompt,
                Box::new(|sub: SubStack| Control::Resume(sub, RtValue::Int(1))),
            )),
            Rc::new(|v| Control::Apply(match v {
                RtValue::Int(n) => RtValue::Int(n + 1),
                other => other,
            })),
        );
        let control = Control::Reset(prompt, Clauses::default(), Box::new(body));
        let value = run_noop(control);
        assert!(matches!(value, RtValue::Int(2)));
    }

    /// A continuation captured once and resumed twice must give each
    /// resumption its own copy of any state cell the segment carried,
    /// rather than the two resumptions sharing one mutable cell (§4.6).
    #[test]
    fn resuming_a_captured_continuation_twice_gives_each_call_its_own_cell() {
        let prompt = PromptId::TOPLEVEL;
        let control = Control::Reset(
            prompt,
            Clauses::default(),
            Box::new(Control::WithState(
                RtValue::Int(0),
                Box::new(move |index| {
                    let after_shift: Frame = Rc::new(move |_resumed: RtValue| {
                        Control::CellGet(
                            index,
                            Rc::new(move |cur: RtValue| {
                                let n = match cur {
                                    RtValue::Int(n) => n,
                                    _ => 0,
                                };
                                Control::CellPut(
                                    index,
                                    RtValue::Int(n + 1),
                                    Rc::new(move |_| Control::CellGet(index, Rc::new(Control::Apply))),
                                )
                            }),
                        )
                    });
                    Control::FlatMap(
                        Box::new(Control::Shift(
                            prompt,
                            Box::new(move |sub: SubStack| {
                                let second = sub.clone();
                                Control::FlatMap(
                                    Box::new(Control::Resume(sub, RtValue::Unit)),
                                    Rc::new(move |first: RtValue| {
                                        let second = second.clone();
                                        Control::FlatMap(
                                            Box::new(Control::Resume(second, RtValue::Unit)),
                                            Rc::new(move |second_value: RtValue| {
                                                Control::Apply(RtValue::Tuple(Rc::new(vec![first.clone(), second_value])))
                                            }),
                                        )
                                    }),
                                )
                            }),
                        )),
                        after_shift,
                    )
                }),
            )),
        );
        let value = run_noop(control);
        match value {
            RtValue::Tuple(items) => {
                assert!(matches!(items[0], RtValue::Int(1)), "first resume: {:?}", items[0]);
                assert!(matches!(items[1], RtValue::Int(1)), "second resume: {:?}", items[1]);
            }
            other => panic!("expected a two-element tuple, got {other:?}"),
        }
    }

    #[test]
    fn shift_on_unknown_prompt_panics() {
        let result = std::panic::catch_unwind(|| {
            run_noop(Control::Shift(PromptId(999), Box::new(|_| Control::Apply(RtValue::Unit))))
        });
        assert!(result.is_err());
    }

    #[test]
    fn trace_records_shift_and_resume() {
        let prompt = PromptId::TOPLEVEL;
        let body = Control::FlatMap(
            Box::new(Control::Shift(prompt, Box::new(|sub: SubStack| Control::Resume(sub, RtValue::Unit)))),
            Rc::new(|_| Control::Apply(RtValue::Unit)),
        );
        let control = Control::Reset(prompt, Clauses::default(), Box::new(body));
        let mut tracer = RecordingTracer::default();
        run(control, Stack::new(), &mut tracer);
        assert_eq!(tracer.count(&TraceEvent::Shift(prompt)), 1);
        assert_eq!(tracer.count(&TraceEvent::Resume(prompt)), 1);
    }

    #[test]
    fn run_with_budget_succeeds_under_the_limit() {
        let budget = crate::resource::LimitedTracker { max_recursion: 10, max_steps: 10 };
        let result = run_with_budget(Control::Apply(RtValue::Int(1)), Stack::new(), &mut NoopTracer, &budget);
        assert!(matches!(result, Ok(RtValue::Int(1))));
    }

    #[test]
    fn run_with_budget_aborts_a_runaway_loop() {
        fn spin(_: RtValue) -> Control {
            Control::FlatMap(Box::new(Control::Apply(RtValue::Unit)), Rc::new(spin))
        }
        let budget = crate::resource::LimitedTracker { max_recursion: 10, max_steps: 5 };
        let control = Control::FlatMap(Box::new(Control::Apply(RtValue::Unit)), Rc::new(spin));
        let result = run_with_budget(control, Stack::new(), &mut NoopTracer, &budget);
        assert!(result.is_err());
    }
}
