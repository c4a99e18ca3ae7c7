//! The fiber interpreter.
//!
//! A [`FiberRuntime`] walks an instruction graph with an explicit frame stack
//! instead of native recursion, so arbitrarily deep `flat_map` chains run in
//! constant native stack. Each iteration of the loop dispatches one
//! instruction, which either yields the next instruction, pushes a frame and
//! descends, resolves a value or cause against the frame stack, or suspends
//! on a future.
//!
//! # Interruption
//!
//! A request combines `Interrupted(now, requester)` into the fiber's pending
//! interruption cause. The cause is acted on only between instructions: at
//! the top of the loop when the fiber is interruptible, or when unwinding
//! past an [`Frame::Interrupt`] marker left by an uninterruptible region.
//! A suspended, interruptible fiber drops its future subscription and
//! resumes on the failure path right away. Once a cause handler takes over
//! the unwinding interruption, the request is spent and later requests are
//! acted on again.
//!
//! # Completion
//!
//! When the frame stack empties, live children in the fiber's scope are
//! interrupted and awaited (uninterruptibly) before the exit is published.
//! Publishing stores the exit, disposes every linked subscription and calls
//! each observer exactly once.

use super::frame::{Frame, Restore};
use super::scope::{ChildFiber, FiberScope};
use super::FiberRefs;
use crate::effect::instruction::{
    cast_value, restore_cause, ErasedCause, ErasedExit, Failure, Instr, Instruction, Node, Value,
};
use crate::effect::{Context, Effect};
use crate::runtime::services::get_default_service;
use crate::runtime::RuntimeOptions;
use crate::sync::future::RawFuture;
use crate::sync::{Disposable, SettableDisposable};
use crate::time::{system_unix_time, Clock};
use crate::tracing_compat::{debug, trace, warn};
use crate::types::{Cause, Defect, Exit, FiberId, RuntimeFlags, Time};
use crate::util::ScopedStack;
use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

/// Lifecycle of a fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberStatus {
    /// Created but not started.
    Pending,
    /// Executing instructions.
    Running,
    /// Waiting on a future.
    Suspended,
    /// Finished; the exit is available.
    Done,
}

type Observer<E, A> = Box<dyn FnOnce(&Exit<E, A>)>;

/// Outcome of dispatching one instruction.
enum Step {
    Next(Instr),
    Suspend,
    Done(ErasedExit),
}

struct Suspension {
    subscription: Disposable,
    link: Disposable,
}

impl Suspension {
    fn dispose(self) {
        self.subscription.dispose();
        self.link.dispose();
    }
}

struct LoopState {
    instr: Option<Instr>,
    frames: Vec<Frame>,
    context: ScopedStack<Context>,
    fiber_refs: ScopedStack<FiberRefs>,
    flags: ScopedStack<RuntimeFlags>,
    interrupt_cause: ErasedCause,
    interrupting: bool,
    suspension: Option<Suspension>,
    pending_exit: Option<ErasedExit>,
    finalizing: bool,
    running: bool,
    started: bool,
}

impl LoopState {
    fn should_interrupt_now(&self) -> bool {
        self.flags.current().interrupt_status
            && !self.interrupting
            && !self.finalizing
            && !self.interrupt_cause.is_empty()
    }

    /// Claims the pending interruption cause if it should be acted on now.
    fn take_interrupt(&mut self) -> Option<ErasedCause> {
        if self.should_interrupt_now() {
            self.interrupting = true;
            Some(self.interrupt_cause.clone())
        } else {
            None
        }
    }

    /// A cause handler took over: the interruption being unwound is consumed
    /// and the fiber is open to new requests again.
    fn recover_interrupt(&mut self) {
        if self.interrupting && !self.finalizing {
            self.interrupting = false;
            self.interrupt_cause = Cause::Empty;
        }
    }
}

/// A running (or runnable) fiber.
pub(crate) struct FiberRuntime<E, A> {
    id: FiberId,
    scope: FiberScope,
    base_refs: FiberRefs,
    this: Weak<Self>,
    state: RefCell<LoopState>,
    exit: RefCell<Option<Rc<Exit<E, A>>>>,
    observers: RefCell<Vec<(u64, Observer<E, A>)>>,
    next_observer: Cell<u64>,
    disposable: SettableDisposable,
}

impl<E: Clone + 'static, A: 'static> FiberRuntime<E, A> {
    pub(crate) fn new(effect: Effect<E, A>, id: FiberId, options: RuntimeOptions) -> Rc<Self> {
        let RuntimeOptions {
            context,
            scope,
            fiber_refs,
            flags,
        } = options;
        Rc::new_cyclic(|this| Self {
            id,
            scope,
            base_refs: fiber_refs.clone(),
            this: this.clone(),
            state: RefCell::new(LoopState {
                instr: Some(effect.instr),
                frames: Vec::new(),
                context: ScopedStack::new(context),
                fiber_refs: ScopedStack::new(fiber_refs),
                flags: ScopedStack::new(flags),
                interrupt_cause: Cause::Empty,
                interrupting: false,
                suspension: None,
                pending_exit: None,
                finalizing: false,
                running: false,
                started: false,
            }),
            exit: RefCell::new(None),
            observers: RefCell::new(Vec::new()),
            next_observer: Cell::new(0),
            disposable: SettableDisposable::new(),
        })
    }

    pub(crate) const fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) const fn scope(&self) -> &FiberScope {
        &self.scope
    }

    /// The fiber's own fiber-ref store (not any `with_fiber_refs` override).
    pub(crate) fn fiber_refs(&self) -> FiberRefs {
        self.base_refs.clone()
    }

    /// Runs the fiber until it completes or first suspends.
    ///
    /// Returns `false` if the fiber was already started.
    pub(crate) fn start(&self) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if state.started {
                return false;
            }
            state.started = true;
        }
        trace!(fiber = %self.id, "fiber started");
        self.run_loop();
        true
    }

    pub(crate) fn status(&self) -> FiberStatus {
        if self.exit.borrow().is_some() {
            return FiberStatus::Done;
        }
        let state = self.state.borrow();
        if !state.started {
            FiberStatus::Pending
        } else if state.suspension.is_some() && !state.running {
            FiberStatus::Suspended
        } else {
            FiberStatus::Running
        }
    }

    pub(crate) fn poll(&self) -> Option<Rc<Exit<E, A>>> {
        self.exit.borrow().clone()
    }

    /// Registers a completion callback; runs it right away if already done.
    pub(crate) fn add_observer(&self, observer: impl FnOnce(&Exit<E, A>) + 'static) -> Disposable {
        if let Some(exit) = self.poll() {
            observer(&exit);
            return Disposable::none();
        }
        let key = self.next_observer.get();
        self.next_observer.set(key + 1);
        self.observers
            .borrow_mut()
            .push((key, Box::new(observer)));
        let this = self.this.clone();
        Disposable::new(move || {
            if let Some(fiber) = this.upgrade() {
                fiber.observers.borrow_mut().retain(|(k, _)| *k != key);
            }
        })
    }

    /// Requests interruption on behalf of `by`.
    pub(crate) fn interrupt_as(&self, by: FiberId) {
        if self.exit.borrow().is_some() {
            return;
        }
        let time = self.unix_time();
        let suspension = {
            let mut state = self.state.borrow_mut();
            let pending = std::mem::take(&mut state.interrupt_cause);
            state.interrupt_cause = pending.combine(Cause::interrupted(time, by));
            let immediate = state.started && !state.running && state.should_interrupt_now();
            if immediate {
                state.suspension.take()
            } else {
                None
            }
        };
        debug!(
            fiber = %self.id,
            by = %by,
            immediate = suspension.is_some(),
            "interruption requested"
        );
        if let Some(suspension) = suspension {
            suspension.dispose();
            {
                let mut state = self.state.borrow_mut();
                state.interrupting = true;
                state.instr = Some(Node::fail_with(state.interrupt_cause.clone()));
            }
            self.run_loop();
        }
    }

    fn run_loop(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.running || self.exit.borrow().is_some() {
                return;
            }
            state.running = true;
        }
        loop {
            let instr = {
                let mut state = self.state.borrow_mut();
                match state.instr.take() {
                    None => None,
                    Some(instr) => Some(match state.take_interrupt() {
                        Some(cause) => Node::fail_with(cause),
                        None => instr,
                    }),
                }
            };
            let Some(instr) = instr else {
                break;
            };
            let step = match panic::catch_unwind(AssertUnwindSafe(|| self.step(instr))) {
                Ok(step) => step,
                Err(payload) => {
                    let defect = Defect::from_panic(payload.as_ref());
                    warn!(fiber = %self.id, defect = %defect, "panic in fiber became a defect");
                    Step::Next(Node::fail_with(self.defect_cause(defect)))
                }
            };
            match step {
                Step::Next(next) => self.state.borrow_mut().instr = Some(next),
                Step::Suspend => {}
                Step::Done(exit) => self.done(exit),
            }
        }
        self.state.borrow_mut().running = false;
    }

    fn step(&self, instr: Instr) -> Step {
        if let Some(label) = &instr.trace {
            let mut state = self.state.borrow_mut();
            if state.flags.current().should_trace {
                state.frames.push(Frame::Trace(label.clone()));
            }
        }
        match &instr.kind {
            Instruction::Of(of) => match of() {
                Ok(value) => self.continue_with(value),
                Err(defect) => self.continue_with_cause(self.defect_cause(defect)),
            },
            Instruction::FromCause(cause) => self.continue_with_cause(cause.clone()),
            Instruction::Sync(thunk) => match thunk() {
                Ok(value) => self.continue_with(value),
                Err(Failure::Expected(error)) => {
                    self.continue_with_cause(Cause::expected(self.unix_time(), error))
                }
                Err(Failure::Unexpected(defect)) => {
                    self.continue_with_cause(self.defect_cause(defect))
                }
            },
            Instruction::Lazy(build) => self.next_or_defect(build()),
            Instruction::Map(inner, f) => self.descend(inner, Frame::Map(f.clone())),
            Instruction::FlatMap(inner, f) => self.descend(inner, Frame::FlatMap(f.clone())),
            Instruction::MapCause(inner, f) => self.descend(inner, Frame::MapCause(f.clone())),
            Instruction::FlatMapCause(inner, f) => {
                self.descend(inner, Frame::FlatMapCause(f.clone()))
            }
            Instruction::Match(inner, on_cause, on_value) => self.descend(
                inner,
                Frame::Match {
                    on_cause: on_cause.clone(),
                    on_value: on_value.clone(),
                },
            ),
            Instruction::AccessContext(f) => {
                let context = self.state.borrow().context.current().clone();
                self.next_or_defect(f(&context))
            }
            Instruction::ProvideContext(inner, context) => {
                let mut state = self.state.borrow_mut();
                let merged = state.context.current().merge(context);
                state.context.push(merged);
                state.frames.push(Frame::Pop(Restore::Context));
                Step::Next(inner.clone())
            }
            Instruction::Async(future) => self.suspend_on(future),
            Instruction::SetInterruptStatus(inner, interruptible) => {
                let flags = self
                    .current_flags()
                    .with_interrupt_status(*interruptible);
                self.push_flags(flags);
                Step::Next(inner.clone())
            }
            Instruction::UpdateRuntimeFlags(inner, f) => {
                let flags = f(self.current_flags());
                self.push_flags(flags);
                Step::Next(inner.clone())
            }
            Instruction::GetRuntimeFlags => self.continue_with(Box::new(self.current_flags())),
            Instruction::GetFiberRefs => {
                let refs = self.state.borrow().fiber_refs.current().clone();
                self.continue_with(Box::new(refs))
            }
            Instruction::WithFiberRefs(inner, refs) => {
                let mut state = self.state.borrow_mut();
                state.fiber_refs.push(refs.clone());
                state.frames.push(Frame::Pop(Restore::FiberRefs));
                Step::Next(inner.clone())
            }
            Instruction::GetRuntimeOptions => {
                let options = self.current_options();
                self.continue_with(Box::new(options))
            }
            Instruction::GetFiberScope => self.continue_with(Box::new(self.scope.clone())),
        }
    }

    fn descend(&self, inner: &Instr, frame: Frame) -> Step {
        self.state.borrow_mut().frames.push(frame);
        Step::Next(inner.clone())
    }

    fn next_or_defect(&self, next: Result<Instr, Defect>) -> Step {
        match next {
            Ok(instr) => Step::Next(instr),
            Err(defect) => Step::Next(Node::fail_with(self.defect_cause(defect))),
        }
    }

    /// Resolves a success value against the frame stack.
    fn continue_with(&self, mut value: Value) -> Step {
        loop {
            let frame = self.state.borrow_mut().frames.pop();
            let Some(frame) = frame else {
                return Step::Done(Ok(value));
            };
            match frame {
                Frame::Map(f) => match f(value) {
                    Ok(next) => value = next,
                    Err(defect) => return self.continue_with_cause(self.defect_cause(defect)),
                },
                Frame::FlatMap(f) | Frame::Match { on_value: f, .. } => {
                    return self.next_or_defect(f(value));
                }
                Frame::Interrupt => {
                    let interrupt = self.state.borrow_mut().take_interrupt();
                    if let Some(cause) = interrupt {
                        return self.continue_with_cause(cause);
                    }
                }
                Frame::Pop(restore) => self.restore(restore),
                Frame::MapCause(_) | Frame::FlatMapCause(_) | Frame::Trace(_) => {}
            }
        }
    }

    /// Resolves a failure cause against the frame stack.
    fn continue_with_cause(&self, mut cause: ErasedCause) -> Step {
        loop {
            let frame = self.state.borrow_mut().frames.pop();
            let Some(frame) = frame else {
                return Step::Done(Err(cause));
            };
            match frame {
                Frame::MapCause(f) => cause = f(cause),
                Frame::FlatMapCause(f) | Frame::Match { on_cause: f, .. } => {
                    self.state.borrow_mut().recover_interrupt();
                    return self.next_or_defect(f(cause));
                }
                Frame::Interrupt => {
                    let interrupt = self.state.borrow_mut().take_interrupt();
                    if let Some(interrupt) = interrupt {
                        cause = cause.combine(interrupt);
                    }
                }
                Frame::Pop(restore) => self.restore(restore),
                Frame::Trace(label) => {
                    trace!(fiber = %self.id, label = %label, "failure unwound through traced effect");
                }
                Frame::Map(_) | Frame::FlatMap(_) => {}
            }
        }
    }

    fn restore(&self, restore: Restore) {
        let mut state = self.state.borrow_mut();
        match restore {
            Restore::Context => {
                state.context.pop();
            }
            Restore::FiberRefs => {
                state.fiber_refs.pop();
            }
            Restore::Flags => {
                state.flags.pop();
            }
        }
    }

    fn push_flags(&self, flags: RuntimeFlags) {
        let mut state = self.state.borrow_mut();
        if state.flags.current().interrupt_status && !flags.interrupt_status {
            state.frames.push(Frame::Interrupt);
        }
        state.flags.push(flags);
        state.frames.push(Frame::Pop(Restore::Flags));
    }

    fn suspend_on(&self, future: &RawFuture) -> Step {
        if let Some(instr) = future.poll() {
            return Step::Next(instr);
        }
        let Some(this) = self.this.upgrade() else {
            return Step::Suspend;
        };
        let subscription = future.add_observer(move |instr| this.resume(instr));
        let link = self.disposable.add(subscription.clone());
        self.state.borrow_mut().suspension = Some(Suspension { subscription, link });
        trace!(fiber = %self.id, "fiber suspended");
        Step::Suspend
    }

    fn resume(&self, instr: Instr) {
        let suspension = self.state.borrow_mut().suspension.take();
        let Some(suspension) = suspension else {
            return;
        };
        suspension.dispose();
        self.state.borrow_mut().instr = Some(instr);
        trace!(fiber = %self.id, "fiber resumed");
        self.run_loop();
    }

    fn done(&self, exit: ErasedExit) {
        let pending = self.state.borrow_mut().pending_exit.take();
        if let Some(first) = pending {
            self.complete(merge_exits(first, exit));
            return;
        }
        if self.scope.is_empty() {
            self.complete(exit);
            return;
        }
        debug!(fiber = %self.id, children = self.scope.len(), "tearing down child fibers");
        let teardown = self
            .scope
            .interrupt_children::<Infallible>()
            .uninterruptible();
        let mut state = self.state.borrow_mut();
        state.pending_exit = Some(exit);
        state.finalizing = true;
        state.instr = Some(teardown.instr);
    }

    fn complete(&self, exit: ErasedExit) {
        if self.exit.borrow().is_some() {
            return;
        }
        let exit: Exit<E, A> = match exit {
            Ok(value) => {
                cast_value::<A>(value).map_err(|defect| Cause::unexpected(self.unix_time(), defect))
            }
            Err(cause) => Err(restore_cause(cause)),
        };
        let frames = {
            let mut state = self.state.borrow_mut();
            state.instr = None;
            state.suspension = None;
            std::mem::take(&mut state.frames)
        };
        drop(frames);
        debug!(fiber = %self.id, outcome = outcome_kind(&exit), "fiber completed");
        let exit = Rc::new(exit);
        *self.exit.borrow_mut() = Some(exit.clone());
        self.disposable.dispose();
        let observers = std::mem::take(&mut *self.observers.borrow_mut());
        for (_, observer) in observers {
            observer(&exit);
        }
    }

    fn current_flags(&self) -> RuntimeFlags {
        *self.state.borrow().flags.current()
    }

    fn current_options(&self) -> RuntimeOptions {
        let state = self.state.borrow();
        RuntimeOptions {
            context: state.context.current().clone(),
            scope: self.scope.clone(),
            fiber_refs: state.fiber_refs.current().clone(),
            flags: *state.flags.current(),
        }
    }

    fn unix_time(&self) -> Time {
        let (context, refs) = {
            let state = self.state.borrow();
            (
                state.context.current().clone(),
                state.fiber_refs.current().clone(),
            )
        };
        get_default_service::<Rc<dyn Clock>>(&context, &refs)
            .map_or_else(system_unix_time, |clock| clock.unix_time())
    }

    fn defect_cause(&self, defect: Defect) -> ErasedCause {
        Cause::unexpected(self.unix_time(), defect)
    }
}

impl<E: Clone + 'static, A: 'static> ChildFiber for FiberRuntime<E, A> {
    fn id(&self) -> FiberId {
        self.id
    }

    fn interrupt_as(&self, by: FiberId) {
        Self::interrupt_as(self, by);
    }

    fn on_done(&self, callback: Box<dyn FnOnce()>) -> Disposable {
        self.add_observer(move |_| callback())
    }

    fn is_done(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

/// Folds the exit of child teardown into the fiber's own exit.
fn merge_exits(first: ErasedExit, teardown: ErasedExit) -> ErasedExit {
    match (first, teardown) {
        (Err(left), Err(right)) => Err(left.combine(right)),
        (Ok(_), Err(right)) => Err(right),
        (first, Ok(_)) => first,
    }
}

fn outcome_kind<E, A>(exit: &Exit<E, A>) -> &'static str {
    match exit {
        Ok(_) => "success",
        Err(cause) if cause.is_interrupted_only() => "interrupted",
        Err(cause) if !cause.defects().is_empty() => "defect",
        Err(_) => "failure",
    }
}
