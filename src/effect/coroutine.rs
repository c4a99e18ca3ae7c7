//! Sequential composition with `async` blocks.
//!
//! [`Effect::coroutine`] lets a program be written as straight-line code:
//! each `co.bind(effect).await` runs `effect` on the fiber and hands back its
//! outcome as a `Result`. `?` short-circuits on the first failure; matching on
//! the `Err` recovers from it.
//!
//! ```ignore
//! let program = Effect::<String, i32>::coroutine(|co| async move {
//!     let a = co.bind(Effect::of(1)).await?;
//!     let b = match co.bind(Effect::fail("nope".to_string())).await {
//!         Ok(b) => b,
//!         Err(_) => 41,
//!     };
//!     Ok(a + b)
//! });
//! ```
//!
//! The `async` block is only a step function. It is polled with a no-op
//! waker; every pending poll must have bound exactly one effect, which the
//! interpreter runs before polling again. Awaiting anything other than
//! [`Co::bind`], or awaiting two binds at once (say, through a `join`), is a
//! defect.

use super::instruction::{
    cast_value, erase_cause, restore_cause, ErasedCause, ErasedExit, Instr, Instruction, Node,
    Value,
};
use super::Effect;
use crate::types::{Cause, Defect};
use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as TaskContext, Poll, Waker};

#[derive(Default)]
struct Channel {
    request: RefCell<Option<Instr>>,
    response: RefCell<Option<ErasedExit>>,
    defect: RefCell<Option<Defect>>,
}

type Task<E, A> = Rc<RefCell<Pin<Box<dyn Future<Output = Result<A, Cause<E>>>>>>>;

/// Handle used inside [`Effect::coroutine`] to run effects.
pub struct Co<E> {
    channel: Rc<Channel>,
    _marker: PhantomData<fn() -> E>,
}

impl<E> Clone for Co<E> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            _marker: PhantomData,
        }
    }
}

impl<E: Clone + 'static> Co<E> {
    /// Runs `effect` on the current fiber when awaited.
    pub fn bind<B: 'static>(&self, effect: Effect<E, B>) -> Bind<E, B> {
        Bind {
            channel: self.channel.clone(),
            effect: Some(effect.instr),
            _marker: PhantomData,
        }
    }
}

/// The pending outcome of one bound effect.
#[must_use = "a bound effect does nothing unless awaited"]
pub struct Bind<E, B> {
    channel: Rc<Channel>,
    effect: Option<Instr>,
    _marker: PhantomData<fn() -> (E, B)>,
}

impl<E: Clone + 'static, B: 'static> Future for Bind<E, B> {
    type Output = Result<B, Cause<E>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(instr) = this.effect.take() {
            let mut request = this.channel.request.borrow_mut();
            if request.is_some() {
                *this.channel.defect.borrow_mut() =
                    Some(Defect::new("coroutine awaited two bound effects at once"));
            }
            *request = Some(instr);
            return Poll::Pending;
        }
        let response = this.channel.response.borrow_mut().take();
        match response {
            None => Poll::Pending,
            Some(Ok(value)) => match cast_value::<B>(value) {
                Ok(value) => Poll::Ready(Ok(value)),
                // Reported by the step function, which fails the fiber with it.
                Err(defect) => {
                    *this.channel.defect.borrow_mut() = Some(defect);
                    Poll::Pending
                }
            },
            Some(Err(cause)) => Poll::Ready(Err(restore_cause(cause))),
        }
    }
}

impl<E: Clone + 'static, A: 'static> Effect<E, A> {
    /// Builds an effect from straight-line `async` code.
    ///
    /// `body` is called again every time the effect is reached, so the
    /// effect can be run more than once.
    #[must_use]
    pub fn coroutine<F, Fut>(body: F) -> Self
    where
        F: Fn(Co<E>) -> Fut + 'static,
        Fut: Future<Output = Result<A, Cause<E>>> + 'static,
    {
        Self::from_instr(Node::new(Instruction::Lazy(Rc::new(move || {
            let channel = Rc::new(Channel::default());
            let co = Co {
                channel: channel.clone(),
                _marker: PhantomData,
            };
            let future: Pin<Box<dyn Future<Output = Result<A, Cause<E>>>>> = Box::pin(body(co));
            let task: Task<E, A> = Rc::new(RefCell::new(future));
            step(&task, &channel)
        }))))
    }
}

fn step<E: 'static, A: 'static>(task: &Task<E, A>, channel: &Rc<Channel>) -> Result<Instr, Defect> {
    let mut cx = TaskContext::from_waker(Waker::noop());
    let polled = task.borrow_mut().as_mut().poll(&mut cx);
    match polled {
        Poll::Ready(Ok(value)) => Ok(Node::once(Box::new(value) as Value)),
        Poll::Ready(Err(cause)) => Ok(Node::fail_with(erase_cause(cause))),
        Poll::Pending => {
            let defect = channel.defect.borrow_mut().take();
            if let Some(defect) = defect {
                return Err(defect);
            }
            let request = channel.request.borrow_mut().take();
            let Some(instr) = request else {
                return Err(Defect::new(
                    "coroutine suspended on something other than a bound effect",
                ));
            };
            let (on_cause_task, on_cause_channel) = (task.clone(), channel.clone());
            let (on_value_task, on_value_channel) = (task.clone(), channel.clone());
            Ok(Node::new(Instruction::Match(
                instr,
                Rc::new(move |cause: ErasedCause| {
                    *on_cause_channel.response.borrow_mut() = Some(Err(cause));
                    step(&on_cause_task, &on_cause_channel)
                }),
                Rc::new(move |value: Value| {
                    *on_value_channel.response.borrow_mut() = Some(Ok(value));
                    step(&on_value_task, &on_value_channel)
                }),
            )))
        }
    }
}
