//! The handler contract of the pipeline.
//!
//! A [`PhaseHandler`] is called with the [`RequestContext`] and answers with a [`HandlerOutcome`]:
//! it either completed, failed, or *suspended*. Suspension hands a [`Suspension`] back to the
//! driver, which awaits it without blocking and then resumes the context at the next position.
//! Handlers never see futures borrowed from the context, everything a suspension needs is moved
//! into it, and whatever it has to write back is done by its continuation once the driver owns
//! the context again.

use crate::request::RequestContext;
use crate::worker::WorkerPool;
use crate::Failure;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::{Debug, Formatter};
use std::future::{Future, IntoFuture};
use std::ops::Deref;
use std::sync::Arc;

/// A named stage of the request lifecycle, phases always run in declaration order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// before the request is matched, shared by every target
    PreMatch,
    /// after matching, before the operation is invoked
    PostMatch,
    /// the distinguished invocation of the target operation
    Invoke,
    /// after the operation produced a result
    PostInvoke,
}

impl Phase {
    pub const ALL: [Phase; 4] = [Phase::PreMatch, Phase::PostMatch, Phase::Invoke, Phase::PostInvoke];

    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::PreMatch => Some(Phase::PostMatch),
            Phase::PostMatch => Some(Phase::Invoke),
            Phase::Invoke => Some(Phase::PostInvoke),
            Phase::PostInvoke => None,
        }
    }
}

/// A unit of request processing contributed by a customizer.
pub trait PhaseHandler: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

pub type SharedHandler = Arc<dyn PhaseHandler>;

pub enum HandlerOutcome {
    Completed,
    Suspended(Suspension),
    Failed(Failure),
}

impl Debug for HandlerOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerOutcome::Completed => f.write_str("Completed"),
            HandlerOutcome::Suspended(_) => f.write_str("Suspended"),
            HandlerOutcome::Failed(failure) => f.debug_tuple("Failed").field(failure).finish(),
        }
    }
}

impl From<Result<(), Failure>> for HandlerOutcome {
    fn from(result: Result<(), Failure>) -> Self {
        match result {
            Ok(()) => HandlerOutcome::Completed,
            Err(failure) => HandlerOutcome::Failed(failure),
        }
    }
}

impl From<Suspension> for HandlerOutcome {
    fn from(suspension: Suspension) -> Self {
        HandlerOutcome::Suspended(suspension)
    }
}

/// Work applied to the context when a suspension resumes.
pub type Continuation = Box<dyn FnOnce(&mut RequestContext) -> Result<(), Failure> + Send>;

/// The signal a suspended context is resumed with.
pub enum Resumption {
    /// the asynchronous source completed, the continuation (if any) runs before advancing
    Resume(Option<Continuation>),
    /// the asynchronous source failed
    Fail(Failure),
    /// the connection went away, nothing must be written anymore
    Cancel,
}

impl Resumption {
    pub fn resume() -> Self {
        Resumption::Resume(None)
    }

    pub fn resume_with<F>(continuation: F) -> Self
    where
        F: FnOnce(&mut RequestContext) -> Result<(), Failure> + Send + 'static,
    {
        Resumption::Resume(Some(Box::new(continuation)))
    }
}

impl Debug for Resumption {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Resumption::Resume(continuation) => f.debug_tuple("Resume").field(&continuation.is_some()).finish(),
            Resumption::Fail(failure) => f.debug_tuple("Fail").field(failure).finish(),
            Resumption::Cancel => f.write_str("Cancel"),
        }
    }
}

/// An explicit continuation token: the asynchronous work a handler is waiting for.
#[must_use = "a suspension does nothing unless it is handed to the driver"]
pub struct Suspension {
    future: BoxFuture<'static, Resumption>,
}

impl Suspension {
    /// Suspends until `future` resolves to a [`Resumption`].
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Resumption> + Send + 'static,
    {
        Self { future: future.boxed() }
    }

    /// Suspends until `future` completes, a failure fails the request.
    pub fn wait<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), Failure>> + Send + 'static,
    {
        Self::new(async move {
            match future.await {
                Ok(()) => Resumption::resume(),
                Err(failure) => Resumption::Fail(failure),
            }
        })
    }

    /// Suspends until `future` yields a value, then hands the value to `continuation` together with
    /// the context.
    pub fn then<T, F, C>(future: F, continuation: C) -> Self
    where
        T: Send + 'static,
        F: Future<Output = Result<T, Failure>> + Send + 'static,
        C: FnOnce(&mut RequestContext, T) -> Result<(), Failure> + Send + 'static,
    {
        Self::new(async move {
            match future.await {
                Ok(value) => Resumption::resume_with(move |ctx| continuation(ctx, value)),
                Err(failure) => Resumption::Fail(failure),
            }
        })
    }

    /// Runs blocking `task` on the worker pool, `continuation` runs back on the driver.
    pub fn blocking<T, B, C>(workers: &WorkerPool, task: B, continuation: C) -> Self
    where
        T: Send + 'static,
        B: FnOnce() -> Result<T, Failure> + Send + 'static,
        C: FnOnce(&mut RequestContext, T) -> Result<(), Failure> + Send + 'static,
    {
        Self::then(workers.dispatch(task), continuation)
    }
}

impl IntoFuture for Suspension {
    type Output = Resumption;
    type IntoFuture = BoxFuture<'static, Resumption>;

    fn into_future(self) -> Self::IntoFuture {
        self.future
    }
}

impl Debug for Suspension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Suspension")
    }
}

/// A handler built from a closure.
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> PhaseHandler for FnHandler<F>
where
    F: Fn(&mut RequestContext) -> HandlerOutcome + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        (self.f)(ctx)
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Creates a shared handler from a closure.
///
/// # Example
/// ```
/// use micro_rest::{handler_fn, HandlerOutcome, PhaseHandler};
///
/// let handler = handler_fn("tag", |ctx| {
///     ctx.properties_mut().insert("tagged", true);
///     HandlerOutcome::Completed
/// });
/// assert_eq!(handler.name(), "tag");
/// ```
pub fn handler_fn<F>(name: &'static str, f: F) -> SharedHandler
where
    F: Fn(&mut RequestContext) -> HandlerOutcome + Send + Sync + 'static,
{
    Arc::new(FnHandler { name, f })
}

/// An immutable, ordered handler array shared by every request of a target.
#[derive(Clone)]
pub struct HandlerChain {
    handlers: Arc<[SharedHandler]>,
}

impl HandlerChain {
    pub fn new(handlers: Vec<SharedHandler>) -> Self {
        Self { handlers: handlers.into() }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|handler| handler.name()).collect()
    }
}

impl Deref for HandlerChain {
    type Target = [SharedHandler];

    fn deref(&self) -> &Self::Target {
        &self.handlers
    }
}

impl Debug for HandlerChain {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
