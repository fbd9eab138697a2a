//! Target operations and the handler that invokes them.

use crate::error::CompletionError;
use crate::extract::{Call, FromCall};
use crate::fn_trait::FnTrait;
use crate::handler::{HandlerOutcome, PhaseHandler, Suspension};
use crate::reply::Reply;
use crate::request::{RequestContext, State};
use crate::responder::Responder;
use crate::Failure;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// How an operation produces its reply.
pub enum Invocation {
    /// the reply is available right away
    Ready(Result<Reply, Failure>),
    /// the reply is computed asynchronously, the context suspends until it is ready
    Pending(BoxFuture<'static, Result<Reply, Failure>>),
    /// the reply must be computed off the reactor, on the worker pool
    Blocking(Box<dyn FnOnce() -> Result<Reply, Failure> + Send>),
}

impl Debug for Invocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Invocation::Ready(result) => f.debug_tuple("Ready").field(&result.as_ref().map(Reply::status_code)).finish(),
            Invocation::Pending(_) => f.write_str("Pending"),
            Invocation::Blocking(_) => f.write_str("Blocking"),
        }
    }
}

/// The application logic a route resolves to.
pub trait Operation: Send + Sync {
    fn invoke(&self, call: Call) -> Invocation;
}

impl<F> Operation for F
where
    F: Fn(Call) -> Invocation + Send + Sync,
{
    fn invoke(&self, call: Call) -> Invocation {
        (self)(call)
    }
}

pub type SharedOperation = Arc<dyn Operation>;

/// An asynchronous operation built from a function, see [`operation_fn`].
pub struct FnOperation<F, Args> {
    f: F,
    _phantom: PhantomData<fn(Args)>,
}

/// A synchronous operation which runs on the driver, see [`sync_fn`].
pub struct SyncFnOperation<F, Args> {
    f: F,
    _phantom: PhantomData<fn(Args)>,
}

/// A blocking operation which runs on the worker pool, see [`blocking_fn`].
pub struct BlockingFnOperation<F, Args> {
    f: Arc<F>,
    _phantom: PhantomData<fn(Args)>,
}

/// Adapts an async function whose arguments implement [`FromCall`].
///
/// # Example
/// ```
/// use micro_rest::extract::Path;
/// use micro_rest::operation_fn;
///
/// async fn hello(Path(name): Path<std::collections::HashMap<String, String>>) -> String {
///     format!("hello {}", name["name"])
/// }
///
/// let _operation = operation_fn(hello);
/// ```
pub fn operation_fn<F, Args>(f: F) -> FnOperation<F, Args>
where
    F: FnTrait<Args> + Send + Sync,
    F::Output: Future + Send + 'static,
    <F::Output as Future>::Output: Responder,
    Args: FromCall,
{
    FnOperation { f, _phantom: PhantomData }
}

/// Adapts a plain function, it must not block.
pub fn sync_fn<F, Args>(f: F) -> SyncFnOperation<F, Args>
where
    F: FnTrait<Args> + Send + Sync,
    F::Output: Responder,
    Args: FromCall,
{
    SyncFnOperation { f, _phantom: PhantomData }
}

/// Adapts a function that blocks, it runs on the worker pool while the request is suspended.
pub fn blocking_fn<F, Args>(f: F) -> BlockingFnOperation<F, Args>
where
    F: FnTrait<Args> + Send + Sync + 'static,
    F::Output: Responder,
    Args: FromCall + Send + 'static,
{
    BlockingFnOperation { f: Arc::new(f), _phantom: PhantomData }
}

impl<F, Args> Operation for FnOperation<F, Args>
where
    F: FnTrait<Args> + Send + Sync,
    F::Output: Future + Send + 'static,
    <F::Output as Future>::Output: Responder,
    Args: FromCall,
{
    fn invoke(&self, mut call: Call) -> Invocation {
        let args = match Args::from_call(&mut call) {
            Ok(args) => args,
            Err(failure) => return Invocation::Ready(Err(failure)),
        };
        let future = self.f.call(args);
        Invocation::Pending(async move { future.await.into_reply() }.boxed())
    }
}

impl<F, Args> Operation for SyncFnOperation<F, Args>
where
    F: FnTrait<Args> + Send + Sync,
    F::Output: Responder,
    Args: FromCall,
{
    fn invoke(&self, mut call: Call) -> Invocation {
        Invocation::Ready(Args::from_call(&mut call).and_then(|args| self.f.call(args).into_reply()))
    }
}

impl<F, Args> Operation for BlockingFnOperation<F, Args>
where
    F: FnTrait<Args> + Send + Sync + 'static,
    F::Output: Responder,
    Args: FromCall + Send + 'static,
{
    fn invoke(&self, mut call: Call) -> Invocation {
        let args = match Args::from_call(&mut call) {
            Ok(args) => args,
            Err(failure) => return Invocation::Ready(Err(failure)),
        };
        let f = Arc::clone(&self.f);
        Invocation::Blocking(Box::new(move || f.call(args).into_reply()))
    }
}

/// The single handler of the invoke phase.
///
/// Failures of pending operations are wrapped in [`CompletionError`], the exception mappers unwrap
/// them again.
pub struct InvokeHandler {
    operation: SharedOperation,
}

impl InvokeHandler {
    pub fn new(operation: SharedOperation) -> Self {
        Self { operation }
    }
}

impl PhaseHandler for InvokeHandler {
    fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        ctx.set_state(State::Invoking);
        let call = Call::from_context(ctx);

        match self.operation.invoke(call) {
            Invocation::Ready(Ok(reply)) => {
                ctx.set_result(reply);
                HandlerOutcome::Completed
            }
            Invocation::Ready(Err(failure)) => HandlerOutcome::Failed(failure),
            Invocation::Pending(future) => {
                trace!(request_id = ctx.id(), "operation pending");
                let future = future.map(|result| result.map_err(CompletionError::wrap));
                Suspension::then(future, store_reply).into()
            }
            Invocation::Blocking(task) => {
                trace!(request_id = ctx.id(), "operation dispatched to worker pool");
                Suspension::blocking(ctx.workers(), task, store_reply).into()
            }
        }
    }

    fn name(&self) -> &str {
        "invoke"
    }
}

fn store_reply(ctx: &mut RequestContext, reply: Reply) -> Result<(), Failure> {
    ctx.set_result(reply);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::error::WebError;
    use crate::extract::Query;
    use crate::handler::Resumption;
    use crate::worker::WorkerPool;
    use http::{Request, StatusCode};
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    fn context(uri: &str) -> RequestContext {
        RequestContext::new(Request::builder().uri(uri).body(RequestBody::empty()).unwrap(), WorkerPool::new(1))
    }

    async fn resume(outcome: HandlerOutcome, ctx: &mut RequestContext) -> Result<(), Failure> {
        let HandlerOutcome::Suspended(suspension) = outcome else {
            panic!("expected suspension, got {outcome:?}");
        };
        match suspension.await {
            Resumption::Resume(Some(continuation)) => continuation(ctx),
            Resumption::Fail(failure) => Err(failure),
            other => panic!("unexpected resumption {other:?}"),
        }
    }

    #[test]
    fn sync_operation_completes_inline() {
        let handler = InvokeHandler::new(Arc::new(sync_fn(|Query(g): Query<Greeting>| format!("hi {}", g.name))));
        let mut ctx = context("/?name=bob");

        assert!(matches!(handler.handle(&mut ctx), HandlerOutcome::Completed));
        assert_eq!(ctx.state(), State::Invoking);
        assert_eq!(ctx.result().unwrap().status_code(), StatusCode::OK);
    }

    #[test]
    fn extraction_failure_fails_handler() {
        let handler = InvokeHandler::new(Arc::new(sync_fn(|Query(g): Query<Greeting>| g.name)));
        let mut ctx = context("/");
        let HandlerOutcome::Failed(failure) = handler.handle(&mut ctx) else {
            panic!("expected failure");
        };
        assert!(failure.is::<WebError>());
    }

    #[tokio::test]
    async fn async_operation_suspends() {
        async fn created() -> (StatusCode, &'static str) {
            (StatusCode::CREATED, "done")
        }
        let handler = InvokeHandler::new(Arc::new(operation_fn(created)));
        let mut ctx = context("/");

        let outcome = handler.handle(&mut ctx);
        resume(outcome, &mut ctx).await.unwrap();
        assert_eq!(ctx.result().unwrap().status_code(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn async_failure_is_wrapped() {
        async fn broken() -> Result<String, WebError> {
            Err(WebError::bad_request("broken"))
        }
        let handler = InvokeHandler::new(Arc::new(operation_fn(broken)));
        let mut ctx = context("/");

        let failure = resume(handler.handle(&mut ctx), &mut ctx).await.unwrap_err();
        assert!(failure.is::<CompletionError>());
        assert!(failure.cause().unwrap().is::<WebError>());
    }

    #[tokio::test]
    async fn blocking_operation_runs_on_worker() {
        let handler = InvokeHandler::new(Arc::new(blocking_fn(|| {
            std::thread::sleep(std::time::Duration::from_millis(5));
            "slept"
        })));
        let mut ctx = context("/");

        resume(handler.handle(&mut ctx), &mut ctx).await.unwrap();
        assert!(ctx.result().is_some());
    }

    #[test]
    fn closure_operation() {
        let operation = |_call: Call| Invocation::Ready(Ok(Reply::status(StatusCode::ACCEPTED)));
        let handler = InvokeHandler::new(Arc::new(operation));
        let mut ctx = context("/");
        assert!(matches!(handler.handle(&mut ctx), HandlerOutcome::Completed));
        assert_eq!(ctx.result().unwrap().status_code(), StatusCode::ACCEPTED);
    }
}
