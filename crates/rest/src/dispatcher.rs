//! The re-entrant run loop of the pipeline.
//!
//! The dispatcher walks the handler chains of a [`RequestContext`] phase by phase. It never
//! awaits anything itself: when a handler suspends, [`Dispatcher::run`] returns the
//! [`Suspension`] to its caller, and once that resolves the caller hands the outcome back through
//! [`Dispatcher::resume`], which continues right after the handler that suspended.

use crate::error::{IllegalResume, NotFound};
use crate::handler::{HandlerChain, HandlerOutcome, Phase, Resumption, Suspension};
use crate::request::{RequestContext, State};
use crate::router::Matcher;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::trace;

/// Where the dispatcher stopped.
pub enum Step {
    /// a handler is waiting for asynchronous work
    Suspended(Suspension),
    /// the context carries a failure which must be mapped
    Failed,
    /// no target matched, the context carries a [`NotFound`] failure
    NoRoute,
    /// every phase ran or a handler aborted, the result is ready to be written
    Finalize,
    /// the connection went away while suspended
    Cancelled,
}

impl Debug for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Suspended(_) => f.write_str("Suspended"),
            Step::Failed => f.write_str("Failed"),
            Step::NoRoute => f.write_str("NoRoute"),
            Step::Finalize => f.write_str("Finalize"),
            Step::Cancelled => f.write_str("Cancelled"),
        }
    }
}

pub struct Dispatcher {
    pre_match: HandlerChain,
    matcher: Arc<dyn Matcher>,
}

impl Dispatcher {
    pub fn new(pre_match: HandlerChain, matcher: Arc<dyn Matcher>) -> Self {
        Self { pre_match, matcher }
    }

    /// Runs a fresh context from the first pre-match handler.
    pub fn start(&self, ctx: &mut RequestContext) -> Step {
        ctx.enter_phase(Phase::PreMatch);
        ctx.set_state(State::HandlerRun);
        self.run(ctx)
    }

    /// Continues a suspended context after the handler that suspended it.
    pub fn resume(&self, ctx: &mut RequestContext, resumption: Resumption) -> Result<Step, IllegalResume> {
        if !ctx.is_suspended() {
            return Err(IllegalResume { request_id: ctx.id() });
        }
        ctx.set_suspended(false);

        match resumption {
            Resumption::Cancel => {
                trace!(request_id = ctx.id(), "cancelled while suspended");
                ctx.set_state(State::Cancelled);
                Ok(Step::Cancelled)
            }
            Resumption::Fail(failure) => {
                ctx.fail(failure);
                Ok(Step::Failed)
            }
            Resumption::Resume(continuation) => {
                ctx.set_state(State::HandlerRun);
                if let Some(continuation) = continuation
                    && let Err(failure) = continuation(ctx)
                {
                    ctx.fail(failure);
                    return Ok(Step::Failed);
                }
                if let Some(step) = Self::check(ctx) {
                    return Ok(step);
                }
                ctx.advance();
                Ok(self.run(ctx))
            }
        }
    }

    /// Runs from the stored phase and position until the context suspends, fails or is done.
    pub fn run(&self, ctx: &mut RequestContext) -> Step {
        loop {
            let phase = ctx.phase();
            let Some(chain) = self.chain(ctx, phase) else {
                return self.no_route(ctx);
            };

            while let Some(handler) = chain.get(ctx.position()) {
                trace!(request_id = ctx.id(), ?phase, position = ctx.position(), handler = handler.name(), "run handler");
                match handler.handle(ctx) {
                    HandlerOutcome::Completed => {}
                    HandlerOutcome::Suspended(suspension) => {
                        ctx.set_suspended(true);
                        ctx.set_state(State::Suspended);
                        return Step::Suspended(suspension);
                    }
                    HandlerOutcome::Failed(failure) => {
                        ctx.fail(failure);
                        return Step::Failed;
                    }
                }
                if let Some(step) = Self::check(ctx) {
                    return step;
                }
                ctx.advance();
            }

            match phase.next() {
                Some(next) => {
                    if phase == Phase::PreMatch && !self.bind(ctx) {
                        return self.no_route(ctx);
                    }
                    ctx.enter_phase(next);
                    ctx.set_state(State::HandlerRun);
                }
                None => {
                    ctx.set_state(State::Finalizing);
                    return Step::Finalize;
                }
            }
        }
    }

    /// A failure recorded on the context, or an abort, ends the current chain.
    fn check(ctx: &mut RequestContext) -> Option<Step> {
        if ctx.failure().is_some() {
            ctx.set_state(State::Failed);
            return Some(Step::Failed);
        }
        if ctx.is_aborted() {
            ctx.set_state(State::Finalizing);
            return Some(Step::Finalize);
        }
        None
    }

    fn chain(&self, ctx: &RequestContext, phase: Phase) -> Option<HandlerChain> {
        match phase {
            Phase::PreMatch => Some(self.pre_match.clone()),
            _ => ctx.target()?.chains().get(phase).cloned(),
        }
    }

    fn bind(&self, ctx: &mut RequestContext) -> bool {
        ctx.set_state(State::Matching);
        match self.matcher.matches(ctx.head()) {
            Some(matched) => {
                trace!(request_id = ctx.id(), operation = matched.target.descriptor().name(), "matched");
                ctx.bind(matched.target, matched.params);
                true
            }
            None => false,
        }
    }

    fn no_route(&self, ctx: &mut RequestContext) -> Step {
        let failure = NotFound { method: ctx.method().clone(), path: ctx.head().path().to_string() };
        ctx.fail(failure.into());
        Step::NoRoute
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("pre_match", &self.pre_match).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::extract::Call;
    use crate::handler::{SharedHandler, handler_fn};
    use crate::operation::Invocation;
    use crate::registry::{Customizer, OperationDescriptor, PhaseRegistry};
    use crate::reply::Reply;
    use crate::router::{Router, get};
    use crate::worker::WorkerPool;
    use crate::Failure;
    use http::{Method, Request, StatusCode};
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn record(log: &Log, name: &'static str) -> SharedHandler {
        let log = Arc::clone(log);
        handler_fn(name, move |_ctx| {
            log.lock().unwrap().push(name.to_string());
            HandlerOutcome::Completed
        })
    }

    fn suspend(log: &Log, name: &'static str) -> SharedHandler {
        let log = Arc::clone(log);
        handler_fn(name, move |_ctx| {
            log.lock().unwrap().push(name.to_string());
            Suspension::new(async { Resumption::resume() }).into()
        })
    }

    struct Recording {
        log: Log,
        suspend_post_match: bool,
    }

    impl Customizer for Recording {
        fn pre_match(&self) -> Vec<SharedHandler> {
            vec![record(&self.log, "pre")]
        }

        fn contribute(&self, phase: Phase, _target: &OperationDescriptor) -> Vec<SharedHandler> {
            match phase {
                Phase::PostMatch if self.suspend_post_match => {
                    vec![record(&self.log, "A"), suspend(&self.log, "B"), record(&self.log, "C")]
                }
                Phase::PostMatch => vec![record(&self.log, "A")],
                Phase::PostInvoke => vec![record(&self.log, "post")],
                _ => vec![],
            }
        }
    }

    fn dispatcher(log: &Log, suspend_post_match: bool) -> Dispatcher {
        let registry = PhaseRegistry::builder()
            .add_last(Recording { log: Arc::clone(log), suspend_post_match })
            .build();
        let invoked = Arc::clone(log);
        let router = Router::builder()
            .route(
                "/items/{id}",
                get(move |_call: Call| {
                    invoked.lock().unwrap().push("invoke".to_string());
                    Invocation::Ready(Ok(Reply::text("item")))
                }),
            )
            .build(&registry)
            .unwrap();
        Dispatcher::new(registry.pre_match().clone(), Arc::new(router))
    }

    fn context(uri: &str) -> RequestContext {
        let request = Request::builder().method(Method::GET).uri(uri).body(RequestBody::empty()).unwrap();
        RequestContext::new(request, WorkerPool::new(1))
    }

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn phases_run_in_order() {
        let log = log();
        let dispatcher = dispatcher(&log, false);
        let mut ctx = context("/items/1");

        assert!(matches!(dispatcher.start(&mut ctx), Step::Finalize));
        assert_eq!(entries(&log), vec!["pre", "A", "invoke", "post"]);
        assert_eq!(ctx.state(), State::Finalizing);
        assert_eq!(ctx.path_params().get("id"), Some("1"));
        assert_eq!(ctx.result().unwrap().status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn resume_continues_after_suspending_handler() {
        let log = log();
        let dispatcher = dispatcher(&log, true);
        let mut ctx = context("/items/1");

        let Step::Suspended(suspension) = dispatcher.start(&mut ctx) else {
            panic!("expected suspension");
        };
        assert!(ctx.is_suspended());
        assert_eq!(ctx.state(), State::Suspended);
        assert_eq!(ctx.phase(), Phase::PostMatch);
        assert_eq!(ctx.position(), 1);
        assert_eq!(entries(&log), vec!["pre", "A", "B"]);

        let step = dispatcher.resume(&mut ctx, suspension.await).unwrap();
        assert!(matches!(step, Step::Finalize));
        // B is not run again
        assert_eq!(entries(&log), vec!["pre", "A", "B", "C", "invoke", "post"]);
    }

    #[test]
    fn resume_requires_suspension() {
        let log = log();
        let dispatcher = dispatcher(&log, false);
        let mut ctx = context("/items/1");
        let result = dispatcher.resume(&mut ctx, Resumption::resume());
        assert!(matches!(result, Err(IllegalResume { .. })));
    }

    #[tokio::test]
    async fn resume_with_failure_or_cancel() {
        let log = log();
        let dispatcher = dispatcher(&log, true);

        let mut ctx = context("/items/1");
        let Step::Suspended(_) = dispatcher.start(&mut ctx) else { panic!("expected suspension") };
        let step = dispatcher.resume(&mut ctx, Resumption::Fail(Failure::opaque("lost"))).unwrap();
        assert!(matches!(step, Step::Failed));
        assert_eq!(ctx.state(), State::Failed);

        let mut ctx = context("/items/2");
        let Step::Suspended(_) = dispatcher.start(&mut ctx) else { panic!("expected suspension") };
        let step = dispatcher.resume(&mut ctx, Resumption::Cancel).unwrap();
        assert!(matches!(step, Step::Cancelled));
        assert_eq!(ctx.state(), State::Cancelled);
        assert!(!entries(&log).contains(&"C".to_string()));
    }

    #[test]
    fn no_route_skips_target_handlers() {
        let log = log();
        let dispatcher = dispatcher(&log, false);
        let mut ctx = context("/missing");

        assert!(matches!(dispatcher.start(&mut ctx), Step::NoRoute));
        assert_eq!(entries(&log), vec!["pre"]);
        assert!(ctx.failure().unwrap().is::<NotFound>());
        assert!(ctx.target().is_none());
    }

    #[test]
    fn failure_abandons_chain() {
        let log = log();
        let failing = handler_fn("fail", |ctx| {
            ctx.fail(Failure::opaque("denied"));
            HandlerOutcome::Completed
        });
        let dispatcher = Dispatcher {
            pre_match: HandlerChain::new(vec![failing, record(&log, "never")]),
            ..dispatcher(&log, false)
        };
        let mut ctx = context("/items/1");

        assert!(matches!(dispatcher.start(&mut ctx), Step::Failed));
        assert!(entries(&log).is_empty());
        assert_eq!(ctx.state(), State::Failed);
    }

    #[test]
    fn abort_skips_remaining_phases() {
        let log = log();
        let aborting = handler_fn("abort", |ctx| {
            ctx.abort_with(Reply::status(StatusCode::NO_CONTENT));
            HandlerOutcome::Completed
        });
        let dispatcher = Dispatcher {
            pre_match: HandlerChain::new(vec![aborting, record(&log, "never")]),
            ..dispatcher(&log, false)
        };
        let mut ctx = context("/items/1");

        assert!(matches!(dispatcher.start(&mut ctx), Step::Finalize));
        assert!(entries(&log).is_empty());
        assert_eq!(ctx.result().unwrap().status_code(), StatusCode::NO_CONTENT);
    }
}
