//! A phased, suspendable request pipeline for reactive REST servers.
//!
//! A request runs through four phases: pre-match, post-match, invoke and post-invoke. Each phase
//! is an immutable chain of [`PhaseHandler`]s contributed by [`Customizer`]s when the
//! [`Pipeline`] is built. Handlers may suspend the request on asynchronous work without blocking
//! the reactor, failures are turned into replies by the exception mappers, and replies may stream
//! their body element by element.

mod body;
mod config;
mod date;
mod dispatcher;
mod fn_trait;
mod handler;
mod operation;
mod pipeline;
mod properties;
mod registry;
mod reply;
mod request;
mod responder;
mod security;
mod worker;

pub mod error;
pub mod exception;
pub mod extract;
pub mod router;
pub mod streaming;
pub mod writer;

pub use body::{BodyReaderCustomizer, RequestBody, ResponseBody};
pub use config::{PipelineConfig, init_tracing};
pub use date::{DateHeaderCustomizer, DateService};
pub use dispatcher::{Dispatcher, Step};
pub use error::{Failure, Fault};
pub use fn_trait::FnTrait;
pub use handler::{
    Continuation, FnHandler, HandlerChain, HandlerOutcome, Phase, PhaseHandler, Resumption, SharedHandler, Suspension,
    handler_fn,
};
pub use operation::{
    BlockingFnOperation, FnOperation, InvokeHandler, Invocation, Operation, SharedOperation, SyncFnOperation, blocking_fn,
    operation_fn, sync_fn,
};
pub use pipeline::{Completion, Pipeline, PipelineBuilder};
pub use properties::Properties;
pub use registry::{
    BodyMode, Customizer, FnCustomizer, OperationDescriptor, OperationId, PhaseChains, PhaseRegistry,
    PhaseRegistryBuilder, Target, customizer_fn,
};
pub use reply::{Reply, ReplyBody};
pub use request::{PathParams, RequestContext, RequestHead, State};
pub use responder::Responder;
pub use security::{
    CHECKED_PROPERTY, IDENTITY_PROPERTY, Identity, IdentityProvider, SecurityCustomizer, SecurityEvaluator,
    SecurityRequirement,
};
pub use worker::WorkerPool;
