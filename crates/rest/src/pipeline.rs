//! The driver: runs a request through the dispatcher and writes the response.
//!
//! [`Pipeline::process`] owns the [`RequestContext`] of one request. It starts the dispatcher,
//! awaits every suspension it hands back while watching the connection's [`CancellationToken`],
//! maps failures to replies and finally emits the reply through a [`ResponseWriter`].
//!
//! # Example
//!
//! ```
//! use http::Request;
//! use micro_rest::router::{get, Router};
//! use micro_rest::writer::MemoryWriter;
//! use micro_rest::{operation_fn, Pipeline, RequestBody};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn hello() -> &'static str {
//!     "hello"
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let pipeline = Pipeline::builder()
//!     .routes(Router::builder().route("/", get(operation_fn(hello))))
//!     .build()
//!     .unwrap();
//!
//! let request = Request::builder().uri("/").body(RequestBody::empty()).unwrap();
//! let mut writer = MemoryWriter::new();
//! let completion = pipeline.process(request, &mut writer, &CancellationToken::new()).await.unwrap();
//!
//! assert_eq!(completion.status, http::StatusCode::OK);
//! assert_eq!(writer.body(), "hello");
//! # }
//! ```

use crate::body::{BodyReaderCustomizer, RequestBody, ResponseBody};
use crate::config::PipelineConfig;
use crate::date::{self, DateHeaderCustomizer};
use crate::dispatcher::{Dispatcher, Step};
use crate::error::{BuildError, Fault, PipelineError};
use crate::exception::{ExceptionMapper, ExceptionMappers, ExceptionMappersBuilder, Mapping, fallback_reply, map_failure};
use crate::handler::Resumption;
use crate::registry::{Customizer, PhaseRegistry, Target};
use crate::reply::ReplyBody;
use crate::request::{RequestContext, State};
use crate::router::{Matcher, Router, RouterBuilder};
use crate::security::{IdentityProvider, SecurityCustomizer, SecurityRequirement};
use crate::streaming::StreamingEmitter;
use crate::worker::WorkerPool;
use crate::writer::{ChannelWriter, ResponseWriter, response_head};
use crate::Failure;
use futures::StreamExt;
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// How a request ended once its response was completely written.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Completion {
    pub status: StatusCode,
    /// body bytes handed to the writer
    pub bytes_written: u64,
    /// a failure reached no exception mapper and the generic reply was sent
    pub unmapped: bool,
}

enum Emitted {
    Done(Completion),
    /// the reply failed before anything was committed, it can still be replaced
    Rejected(Failure),
}

pub struct Pipeline {
    dispatcher: Dispatcher,
    router: Arc<Router>,
    mappers: ExceptionMappers,
    workers: WorkerPool,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Every target in registration order.
    pub fn targets(&self) -> &[Arc<Target>] {
        self.router.targets()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// Processes one request and writes its response to `writer`.
    ///
    /// When `cancel` fires while the request is suspended nothing more is written, the writer is
    /// aborted and [`PipelineError::Cancelled`] is returned.
    pub async fn process<W>(
        &self,
        request: Request<RequestBody>,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Completion, PipelineError>
    where
        W: ResponseWriter + ?Sized,
    {
        let mut ctx = RequestContext::new(request, self.workers.clone());
        let span = info_span!("request", id = ctx.id(), method = %ctx.method(), path = ctx.head().path());

        async move {
            let result = self.drive(&mut ctx, writer, cancel).await;
            match &result {
                Ok(completion) => debug!(
                    status = completion.status.as_u16(),
                    bytes_written = completion.bytes_written,
                    unmapped = completion.unmapped,
                    "request completed"
                ),
                Err(e) => info!(cause = %e, state = ?ctx.state(), "request ended without a complete response"),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Processes `request` on its own task, the response is returned as soon as its head is
    /// committed while the body keeps streaming.
    pub async fn handle(
        self: &Arc<Self>,
        request: Request<RequestBody>,
        cancel: CancellationToken,
    ) -> Result<Response<ResponseBody>, PipelineError> {
        let (mut writer, head, body) = ChannelWriter::new(self.config.response_channel_capacity);
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = pipeline.process(request, &mut writer, &cancel).await {
                warn!(cause = %e, "request processing failed");
            }
        });

        let head = head.await.map_err(|_canceled| PipelineError::NoResponse)?;
        let (parts, ()) = head.into_parts();
        Ok(Response::from_parts(parts, body))
    }

    async fn drive<W>(&self, ctx: &mut RequestContext, writer: &mut W, cancel: &CancellationToken) -> Result<Completion, PipelineError>
    where
        W: ResponseWriter + ?Sized,
    {
        let mut step = self.dispatcher.start(ctx);
        let mut replaced = false;

        loop {
            step = match step {
                Step::Suspended(suspension) => {
                    let resumption = select! {
                        biased;
                        () = cancel.cancelled() => Resumption::Cancel,
                        resumption = suspension.into_future() => resumption,
                    };
                    match self.dispatcher.resume(ctx, resumption) {
                        Ok(step) => step,
                        Err(e) => {
                            ctx.fail(e.into());
                            Step::Failed
                        }
                    }
                }
                Step::Failed | Step::NoRoute => self.recover(ctx, cancel).await,
                Step::Cancelled => return cancelled(ctx, writer).await,
                Step::Finalize => match self.emit(ctx, writer, cancel).await? {
                    Emitted::Done(completion) => return Ok(completion),
                    Emitted::Rejected(failure) if !replaced => {
                        replaced = true;
                        ctx.fail(failure);
                        Step::Failed
                    }
                    Emitted::Rejected(failure) => {
                        error!(cause = %failure, "reply of exception mapper failed before commit");
                        ctx.mark_unmapped();
                        ctx.set_result(fallback_reply());
                        Step::Finalize
                    }
                },
            };
        }
    }

    /// Replaces the failure of `ctx` with a mapped reply.
    async fn recover(&self, ctx: &mut RequestContext, cancel: &CancellationToken) -> Step {
        let Some(failure) = ctx.take_failure() else {
            error!("failed without a failure");
            ctx.mark_unmapped();
            ctx.set_result(fallback_reply());
            ctx.set_state(State::Finalizing);
            return Step::Finalize;
        };

        debug!(failure_type = failure.type_name(), cause = %failure, "map failure");
        let reply = match map_failure(&self.mappers, &failure, ctx) {
            Mapping::Ready(reply) => reply,
            Mapping::Unmapped(reply) => {
                ctx.mark_unmapped();
                reply
            }
            Mapping::Pending(future) => {
                let mapped = select! {
                    biased;
                    () = cancel.cancelled() => None,
                    mapped = future => Some(mapped),
                };
                match mapped {
                    None => {
                        ctx.set_state(State::Cancelled);
                        return Step::Cancelled;
                    }
                    Some(Ok(reply)) => reply,
                    Some(Err(e)) => {
                        error!(cause = %e, original = %failure, "exception mapper failed");
                        ctx.mark_unmapped();
                        fallback_reply()
                    }
                }
            }
        };

        ctx.set_result(reply);
        ctx.set_state(State::Finalizing);
        Step::Finalize
    }

    async fn emit<W>(&self, ctx: &mut RequestContext, writer: &mut W, cancel: &CancellationToken) -> Result<Emitted, PipelineError>
    where
        W: ResponseWriter + ?Sized,
    {
        let reply = ctx.take_result().unwrap_or_else(|| {
            error!("finished without a reply");
            ctx.mark_unmapped();
            fallback_reply()
        });
        let (status, mut headers, body) = reply.into_parts();
        if self.config.date_header {
            date::stamp(&mut headers);
        }

        let bytes_written = match body {
            ReplyBody::Stream(emitter) => return self.emit_stream(ctx, status, headers, emitter, writer, cancel).await,
            ReplyBody::Empty => {
                if allows_body(status) {
                    headers.insert(CONTENT_LENGTH, HeaderValue::from(0_u64));
                }
                writer.write_head(response_head(status, headers)).await?;
                0
            }
            ReplyBody::Full(bytes) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                writer.write_head(response_head(status, headers)).await?;
                let len = bytes.len() as u64;
                writer.write_chunk(bytes).await?;
                len
            }
        };

        writer.finish().await?;
        ctx.set_state(State::Terminal);
        Ok(Emitted::Done(Completion { status, bytes_written, unmapped: ctx.is_unmapped() }))
    }

    /// Pulls the first element before committing, so a failing source can still be mapped.
    async fn emit_stream<W>(
        &self,
        ctx: &mut RequestContext,
        status: StatusCode,
        headers: HeaderMap,
        emitter: StreamingEmitter,
        writer: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Emitted, PipelineError>
    where
        W: ResponseWriter + ?Sized,
    {
        let opening = emitter.open(self.config.stream_demand, self.config.default_framing);
        let opened = select! {
            biased;
            () = cancel.cancelled() => None,
            opened = opening => Some(opened),
        };
        let mut open = match opened {
            None => return cancelled(ctx, writer).await,
            Some(Ok(open)) => open,
            Some(Err(failure)) => return Ok(Emitted::Rejected(failure)),
        };

        let first = select! {
            biased;
            () = cancel.cancelled() => None,
            first = open.chunks.next() => Some(first),
        };
        let first = match first {
            None => return cancelled(ctx, writer).await,
            Some(Some(Err(failure))) => return Ok(Emitted::Rejected(failure)),
            Some(Some(Ok(chunk))) => Some(chunk),
            Some(None) => None,
        };

        let (status, headers) = open.commit(status, headers);
        writer.write_head(response_head(status, headers)).await?;

        let mut bytes_written = 0_u64;
        if let Some(chunk) = first {
            bytes_written += chunk.len() as u64;
            writer.write_chunk(chunk).await?;
        }

        loop {
            let next = select! {
                biased;
                () = cancel.cancelled() => return cancelled(ctx, writer).await,
                next = open.chunks.next() => next,
            };
            match next {
                None => break,
                Some(Ok(chunk)) => {
                    bytes_written += chunk.len() as u64;
                    writer.write_chunk(chunk).await?;
                }
                Some(Err(failure)) => {
                    error!(cause = %failure, bytes_written, "response stream failed after commit");
                    writer.abort().await;
                    ctx.set_state(State::Terminal);
                    return Err(PipelineError::StreamAborted { source: failure });
                }
            }
        }

        writer.finish().await?;
        ctx.set_state(State::Terminal);
        Ok(Emitted::Done(Completion { status, bytes_written, unmapped: ctx.is_unmapped() }))
    }
}

async fn cancelled<W, T>(ctx: &mut RequestContext, writer: &mut W) -> Result<T, PipelineError>
where
    W: ResponseWriter + ?Sized,
{
    debug!(phase = ?ctx.phase(), position = ctx.position(), "connection cancelled");
    ctx.set_state(State::Cancelled);
    writer.abort().await;
    Err(PipelineError::Cancelled)
}

fn allows_body(status: StatusCode) -> bool {
    !(status.is_informational() || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED)
}

impl Debug for Pipeline {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("dispatcher", &self.dispatcher)
            .field("router", &self.router)
            .field("mappers", &self.mappers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

pub struct PipelineBuilder {
    routes: Option<RouterBuilder>,
    identity_provider: Option<Arc<dyn IdentityProvider>>,
    customizers: Vec<Arc<dyn Customizer>>,
    mappers: ExceptionMappersBuilder,
    config: PipelineConfig,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            routes: None,
            identity_provider: None,
            customizers: vec![],
            mappers: ExceptionMappers::builder(),
            config: PipelineConfig::default(),
        }
    }

    pub fn routes(mut self, routes: RouterBuilder) -> Self {
        self.routes = Some(routes);
        self
    }

    pub fn identity_provider<P: IdentityProvider + 'static>(mut self, provider: P) -> Self {
        self.identity_provider = Some(Arc::new(provider));
        self
    }

    /// Adds a customizer after the built-in security and body reading ones.
    pub fn customizer<C: Customizer + 'static>(mut self, customizer: C) -> Self {
        self.customizers.push(Arc::new(customizer));
        self
    }

    pub fn mapper<E: Fault, M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        self.mappers = self.mappers.register::<E, M>(priority, mapper);
        self
    }

    pub fn unwrap_mapper<E: Fault, M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        self.mappers = self.mappers.register_unwrap::<E, M>(priority, mapper);
        self
    }

    pub fn mapper_any<M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        self.mappers = self.mappers.register_any(priority, mapper);
        self
    }

    pub fn unwrap_type<E: Fault>(mut self) -> Self {
        self.mappers = self.mappers.unwrap_type::<E>();
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;
        let routes = self.routes.ok_or(BuildError::MissingRoutes)?;

        let mut registry = PhaseRegistry::builder()
            .add_last(SecurityCustomizer::new(self.identity_provider.clone()))
            .add_last(BodyReaderCustomizer::new(self.config.max_body_size));
        for customizer in self.customizers {
            registry = registry.add_shared_last(customizer);
        }
        if self.config.date_header {
            registry = registry.add_last(DateHeaderCustomizer);
        }
        let registry = registry.build();

        let router = Arc::new(routes.build(&registry)?);
        if self.identity_provider.is_none()
            && let Some(target) = router.targets().iter().find(|target| needs_identity(target.descriptor().security()))
        {
            return Err(BuildError::MissingIdentityProvider { operation: target.descriptor().name().to_string() });
        }

        let matcher: Arc<dyn Matcher> = Arc::<Router>::clone(&router);
        let dispatcher = Dispatcher::new(registry.pre_match().clone(), matcher);
        info!(targets = router.targets().len(), pre_match = ?registry.pre_match(), "pipeline built");

        Ok(Pipeline {
            dispatcher,
            router,
            mappers: self.mappers.with_defaults().build(),
            workers: WorkerPool::new(self.config.worker_threads),
            config: self.config,
        })
    }
}

fn needs_identity(requirement: Option<&SecurityRequirement>) -> bool {
    matches!(requirement, Some(SecurityRequirement::Authenticated | SecurityRequirement::RolesAllowed(_)))
}

impl Debug for PipelineBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("identity_provider", &self.identity_provider.is_some())
            .field("customizers", &self.customizers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
