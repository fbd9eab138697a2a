//! Exception mapper registry.
//!
//! Mappers turn a [`Failure`] into a [`Reply`]. They are registered against a [`Fault`] type and a
//! priority. Resolving a failure walks its lineage from the concrete type to the broadest
//! ancestor, the first level which has any mapper wins, and within that level the lowest priority
//! value wins. Equal priorities go to the mapper registered first.
//!
//! Wrapper faults (see [`ExceptionMappersBuilder::unwrap_type`] and
//! [`ExceptionMappersBuilder::register_unwrap`]) are resolved against their cause first, the
//! wrapper's own mapper is only used when the cause has none.
//!
//! # Example
//!
//! ```
//! use http::StatusCode;
//! use micro_rest::error::{Forbidden, SecurityViolation};
//! use micro_rest::exception::{mapper_fn, ExceptionMappers};
//! use micro_rest::{Failure, Reply};
//!
//! let mappers = ExceptionMappers::builder()
//!     .register::<SecurityViolation, _>(1, mapper_fn(|_, _| Reply::status(StatusCode::FORBIDDEN)))
//!     .register::<Forbidden, _>(100, mapper_fn(|_, _| Reply::status(StatusCode::NOT_FOUND)))
//!     .build();
//!
//! // the subtype mapper wins although its priority value is higher
//! let failure = Failure::new(Forbidden { principal: "bob".into(), operation: "delete".into() });
//! assert!(mappers.resolve(&failure).is_some());
//! ```

use crate::error::{
    BodyReadError, CompletionError, Fault, NotFound, PayloadTooLarge, SecurityViolation, Unauthenticated, WebError,
};
use crate::reply::Reply;
use crate::request::RequestContext;
use crate::Failure;
use futures::future::BoxFuture;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::{error, warn};

/// Priority of user mappers registered without an explicit priority.
pub const DEFAULT_PRIORITY: i32 = 5000;

/// Priority of the built-in mappers, any user mapper at the same level wins.
pub const BUILTIN_PRIORITY: i32 = 10000;

/// The answer of a mapper.
pub enum Mapped {
    Ready(Reply),
    Pending(BoxFuture<'static, Result<Reply, Failure>>),
}

impl Debug for Mapped {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mapped::Ready(reply) => f.debug_tuple("Ready").field(reply).finish(),
            Mapped::Pending(_) => f.write_str("Pending"),
        }
    }
}

pub trait ExceptionMapper: Send + Sync {
    fn map(&self, failure: &Failure, ctx: &RequestContext) -> Mapped;
}

impl<F> ExceptionMapper for F
where
    F: Fn(&Failure, &RequestContext) -> Mapped + Send + Sync,
{
    fn map(&self, failure: &Failure, ctx: &RequestContext) -> Mapped {
        (self)(failure, ctx)
    }
}

/// A synchronous mapper built from a closure, see [`mapper_fn`].
pub struct FnMapper<F> {
    f: F,
}

impl<F> ExceptionMapper for FnMapper<F>
where
    F: Fn(&Failure, &RequestContext) -> Reply + Send + Sync,
{
    fn map(&self, failure: &Failure, ctx: &RequestContext) -> Mapped {
        Mapped::Ready((self.f)(failure, ctx))
    }
}

pub fn mapper_fn<F>(f: F) -> FnMapper<F>
where
    F: Fn(&Failure, &RequestContext) -> Reply + Send + Sync,
{
    FnMapper { f }
}

#[derive(Clone)]
struct Registration {
    mapper: Arc<dyn ExceptionMapper>,
    priority: i32,
    seq: usize,
    unwrap: bool,
}

impl Registration {
    fn rank(&self) -> (i32, usize) {
        (self.priority, self.seq)
    }
}

/// The mapper selected for a failure, together with the failure it should see.
///
/// When the mapper was found through unwrapping, `failure` is the cause, not the wrapper.
pub struct Resolved<'a> {
    pub mapper: &'a Arc<dyn ExceptionMapper>,
    pub failure: &'a Failure,
}

impl Debug for Resolved<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved").field("failure", self.failure).finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Inner {
    by_type: HashMap<TypeId, Vec<Registration>>,
    any: Vec<Registration>,
    unwrap_types: HashSet<TypeId>,
}

/// An immutable mapper table, cheap to clone.
#[derive(Clone, Default)]
pub struct ExceptionMappers {
    inner: Arc<Inner>,
}

impl ExceptionMappers {
    pub fn builder() -> ExceptionMappersBuilder {
        ExceptionMappersBuilder::new()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// A table holding only the built-in mappers.
    pub fn with_defaults() -> Self {
        Self::builder().with_defaults().build()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.by_type.is_empty() && self.inner.any.is_empty()
    }

    /// Finds the mapper for `failure`, `None` if no typed or catch-all mapper applies.
    pub fn resolve<'a>(&'a self, failure: &'a Failure) -> Option<Resolved<'a>> {
        resolve_in(&[self], failure)
    }

    /// Like [`resolve`](Self::resolve), `fallback` is only asked at a point where this table has
    /// no mapper. Wrapper types of either table are unwrapped against both.
    pub fn resolve_with<'a>(&'a self, fallback: &'a ExceptionMappers, failure: &'a Failure) -> Option<Resolved<'a>> {
        resolve_in(&[self, fallback], failure)
    }

    fn selected(&self, ty: &TypeId) -> Option<&Registration> {
        self.inner.by_type.get(ty).and_then(|registrations| registrations.iter().min_by_key(|registration| registration.rank()))
    }

    fn catch_all(&self) -> Option<&Registration> {
        self.inner.any.iter().min_by_key(|registration| registration.rank())
    }
}

/// Tables are asked in order, each one for the typed lineage and then for its catch-all mappers.
fn resolve_in<'a>(tables: &[&'a ExceptionMappers], failure: &'a Failure) -> Option<Resolved<'a>> {
    if let Some(resolved) = unwrapped(tables, failure) {
        return Some(resolved);
    }
    tables.iter().find_map(|&table| {
        typed(table, tables, failure)
            .or_else(|| table.catch_all().map(|registration| Resolved { mapper: &registration.mapper, failure }))
    })
}

fn resolve_typed_in<'a>(tables: &[&'a ExceptionMappers], failure: &'a Failure) -> Option<Resolved<'a>> {
    unwrapped(tables, failure).or_else(|| tables.iter().find_map(|&table| typed(table, tables, failure)))
}

/// The cause's mapper when `failure` is of a wrapper type in any table.
fn unwrapped<'a>(tables: &[&'a ExceptionMappers], failure: &'a Failure) -> Option<Resolved<'a>> {
    let wrapper = failure.lineage().iter().any(|ty| tables.iter().any(|table| table.inner.unwrap_types.contains(ty)));
    if !wrapper {
        return None;
    }
    failure.cause().and_then(|cause| resolve_typed_in(tables, cause))
}

fn typed<'a>(table: &'a ExceptionMappers, tables: &[&'a ExceptionMappers], failure: &'a Failure) -> Option<Resolved<'a>> {
    let selected = failure.lineage().iter().find_map(|ty| table.selected(ty))?;
    if selected.unwrap
        && let Some(resolved) = failure.cause().and_then(|cause| resolve_typed_in(tables, cause))
    {
        return Some(resolved);
    }
    Some(Resolved { mapper: &selected.mapper, failure })
}

impl Debug for ExceptionMappers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExceptionMappers")
            .field("types", &self.inner.by_type.len())
            .field("any", &self.inner.any.len())
            .field("unwrap_types", &self.inner.unwrap_types.len())
            .finish()
    }
}

pub struct ExceptionMappersBuilder {
    inner: Inner,
    seq: usize,
}

impl ExceptionMappersBuilder {
    fn new() -> Self {
        Self { inner: Inner::default(), seq: 0 }
    }

    fn next_registration<M: ExceptionMapper + 'static>(&mut self, priority: i32, mapper: M, unwrap: bool) -> Registration {
        let seq = self.seq;
        self.seq += 1;
        Registration { mapper: Arc::new(mapper), priority, seq, unwrap }
    }

    /// Registers `mapper` for `E` and every type declaring `E` as an ancestor.
    pub fn register<E: Fault, M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        let registration = self.next_registration(priority, mapper, false);
        self.inner.by_type.entry(TypeId::of::<E>()).or_default().push(registration);
        self
    }

    /// Registers a mapper for a wrapper fault, a cause with its own mapper is preferred.
    pub fn register_unwrap<E: Fault, M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        let registration = self.next_registration(priority, mapper, true);
        self.inner.by_type.entry(TypeId::of::<E>()).or_default().push(registration);
        self
    }

    /// Registers a catch-all mapper, consulted after the whole lineage, opaque failures included.
    pub fn register_any<M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        let registration = self.next_registration(priority, mapper, false);
        self.inner.any.push(registration);
        self
    }

    /// Marks `E` as a wrapper, failures of that type always resolve against their cause first.
    pub fn unwrap_type<E: Fault>(mut self) -> Self {
        self.inner.unwrap_types.insert(TypeId::of::<E>());
        self
    }

    /// Adds the built-in mappers at [`BUILTIN_PRIORITY`].
    pub fn with_defaults(self) -> Self {
        self.unwrap_type::<CompletionError>()
            .register::<WebError, _>(
                BUILTIN_PRIORITY,
                mapper_fn(|failure: &Failure, _: &RequestContext| match failure.downcast_ref::<WebError>() {
                    Some(web_error) => Reply::text(web_error.message.clone()).with_status(web_error.status),
                    None => Reply::status(StatusCode::INTERNAL_SERVER_ERROR),
                }),
            )
            .register::<NotFound, _>(
                BUILTIN_PRIORITY,
                mapper_fn(|_: &Failure, _: &RequestContext| Reply::text("404 Not Found").with_status(StatusCode::NOT_FOUND)),
            )
            .register::<Unauthenticated, _>(BUILTIN_PRIORITY, mapper_fn(unauthenticated))
            .register::<SecurityViolation, _>(
                BUILTIN_PRIORITY,
                mapper_fn(|_: &Failure, _: &RequestContext| Reply::text("403 Forbidden").with_status(StatusCode::FORBIDDEN)),
            )
            .register::<BodyReadError, _>(
                BUILTIN_PRIORITY,
                mapper_fn(|failure: &Failure, _: &RequestContext| {
                    Reply::text(failure.to_string()).with_status(StatusCode::BAD_REQUEST)
                }),
            )
            .register::<PayloadTooLarge, _>(
                BUILTIN_PRIORITY,
                mapper_fn(|failure: &Failure, _: &RequestContext| {
                    Reply::text(failure.to_string()).with_status(StatusCode::PAYLOAD_TOO_LARGE)
                }),
            )
    }

    pub fn build(self) -> ExceptionMappers {
        ExceptionMappers { inner: Arc::new(self.inner) }
    }
}

fn unauthenticated(failure: &Failure, _ctx: &RequestContext) -> Reply {
    let reply = Reply::text("401 Unauthorized").with_status(StatusCode::UNAUTHORIZED);
    let challenge = failure.downcast_ref::<Unauthenticated>().and_then(|e| e.challenge.as_deref());
    match challenge.map(HeaderValue::from_str) {
        Some(Ok(value)) => reply.header(WWW_AUTHENTICATE, value),
        Some(Err(e)) => {
            warn!(cause = %e, "ignore invalid authentication challenge");
            reply
        }
        None => reply,
    }
}

/// The outcome of mapping a failure.
pub enum Mapping {
    Ready(Reply),
    Pending(BoxFuture<'static, Result<Reply, Failure>>),
    /// no mapper applied, the reply is the generic fallback
    Unmapped(Reply),
}

impl Debug for Mapping {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mapping::Ready(reply) => f.debug_tuple("Ready").field(reply).finish(),
            Mapping::Pending(_) => f.write_str("Pending"),
            Mapping::Unmapped(reply) => f.debug_tuple("Unmapped").field(reply).finish(),
        }
    }
}

/// Maps `failure` with the target's own mappers first, then the global ones.
pub fn map_failure(global: &ExceptionMappers, failure: &Failure, ctx: &RequestContext) -> Mapping {
    let local = ctx.target().map(|target| target.mappers());
    let resolved = match local {
        Some(local) => local.resolve_with(global, failure),
        None => global.resolve(failure),
    };

    match resolved {
        Some(Resolved { mapper, failure }) => match mapper.map(failure, ctx) {
            Mapped::Ready(reply) => Mapping::Ready(reply),
            Mapped::Pending(future) => Mapping::Pending(future),
        },
        None => {
            error!(
                request_id = ctx.id(),
                failure_type = failure.type_name(),
                cause = %failure,
                "no exception mapper for failure"
            );
            Mapping::Unmapped(fallback_reply())
        }
    }
}

/// The generic reply used when nothing else can answer.
pub fn fallback_reply() -> Reply {
    Reply::text("500 Internal Server Error").with_status(StatusCode::INTERNAL_SERVER_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::error::Forbidden;
    use crate::worker::WorkerPool;
    use http::Request;
    use std::io;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("illegal state")]
    struct IllegalState;

    impl Fault for IllegalState {}

    #[derive(Debug, Error)]
    #[error("file not found")]
    struct FileNotFound;

    impl Fault for FileNotFound {
        fn supertypes() -> Vec<TypeId> {
            vec![TypeId::of::<io::Error>()]
        }
    }

    fn context() -> RequestContext {
        RequestContext::new(Request::builder().uri("/").body(RequestBody::empty()).unwrap(), WorkerPool::new(1))
    }

    fn status(code: StatusCode) -> FnMapper<impl Fn(&Failure, &RequestContext) -> Reply + Send + Sync> {
        mapper_fn(move |_: &Failure, _: &RequestContext| Reply::status(code))
    }

    fn mapped_status(mappers: &ExceptionMappers, failure: &Failure) -> Option<StatusCode> {
        let resolved = mappers.resolve(failure)?;
        match resolved.mapper.map(resolved.failure, &context()) {
            Mapped::Ready(reply) => Some(reply.status_code()),
            Mapped::Pending(_) => None,
        }
    }

    #[test]
    fn subtype_beats_supertype_regardless_of_priority() {
        let mappers = ExceptionMappers::builder()
            .register::<io::Error, _>(1, status(StatusCode::SERVICE_UNAVAILABLE))
            .register::<FileNotFound, _>(9999, status(StatusCode::NOT_FOUND))
            .build();

        assert_eq!(mapped_status(&mappers, &Failure::new(FileNotFound)), Some(StatusCode::NOT_FOUND));
        assert_eq!(mapped_status(&mappers, &Failure::new(io::Error::other("x"))), Some(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn lowest_priority_then_registration_order() {
        let mappers = ExceptionMappers::builder()
            .register::<IllegalState, _>(10, status(StatusCode::BAD_GATEWAY))
            .register::<IllegalState, _>(5, status(StatusCode::CONFLICT))
            .register::<IllegalState, _>(5, status(StatusCode::GONE))
            .build();

        assert_eq!(mapped_status(&mappers, &Failure::new(IllegalState)), Some(StatusCode::CONFLICT));
    }

    #[test]
    fn unwrap_resolves_against_cause() {
        let mappers = ExceptionMappers::builder()
            .register_unwrap::<CompletionError, _>(1, status(StatusCode::BAD_GATEWAY))
            .register::<IllegalState, _>(DEFAULT_PRIORITY, status(StatusCode::CONFLICT))
            .build();

        let wrapped = CompletionError::wrap(Failure::new(IllegalState));
        assert_eq!(mapped_status(&mappers, &wrapped), Some(StatusCode::CONFLICT));
        assert!(mappers.resolve(&wrapped).unwrap().failure.is::<IllegalState>());

        // the cause has no mapper, fall back to the wrapper's own
        let wrapped = CompletionError::wrap(Failure::new(FileNotFound));
        assert_eq!(mapped_status(&mappers, &wrapped), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn unwrap_type_without_own_mapper() {
        let mappers = ExceptionMappers::with_defaults();
        let wrapped = CompletionError::wrap(Failure::new(WebError::new(StatusCode::IM_A_TEAPOT, "tea")));
        assert_eq!(mapped_status(&mappers, &wrapped), Some(StatusCode::IM_A_TEAPOT));

        let wrapped = CompletionError::wrap(Failure::opaque("nothing"));
        assert!(mappers.resolve(&wrapped).is_none());
    }

    #[test]
    fn local_table_sees_causes_of_global_wrappers() {
        let global = ExceptionMappers::builder()
            .register::<IllegalState, _>(1, status(StatusCode::CONFLICT))
            .with_defaults()
            .build();
        let local = ExceptionMappers::builder().register::<WebError, _>(9000, status(StatusCode::IM_A_TEAPOT)).build();

        let wrapped = CompletionError::wrap(Failure::new(WebError::bad_request("local")));
        let resolved = local.resolve_with(&global, &wrapped).unwrap();
        assert!(resolved.failure.is::<WebError>());
        assert_eq!(status_of(&resolved), StatusCode::IM_A_TEAPOT);

        // no local mapper for the cause, the global one answers
        let wrapped = CompletionError::wrap(Failure::new(IllegalState));
        assert_eq!(status_of(&local.resolve_with(&global, &wrapped).unwrap()), StatusCode::CONFLICT);

        // without the global table nothing unwraps
        assert!(local.resolve(&CompletionError::wrap(Failure::new(WebError::bad_request("x")))).is_none());
    }

    fn status_of(resolved: &Resolved<'_>) -> StatusCode {
        match resolved.mapper.map(resolved.failure, &context()) {
            Mapped::Ready(reply) => reply.status_code(),
            Mapped::Pending(_) => panic!("expected ready reply"),
        }
    }

    #[test]
    fn catch_all_after_lineage() {
        let mappers = ExceptionMappers::builder()
            .register_any(1, status(StatusCode::BAD_GATEWAY))
            .register::<IllegalState, _>(DEFAULT_PRIORITY, status(StatusCode::CONFLICT))
            .build();

        assert_eq!(mapped_status(&mappers, &Failure::new(IllegalState)), Some(StatusCode::CONFLICT));
        assert_eq!(mapped_status(&mappers, &Failure::opaque("opaque")), Some(StatusCode::BAD_GATEWAY));
    }

    #[test]
    fn defaults() {
        let mappers = ExceptionMappers::with_defaults();
        let forbidden = Failure::new(Forbidden { principal: "bob".into(), operation: "x".into() });
        assert_eq!(mapped_status(&mappers, &forbidden), Some(StatusCode::FORBIDDEN));
        assert_eq!(mapped_status(&mappers, &Failure::new(PayloadTooLarge { limit: 1 })), Some(StatusCode::PAYLOAD_TOO_LARGE));
        assert_eq!(mapped_status(&mappers, &Failure::new(BodyReadError::new("bad"))), Some(StatusCode::BAD_REQUEST));

        let unauthenticated = Failure::new(Unauthenticated { challenge: Some("Bearer".into()) });
        let resolved = mappers.resolve(&unauthenticated).unwrap();
        let Mapped::Ready(reply) = resolved.mapper.map(resolved.failure, &context()) else {
            panic!("expected ready reply");
        };
        assert_eq!(reply.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(reply.headers().get(WWW_AUTHENTICATE).unwrap(), "Bearer");
    }

    #[test]
    fn unmapped_falls_back_to_500() {
        let mappers = ExceptionMappers::empty();
        let failure = Failure::opaque("boom");
        let Mapping::Unmapped(reply) = map_failure(&mappers, &failure, &context()) else {
            panic!("expected unmapped");
        };
        assert_eq!(reply.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
