//! Failure types flowing through the request pipeline.
//!
//! Every handler, operation and mapper reports problems as a [`Failure`]. A failure erases the
//! concrete error but remembers its *lineage*: the concrete type followed by the ancestor types it
//! declares through [`Fault::supertypes`]. The exception mapper registry walks that lineage from the
//! most specific type to the least specific one, which is how a mapper registered for a broad error
//! kind can still catch a narrower one.
//!
//! # Example
//!
//! ```
//! use std::any::TypeId;
//! use micro_rest::{Failure, Fault};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("storage unavailable")]
//! struct StorageError;
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("file {0} not found")]
//! struct FileNotFound(String);
//!
//! impl Fault for StorageError {}
//!
//! impl Fault for FileNotFound {
//!     fn supertypes() -> Vec<TypeId> {
//!         vec![TypeId::of::<StorageError>()]
//!     }
//! }
//!
//! let failure = Failure::new(FileNotFound("a.txt".into()));
//! assert_eq!(failure.lineage(), &[TypeId::of::<FileNotFound>(), TypeId::of::<StorageError>()]);
//! ```

use http::StatusCode;
use std::any::TypeId;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io;
use thiserror::Error;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// An error type that can travel through the pipeline and be picked up by exception mappers.
pub trait Fault: Error + Send + Sync + 'static {
    /// Ancestor types of this error, nearest first.
    fn supertypes() -> Vec<TypeId>
    where
        Self: Sized,
    {
        Vec::new()
    }
}

/// A type-erased pipeline failure.
pub struct Failure {
    error: BoxError,
    lineage: Vec<TypeId>,
    type_name: &'static str,
    cause: Option<Box<Failure>>,
}

impl Failure {
    pub fn new<E: Fault>(error: E) -> Self {
        let mut lineage = Vec::with_capacity(4);
        lineage.push(TypeId::of::<E>());
        lineage.extend(E::supertypes());
        Self { error: Box::new(error), lineage, type_name: std::any::type_name::<E>(), cause: None }
    }

    /// Wraps an error which does not take part in the fault hierarchy, only catch-all mappers
    /// will see it.
    pub fn opaque<E: Into<BoxError>>(error: E) -> Self {
        Self { error: error.into(), lineage: Vec::new(), type_name: "opaque", cause: None }
    }

    #[must_use]
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// The concrete type followed by its declared ancestors.
    pub fn lineage(&self) -> &[TypeId] {
        &self.lineage
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is<E: Error + 'static>(&self) -> bool {
        self.error.is::<E>()
    }

    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.error.downcast_ref::<E>()
    }

    pub fn get_ref(&self) -> &(dyn Error + Send + Sync + 'static) {
        self.error.as_ref()
    }
}

impl<E: Fault> From<E> for Failure {
    fn from(error: E) -> Self {
        Failure::new(error)
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}, caused by: {}", self.error, cause),
            None => Display::fmt(&self.error, f),
        }
    }
}

impl Debug for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Failure")
            .field("type", &self.type_name)
            .field("error", &self.error)
            .field("cause", &self.cause)
            .finish()
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => self.error.source(),
        }
    }
}

impl Fault for io::Error {}

/// No route matched the request.
#[derive(Debug, Error)]
#[error("no route for {method} {path}")]
pub struct NotFound {
    pub method: http::Method,
    pub path: String,
}

impl Fault for NotFound {}

/// A failure carrying the HTTP status it should be answered with.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new<S: ToString>(status: StatusCode, message: S) -> Self {
        Self { status, message: message.to_string() }
    }

    pub fn bad_request<S: ToString>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl Fault for WebError {}

/// Root of the security denials.
#[derive(Debug, Error)]
#[error("security violation: {reason}")]
pub struct SecurityViolation {
    pub reason: String,
}

impl Fault for SecurityViolation {}

/// The caller could not be identified.
#[derive(Debug, Error)]
#[error("authentication required")]
pub struct Unauthenticated {
    /// value for the `WWW-Authenticate` header
    pub challenge: Option<String>,
}

impl Fault for Unauthenticated {
    fn supertypes() -> Vec<TypeId> {
        vec![TypeId::of::<SecurityViolation>()]
    }
}

/// The caller is known but lacks permission.
#[derive(Debug, Error)]
#[error("{principal} is not allowed to access {operation}")]
pub struct Forbidden {
    pub principal: String,
    pub operation: String,
}

impl Fault for Forbidden {
    fn supertypes() -> Vec<TypeId> {
        vec![TypeId::of::<SecurityViolation>()]
    }
}

#[derive(Debug, Error)]
#[error("invalid request body: {reason}")]
pub struct BodyReadError {
    pub reason: String,
}

impl BodyReadError {
    pub fn new<S: ToString>(reason: S) -> Self {
        Self { reason: reason.to_string() }
    }
}

impl Fault for BodyReadError {}

#[derive(Debug, Error)]
#[error("request body exceeds the limit of {limit} bytes")]
pub struct PayloadTooLarge {
    pub limit: usize,
}

impl Fault for PayloadTooLarge {
    fn supertypes() -> Vec<TypeId> {
        vec![TypeId::of::<BodyReadError>()]
    }
}

/// Wraps the failure of an asynchronous computation, the real failure is the cause.
#[derive(Debug, Error)]
#[error("asynchronous completion failed")]
pub struct CompletionError;

impl CompletionError {
    pub fn wrap(cause: Failure) -> Failure {
        Failure::new(CompletionError).with_cause(cause)
    }
}

impl Fault for CompletionError {}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker pool is closed")]
    Closed {
        #[from]
        source: tokio::sync::AcquireError,
    },

    #[error("worker task failed: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl Fault for WorkerError {}

/// `resume` was called for a context which is not suspended.
#[derive(Debug, Error)]
#[error("request {request_id} is not suspended")]
pub struct IllegalResume {
    pub request_id: u64,
}

impl Fault for IllegalResume {}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("response head is already committed")]
    HeadersCommitted,

    #[error("invalid header: {reason}")]
    InvalidHeader { reason: String },

    #[error("failed to encode: {source}")]
    Encode {
        #[from]
        source: serde_json::Error,
    },

    #[error("event data is not utf8: {source}")]
    NotUtf8 {
        #[from]
        source: std::str::Utf8Error,
    },

    #[error("response stream aborted")]
    Aborted,
}

impl StreamError {
    pub fn invalid_header<S: ToString>(str: S) -> Self {
        Self::InvalidHeader { reason: str.to_string() }
    }
}

impl Fault for StreamError {}

/// Errors raised by the writer boundary.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("connection closed")]
    Closed,

    #[error("response head already written")]
    HeadWritten,

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

/// Terminal errors of the driver, no response (or only a partial one) reached the client.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("connection lost while request was suspended")]
    Cancelled,

    #[error("response stream failed after commit: {source}")]
    StreamAborted { source: Failure },

    #[error("write response error: {source}")]
    Write {
        #[from]
        source: WriteError,
    },

    #[error("pipeline finished without producing a response head")]
    NoResponse,
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid route '{path}': {source}")]
    InvalidRoute {
        path: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("operation '{operation}' is secured but no identity provider is configured")]
    MissingIdentityProvider { operation: String },

    #[error("routes must be set")]
    MissingRoutes,

    #[error("invalid config: {source}")]
    Config {
        #[from]
        source: ConfigError,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("can't parse config: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid config: {reason}")]
    Invalid { reason: String },
}

impl ConfigError {
    pub fn invalid<S: ToString>(str: S) -> Self {
        Self::Invalid { reason: str.to_string() }
    }
}
