//! Per-request state carried through the pipeline.
//!
//! This module contains the core types a handler works with:
//! - `RequestContext`: the mutable state machine instance created for every incoming request
//! - `RequestHead`: method, uri, version and headers of the request
//! - `PathParams`: named path segments bound by the matcher
//! - `State`: the lifecycle state of a context

use crate::body::RequestBody;
use crate::handler::Phase;
use crate::properties::Properties;
use crate::registry::{OperationDescriptor, Target};
use crate::reply::Reply;
use crate::security::{IDENTITY_PROPERTY, Identity};
use crate::worker::WorkerPool;
use crate::Failure;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, Uri, Version};
use matchit::Params;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a [`RequestContext`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Initial,
    Matching,
    HandlerRun,
    Suspended,
    Invoking,
    Finalizing,
    Failed,
    Terminal,
    Cancelled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Terminal | State::Cancelled)
    }
}

/// The request line and headers, cheap to share with asynchronous work.
#[derive(Debug, Clone)]
pub struct RequestHead {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
}

impl RequestHead {
    /// Returns a reference to the request's HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns a reference to the request's URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the request's HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns a reference to the request's headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }
}

impl<B> From<&Request<B>> for RequestHead {
    fn from(request: &Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            uri: request.uri().clone(),
            version: request.version(),
            headers: request.headers().clone(),
        }
    }
}

impl From<http::request::Parts> for RequestHead {
    fn from(parts: http::request::Parts) -> Self {
        Self { method: parts.method, uri: parts.uri, version: parts.version, headers: parts.headers }
    }
}

/// Represents path parameters extracted from the URL path of an HTTP request.
///
/// Path parameters are named segments in the URL path that can be extracted and accessed
/// by name. For example, in the path "/users/{id}", "id" is a path parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    /// Creates an empty PathParams instance with no parameters
    #[inline]
    pub fn empty() -> Self {
        Self { params: Vec::new() }
    }

    /// Returns true if there are no path parameters
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Returns the number of path parameters
    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Gets the value of a path parameter by its name
    /// Returns None if the parameter doesn't exist
    #[inline]
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        let key = key.as_ref();
        self.params.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'k, 'v> From<Params<'k, 'v>> for PathParams {
    fn from(params: Params<'k, 'v>) -> Self {
        Self { params: params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect() }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PathParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self { params: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }
}

/// The mutable state of one in-flight request.
///
/// A context is created when the request arrives and dropped once its response has been written
/// or its connection is gone. It is owned by exactly one driver at a time, handlers borrow it
/// mutably for the duration of a single call.
pub struct RequestContext {
    id: u64,
    head: Arc<RequestHead>,
    body: Option<RequestBody>,
    body_bytes: Option<Bytes>,

    state: State,
    phase: Phase,
    position: usize,
    suspended: bool,
    aborted: bool,
    unmapped: bool,

    properties: Properties,
    target: Option<Arc<Target>>,
    path_params: PathParams,
    failure: Option<Failure>,
    result: Option<Reply>,

    workers: WorkerPool,
}

impl RequestContext {
    pub fn new(request: Request<RequestBody>, workers: WorkerPool) -> Self {
        let (parts, body) = request.into_parts();
        Self {
            id: REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            head: Arc::new(parts.into()),
            body: Some(body),
            body_bytes: None,
            state: State::Initial,
            phase: Phase::PreMatch,
            position: 0,
            suspended: false,
            aborted: false,
            unmapped: false,
            properties: Properties::new(),
            target: None,
            path_params: PathParams::empty(),
            failure: None,
            result: None,
            workers,
        }
    }

    /// A process-unique id, useful for correlating log lines.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn head(&self) -> &RequestHead {
        &self.head
    }

    /// A shared handle to the request head for asynchronous work.
    pub fn shared_head(&self) -> Arc<RequestHead> {
        Arc::clone(&self.head)
    }

    /// Mutable access to the request head, only meaningful before matching.
    pub fn head_mut(&mut self) -> &mut RequestHead {
        Arc::make_mut(&mut self.head)
    }

    pub fn method(&self) -> &Method {
        self.head.method()
    }

    pub fn uri(&self) -> &Uri {
        self.head.uri()
    }

    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn target(&self) -> Option<&Arc<Target>> {
        self.target.as_ref()
    }

    pub fn descriptor(&self) -> Option<&OperationDescriptor> {
        self.target.as_deref().map(Target::descriptor)
    }

    pub fn path_params(&self) -> &PathParams {
        &self.path_params
    }

    /// The identity resolved by the security evaluator, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.properties.get::<Identity>(IDENTITY_PROPERTY)
    }

    pub fn failure(&self) -> Option<&Failure> {
        self.failure.as_ref()
    }

    /// Records a failure, the dispatcher abandons the current chain as soon as control returns.
    pub fn fail(&mut self, failure: Failure) {
        self.failure = Some(failure);
        self.state = State::Failed;
    }

    pub fn result(&self) -> Option<&Reply> {
        self.result.as_ref()
    }

    pub fn result_mut(&mut self) -> Option<&mut Reply> {
        self.result.as_mut()
    }

    pub fn set_result(&mut self, reply: Reply) {
        self.result = Some(reply);
    }

    /// Skips every remaining handler and phase, the request is answered with `reply`.
    pub fn abort_with(&mut self, reply: Reply) {
        self.result = Some(reply);
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Takes the unread request body, returns `None` once it has been taken.
    pub fn take_body(&mut self) -> Option<RequestBody> {
        self.body.take()
    }

    /// The request body buffered by the body reader.
    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body_bytes.as_ref()
    }

    pub fn set_body_bytes(&mut self, bytes: Bytes) {
        self.body_bytes = Some(bytes);
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    /// True when a failure reached no exception mapper and the generic fallback was used.
    pub fn is_unmapped(&self) -> bool {
        self.unmapped
    }

    pub(crate) fn set_state(&mut self, state: State) {
        self.state = state;
    }

    pub(crate) fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
    }

    pub(crate) fn advance(&mut self) {
        self.position += 1;
    }

    pub(crate) fn enter_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.position = 0;
    }

    pub(crate) fn bind(&mut self, target: Arc<Target>, path_params: PathParams) {
        self.target = Some(target);
        self.path_params = path_params;
    }

    #[cfg(test)]
    pub(crate) fn set_path_params(&mut self, path_params: PathParams) {
        self.path_params = path_params;
    }

    pub(crate) fn take_failure(&mut self) -> Option<Failure> {
        self.failure.take()
    }

    pub(crate) fn take_result(&mut self) -> Option<Reply> {
        self.result.take()
    }

    pub(crate) fn mark_unmapped(&mut self) {
        self.unmapped = true;
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("method", self.head.method())
            .field("path", &self.head.path())
            .field("state", &self.state)
            .field("phase", &self.phase)
            .field("position", &self.position)
            .field("suspended", &self.suspended)
            .field("target", &self.descriptor().map(OperationDescriptor::name))
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(method: Method, uri: &str) -> RequestContext {
        let request = Request::builder().method(method).uri(uri).body(RequestBody::empty()).unwrap();
        RequestContext::new(request, WorkerPool::new(1))
    }

    #[test]
    fn new_context_starts_at_pre_match() {
        let ctx = context(Method::GET, "/users/1?verbose=true");
        assert_eq!(ctx.state(), State::Initial);
        assert_eq!(ctx.phase(), Phase::PreMatch);
        assert_eq!(ctx.position(), 0);
        assert!(!ctx.is_suspended());
        assert_eq!(ctx.head().path(), "/users/1");
        assert!(ctx.path_params().is_empty());
    }

    #[test]
    fn head_mut_does_not_touch_shared_copies() {
        let mut ctx = context(Method::GET, "/a");
        let shared = ctx.shared_head();
        ctx.head_mut().set_uri(Uri::from_static("/b"));
        assert_eq!(shared.path(), "/a");
        assert_eq!(ctx.head().path(), "/b");
    }

    #[test]
    fn ids_are_unique() {
        let a = context(Method::GET, "/");
        let b = context(Method::GET, "/");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn path_params_lookup() {
        let params: PathParams = [("id", "42"), ("name", "bob")].into_iter().collect();
        assert_eq!(params.len(), 2);
        assert_eq!(params.get("id"), Some("42"));
        assert_eq!(params.get("missing"), None);
    }

    #[test]
    fn fail_moves_to_failed_state() {
        let mut ctx = context(Method::GET, "/");
        ctx.fail(Failure::opaque("boom"));
        assert_eq!(ctx.state(), State::Failed);
        assert!(ctx.failure().is_some());
        assert!(ctx.take_failure().is_some());
        assert!(ctx.failure().is_none());
    }
}
