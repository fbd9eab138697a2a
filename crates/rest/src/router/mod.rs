//! Matching requests to target-operations.
//!
//! The dispatcher only knows the [`Matcher`] trait. [`Router`] is the default matcher: a
//! `matchit` tree of path templates, each holding the routes registered for that path in
//! registration order. The first route whose [`Filter`] accepts the request head wins.
//!
//! # Example
//!
//! ```
//! use micro_rest::router::{get, post, Router};
//! use micro_rest::{operation_fn, PhaseRegistry, SecurityRequirement};
//!
//! async fn list() -> &'static str {
//!     "[]"
//! }
//!
//! async fn create(body: String) -> String {
//!     body
//! }
//!
//! let registry = PhaseRegistry::builder().build();
//! let router = Router::builder()
//!     .route("/items", get(operation_fn(list)))
//!     .route("/items", post(operation_fn(create)).reads_body().secured(SecurityRequirement::Authenticated))
//!     .build(&registry)
//!     .unwrap();
//! assert_eq!(router.targets().len(), 2);
//! ```

pub mod filter;

use crate::error::{BuildError, Fault};
use crate::exception::{ExceptionMapper, ExceptionMappers, ExceptionMappersBuilder};
use crate::operation::{Operation, SharedOperation};
use crate::registry::{BodyMode, OperationDescriptor, OperationId, PhaseRegistry, Target};
use crate::request::{PathParams, RequestHead};
use crate::security::SecurityRequirement;
use filter::{AllFilter, Filter};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tracing::trace;

type RouterFilter = dyn Filter + Send + Sync + 'static;
type InnerRouter<T> = matchit::Router<T>;

/// Resolves a request head to a target and its path parameters.
pub trait Matcher: Send + Sync {
    fn matches(&self, head: &RequestHead) -> Option<RouteMatch>;
}

/// Result of matching a route.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub target: Arc<Target>,
    pub params: PathParams,
}

/// Main router structure that handles HTTP request routing
pub struct Router {
    inner_router: InnerRouter<Vec<RouterItem>>,
    targets: Vec<Arc<Target>>,
}

/// A router item containing a filter and its target
struct RouterItem {
    filter: Box<RouterFilter>,
    target: Arc<Target>,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Every target in registration order, indexed by [`OperationId`].
    pub fn targets(&self) -> &[Arc<Target>] {
        &self.targets
    }

    pub fn target(&self, id: OperationId) -> Option<&Arc<Target>> {
        self.targets.get(id.index())
    }
}

impl Matcher for Router {
    fn matches(&self, head: &RequestHead) -> Option<RouteMatch> {
        let path = head.path();
        let matched = match self.inner_router.at(path) {
            Ok(matched) => matched,
            Err(e) => {
                trace!(path, cause = %e, "no route for path");
                return None;
            }
        };

        let item = matched.value.iter().find(|item| item.filter.matches(head))?;
        Some(RouteMatch { target: Arc::clone(&item.target), params: matched.params.into() })
    }
}

impl Debug for Router {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").field("targets", &self.targets).finish_non_exhaustive()
    }
}

pub struct RouterBuilder {
    routes: Vec<(String, RouteBuilder)>,
}

impl RouterBuilder {
    fn new() -> Self {
        Self { routes: Vec::new() }
    }

    pub fn route(mut self, route: impl Into<String>, route_builder: RouteBuilder) -> Self {
        self.routes.push((route.into(), route_builder));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolves every route through `registry` and builds the path tree.
    pub fn build(self, registry: &PhaseRegistry) -> Result<Router, BuildError> {
        let mut by_path: Vec<(String, Vec<RouterItem>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut targets = Vec::with_capacity(self.routes.len());

        for (id, (path, route)) in self.routes.into_iter().enumerate() {
            let (filter, descriptor, operation, mappers) = route.into_parts(OperationId::new(id), &path);
            let target = Arc::new(registry.resolve(descriptor, operation, mappers));
            targets.push(Arc::clone(&target));

            let slot = *index.entry(path.clone()).or_insert_with(|| {
                by_path.push((path.clone(), Vec::new()));
                by_path.len() - 1
            });
            by_path[slot].1.push(RouterItem { filter, target });
        }

        let mut inner_router = InnerRouter::new();
        for (path, items) in by_path {
            inner_router.insert(path.clone(), items).map_err(|source| BuildError::InvalidRoute { path, source })?;
        }

        Ok(Router { inner_router, targets })
    }
}

macro_rules! method_router_filter {
    ($method:ident, $method_name:ident, $upper_case_method:ident) => {
        #[doc = concat!("Routes ", stringify!($upper_case_method), " requests to `operation`.")]
        pub fn $method<O: Operation + 'static>(operation: O) -> RouteBuilder {
            let mut filters = filter::all_filter();
            filters.and(filter::$method_name());
            RouteBuilder::new(filters, Some(http::Method::$upper_case_method), Arc::new(operation))
        }
    };
}

method_router_filter!(get, get_method, GET);
method_router_filter!(post, post_method, POST);
method_router_filter!(put, put_method, PUT);
method_router_filter!(delete, delete_method, DELETE);
method_router_filter!(head, head_method, HEAD);
method_router_filter!(options, options_method, OPTIONS);
method_router_filter!(patch, patch_method, PATCH);

/// Routes requests of any method to `operation`.
pub fn any<O: Operation + 'static>(operation: O) -> RouteBuilder {
    RouteBuilder::new(filter::all_filter(), None, Arc::new(operation))
}

/// One route: filters, operation and everything customizers read from its descriptor.
pub struct RouteBuilder {
    filters: AllFilter,
    method: Option<http::Method>,
    operation: SharedOperation,
    name: Option<String>,
    security: Option<SecurityRequirement>,
    body: BodyMode,
    attributes: HashMap<String, String>,
    mappers: ExceptionMappersBuilder,
}

impl RouteBuilder {
    fn new(filters: AllFilter, method: Option<http::Method>, operation: SharedOperation) -> Self {
        Self {
            filters,
            method,
            operation,
            name: None,
            security: None,
            body: BodyMode::Ignore,
            attributes: HashMap::new(),
            mappers: ExceptionMappers::builder(),
        }
    }

    pub fn with<F: Filter + Send + Sync + 'static>(mut self, filter: F) -> Self {
        self.filters.and(filter);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn secured(mut self, requirement: SecurityRequirement) -> Self {
        self.security = Some(requirement);
        self
    }

    /// The request body is buffered before the operation is invoked.
    pub fn reads_body(mut self) -> Self {
        self.body = BodyMode::Buffer;
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Registers a mapper for this route only, it wins over every global mapper.
    pub fn mapper<E: Fault, M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        self.mappers = self.mappers.register::<E, M>(priority, mapper);
        self
    }

    pub fn mapper_any<M: ExceptionMapper + 'static>(mut self, priority: i32, mapper: M) -> Self {
        self.mappers = self.mappers.register_any(priority, mapper);
        self
    }

    fn into_parts(self, id: OperationId, path: &str) -> (Box<RouterFilter>, OperationDescriptor, SharedOperation, ExceptionMappers) {
        let name = self.name.unwrap_or_else(|| match &self.method {
            Some(method) => format!("{method} {path}"),
            None => format!("ANY {path}"),
        });
        let descriptor = OperationDescriptor::new(id, name, path)
            .with_method(self.method)
            .with_security(self.security)
            .with_body(self.body)
            .with_attributes(self.attributes);
        // todo: we can remove indirect when filters has only one filter
        (Box::new(self.filters), descriptor, self.operation, self.mappers.build())
    }
}

#[cfg(test)]
mod tests {
    use super::filter::header;
    use super::{any, get, post, Matcher, Router};
    use crate::extract::Call;
    use crate::operation::Invocation;
    use crate::registry::PhaseRegistry;
    use crate::reply::Reply;
    use crate::request::RequestHead;
    use http::{HeaderValue, Method, Request};

    fn ok(_call: Call) -> Invocation {
        Invocation::Ready(Ok(Reply::ok()))
    }

    fn router() -> Router {
        Router::builder()
            .route("/", get(ok).named("root"))
            .route(
                "/",
                post(ok)
                    .with(header(
                        http::header::CONTENT_TYPE,
                        HeaderValue::from_static(mime::APPLICATION_WWW_FORM_URLENCODED.as_ref()),
                    ))
                    .named("form"),
            )
            .route("/", post(ok))
            .route("/users/{id}", get(ok))
            .route("/files/{*path}", any(ok))
            .build(&PhaseRegistry::builder().build())
            .unwrap()
    }

    fn head(method: Method, uri: &str, content_type: Option<&str>) -> RequestHead {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(content_type) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, content_type);
        }
        RequestHead::from(&builder.body(()).unwrap())
    }

    fn matched_name(router: &Router, head: &RequestHead) -> Option<String> {
        router.matches(head).map(|m| m.target.descriptor().name().to_string())
    }

    #[test]
    fn test_route_get() {
        let router = router();
        assert_eq!(matched_name(&router, &head(Method::GET, "/", None)).as_deref(), Some("root"));
    }

    #[test]
    fn test_route_post() {
        let router = router();
        assert_eq!(matched_name(&router, &head(Method::POST, "/", None)).as_deref(), Some("POST /"));
    }

    #[test]
    fn test_route_post_with_content_type() {
        let router = router();
        let head = head(Method::POST, "/", Some("application/x-www-form-urlencoded"));
        assert_eq!(matched_name(&router, &head).as_deref(), Some("form"));
    }

    #[test]
    fn path_params_are_bound() {
        let router = router();
        let matched = router.matches(&head(Method::GET, "/users/42?x=1", None)).unwrap();
        assert_eq!(matched.params.get("id"), Some("42"));
        assert_eq!(matched.target.descriptor().id().index(), 3);

        let matched = router.matches(&head(Method::DELETE, "/files/a/b.txt", None)).unwrap();
        assert_eq!(matched.params.get("path"), Some("a/b.txt"));
        assert!(matched.target.descriptor().method().is_none());
    }

    #[test]
    fn unknown_path_or_method() {
        let router = router();
        assert!(router.matches(&head(Method::GET, "/missing", None)).is_none());
        assert!(router.matches(&head(Method::PUT, "/users/1", None)).is_none());
    }

    #[test]
    fn invalid_route_is_build_error() {
        let result = Router::builder()
            .route("/a/{id}", get(ok))
            .route("/a/{name}", get(ok))
            .build(&PhaseRegistry::builder().build());
        assert!(matches!(result, Err(crate::error::BuildError::InvalidRoute { .. })));
    }
}
