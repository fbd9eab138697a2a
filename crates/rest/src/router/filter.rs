//! Route filters.
//!
//! Several routes may share a path template. While matching, the router asks the filter of each
//! route registered for the template, in registration order, and binds the first one that accepts
//! the request head. Filters never see the body and never run handlers.
//!
//! ```
//! use http::header::{ACCEPT, AUTHORIZATION};
//! use http::HeaderValue;
//! use micro_rest::router::filter::{all_filter, get_method, has_header, header, not};
//!
//! let mut filter = all_filter();
//! filter
//!     .and(get_method())
//!     .and(header(ACCEPT, HeaderValue::from_static("application/x-ndjson")))
//!     .and(not(has_header(AUTHORIZATION)));
//! ```

use crate::request::RequestHead;
use http::{HeaderName, HeaderValue, Method};

pub trait Filter: Send + Sync {
    /// `true` when the route may serve a request with this head.
    fn matches(&self, head: &RequestHead) -> bool;
}

struct FnFilter<F>(F);

impl<F> Filter for FnFilter<F>
where
    F: Fn(&RequestHead) -> bool + Send + Sync,
{
    fn matches(&self, head: &RequestHead) -> bool {
        (self.0)(head)
    }
}

/// A filter from a predicate over the request head.
///
/// ```
/// use micro_rest::router::filter::fn_filter;
///
/// let _paged = fn_filter(|head| head.uri().query().is_some_and(|query| query.contains("page=")));
/// ```
pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&RequestHead) -> bool + Send + Sync,
{
    FnFilter(f)
}

/// Accepts when every inner filter does, and so accepts everything while empty.
#[derive(Default)]
pub struct AllFilter {
    filters: Vec<Box<dyn Filter>>,
}

pub fn all_filter() -> AllFilter {
    AllFilter::default()
}

impl AllFilter {
    pub fn and<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AllFilter {
    fn matches(&self, head: &RequestHead) -> bool {
        self.filters.iter().all(|filter| filter.matches(head))
    }
}

/// Accepts when one inner filter does. An empty one accepts everything as well.
#[derive(Default)]
pub struct AnyFilter {
    filters: Vec<Box<dyn Filter>>,
}

pub fn any_filter() -> AnyFilter {
    AnyFilter::default()
}

impl AnyFilter {
    pub fn or<F: Filter + 'static>(&mut self, filter: F) -> &mut Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AnyFilter {
    fn matches(&self, head: &RequestHead) -> bool {
        self.filters.is_empty() || self.filters.iter().any(|filter| filter.matches(head))
    }
}

pub struct NotFilter<F>(F);

/// Inverts `filter`.
pub fn not<F: Filter>(filter: F) -> NotFilter<F> {
    NotFilter(filter)
}

impl<F: Filter> Filter for NotFilter<F> {
    fn matches(&self, head: &RequestHead) -> bool {
        !self.0.matches(head)
    }
}

pub struct MethodFilter(Method);

impl Filter for MethodFilter {
    fn matches(&self, head: &RequestHead) -> bool {
        head.method() == self.0
    }
}

pub fn method(method: Method) -> MethodFilter {
    MethodFilter(method)
}

macro_rules! method_filter {
    ($name:ident, $method:ident) => {
        #[doc = concat!("Accepts `", stringify!($method), "` requests.")]
        pub fn $name() -> MethodFilter {
            MethodFilter(Method::$method)
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(patch_method, PATCH);

/// Accepts requests carrying a header, with a given value when one is set.
pub struct HeaderFilter {
    name: HeaderName,
    value: Option<HeaderValue>,
}

impl Filter for HeaderFilter {
    fn matches(&self, head: &RequestHead) -> bool {
        let mut values = head.headers().get_all(&self.name).iter();
        match &self.value {
            Some(expected) => values.any(|value| value == expected),
            None => values.next().is_some(),
        }
    }
}

pub fn header(name: HeaderName, value: HeaderValue) -> HeaderFilter {
    HeaderFilter { name, value: Some(value) }
}

pub fn has_header(name: HeaderName) -> HeaderFilter {
    HeaderFilter { name, value: None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{AUTHORIZATION, CONTENT_TYPE};
    use http::Request;

    fn head(method: Method, content_type: Option<&str>) -> RequestHead {
        let mut builder = Request::builder().method(method).uri("/");
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        RequestHead::from(&builder.body(()).unwrap())
    }

    #[test]
    fn composed_filters() {
        let mut all = all_filter();
        all.and(post_method()).and(header(CONTENT_TYPE, HeaderValue::from_static("application/json")));

        assert!(all.matches(&head(Method::POST, Some("application/json"))));
        assert!(!all.matches(&head(Method::POST, None)));
        assert!(!all.matches(&head(Method::GET, Some("application/json"))));

        let mut any = any_filter();
        any.or(get_method()).or(method(Method::HEAD));
        assert!(any.matches(&head(Method::HEAD, None)));
        assert!(!any.matches(&head(Method::PUT, None)));
    }

    #[test]
    fn header_presence() {
        assert!(has_header(CONTENT_TYPE).matches(&head(Method::GET, Some("text/plain"))));
        assert!(!has_header(CONTENT_TYPE).matches(&head(Method::GET, None)));
        assert!(not(has_header(AUTHORIZATION)).matches(&head(Method::GET, None)));
    }

    #[test]
    fn empty_filters_accept() {
        assert!(all_filter().matches(&head(Method::DELETE, None)));
        assert!(any_filter().matches(&head(Method::DELETE, None)));
        assert!(fn_filter(|head| head.method() == Method::DELETE).matches(&head(Method::DELETE, None)));
    }
}
