//! The `Date` response header.
//!
//! Formatting an RFC 7231 date for every response is wasteful, the formatted value is shared
//! through an [`ArcSwap`] and refreshed at most once per interval by whichever request notices
//! it is stale.

use crate::handler::{HandlerOutcome, Phase, PhaseHandler, SharedHandler};
use crate::registry::{Customizer, OperationDescriptor};
use crate::request::RequestContext;
use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue};
use http::header::DATE;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug)]
struct CachedDate {
    value: HeaderValue,
    refreshed: Instant,
}

/// Maintains the current HTTP date string.
#[derive(Debug)]
pub struct DateService {
    current: ArcSwap<CachedDate>,
    update_interval: Duration,
}

static DATE_SERVICE: Lazy<DateService> = Lazy::new(|| DateService::new(Duration::from_millis(800)));

impl DateService {
    /// Returns the process wide instance.
    pub fn global() -> &'static DateService {
        &DATE_SERVICE
    }

    pub fn new(update_interval: Duration) -> Self {
        Self { current: ArcSwap::from_pointee(CachedDate { value: format_now(), refreshed: Instant::now() }), update_interval }
    }

    /// The current date, formatted at most `update_interval` ago.
    pub fn http_date(&self) -> HeaderValue {
        let current = self.current.load();
        if current.refreshed.elapsed() < self.update_interval {
            return current.value.clone();
        }

        let value = format_now();
        self.current.store(Arc::new(CachedDate { value: value.clone(), refreshed: Instant::now() }));
        value
    }
}

fn format_now() -> HeaderValue {
    let mut buf = faf_http_date::get_date_buff_no_key();
    faf_http_date::get_date_no_key(&mut buf);
    match HeaderValue::from_maybe_shared(Bytes::from_owner(buf)) {
        Ok(value) => value,
        Err(e) => {
            warn!(cause = %e, "formatted date is not a valid header value");
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:00 GMT")
        }
    }
}

/// Inserts the shared `Date` value unless `headers` already carry one.
pub(crate) fn stamp(headers: &mut HeaderMap) {
    if !headers.contains_key(DATE) {
        headers.insert(DATE, DateService::global().http_date());
    }
}

/// Adds the `Date` header to every reply produced by an operation, so later post-invoke handlers
/// see it. Replies that skip post-invoke are stamped when the head is written.
#[derive(Debug, Default)]
pub struct DateHeaderCustomizer;

impl Customizer for DateHeaderCustomizer {
    fn contribute(&self, phase: Phase, _target: &OperationDescriptor) -> Vec<SharedHandler> {
        match phase {
            Phase::PostInvoke => vec![Arc::new(DateHeaderHandler)],
            _ => vec![],
        }
    }
}

struct DateHeaderHandler;

impl PhaseHandler for DateHeaderHandler {
    fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        if let Some(reply) = ctx.result_mut() {
            stamp(reply.headers_mut());
        }
        HandlerOutcome::Completed
    }

    fn name(&self) -> &str {
        "date"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::RequestBody;
    use crate::registry::OperationId;
    use crate::reply::Reply;
    use crate::worker::WorkerPool;
    use http::Request;

    #[test]
    fn date_is_cached_within_interval() {
        let service = DateService::new(Duration::from_secs(60));
        let first = service.http_date();
        assert_eq!(first.len(), 29);
        assert!(first.to_str().unwrap().ends_with(" GMT"));
        assert_eq!(service.http_date(), first);
    }

    #[test]
    fn handler_keeps_existing_date() {
        let descriptor = OperationDescriptor::new(OperationId::new(0), "get", "/");
        let handlers = DateHeaderCustomizer.contribute(Phase::PostInvoke, &descriptor);
        assert_eq!(handlers.len(), 1);
        assert!(DateHeaderCustomizer.contribute(Phase::PostMatch, &descriptor).is_empty());

        let request = Request::builder().uri("/").body(RequestBody::empty()).unwrap();
        let mut ctx = RequestContext::new(request, WorkerPool::new(1));
        ctx.set_result(Reply::ok());
        assert!(matches!(handlers[0].handle(&mut ctx), HandlerOutcome::Completed));
        assert!(ctx.result().unwrap().headers().contains_key(DATE));

        ctx.set_result(Reply::ok().header(DATE, HeaderValue::from_static("yesterday")));
        handlers[0].handle(&mut ctx);
        assert_eq!(ctx.result().unwrap().headers().get(DATE).unwrap(), "yesterday");
    }
}
