//! The result of a request, ready to be written.

use crate::error::StreamError;
use crate::streaming::StreamingEmitter;
use crate::Failure;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Serialize;
use std::fmt::{Debug, Formatter};

pub enum ReplyBody {
    Empty,
    Full(Bytes),
    Stream(StreamingEmitter),
}

impl ReplyBody {
    pub fn is_stream(&self) -> bool {
        matches!(self, ReplyBody::Stream(_))
    }
}

impl Debug for ReplyBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplyBody::Empty => f.write_str("Empty"),
            ReplyBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ReplyBody::Stream(emitter) => f.debug_tuple("Stream").field(emitter).finish(),
        }
    }
}

/// Status, headers and body produced by an operation, an abort or an exception mapper.
///
/// Post-invoke handlers may still change a reply through
/// [`RequestContext::result_mut`](crate::RequestContext::result_mut) until it is finalized.
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: ReplyBody,
}

impl Reply {
    pub fn new(status: StatusCode, body: ReplyBody) -> Self {
        Self { status, headers: HeaderMap::new(), body }
    }

    pub fn ok() -> Self {
        Self::status(StatusCode::OK)
    }

    /// An empty reply with `status`.
    pub fn status(status: StatusCode) -> Self {
        Self::new(status, ReplyBody::Empty)
    }

    pub fn text<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        let body = if text.is_empty() { ReplyBody::Empty } else { ReplyBody::Full(Bytes::from(text)) };
        Self::new(StatusCode::OK, body).header(CONTENT_TYPE, HeaderValue::from_static(mime::TEXT_PLAIN_UTF_8.as_ref()))
    }

    pub fn bytes<B: Into<Bytes>>(bytes: B) -> Self {
        Self::new(StatusCode::OK, ReplyBody::Full(bytes.into()))
            .header(CONTENT_TYPE, HeaderValue::from_static(mime::APPLICATION_OCTET_STREAM.as_ref()))
    }

    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Failure> {
        let bytes = serde_json::to_vec(value).map_err(StreamError::from)?;
        Ok(Self::new(StatusCode::OK, ReplyBody::Full(Bytes::from(bytes)))
            .header(CONTENT_TYPE, HeaderValue::from_static(mime::APPLICATION_JSON.as_ref())))
    }

    pub fn stream(emitter: StreamingEmitter) -> Self {
        Self::new(StatusCode::OK, ReplyBody::Stream(emitter))
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// Sets `name`, replacing any previous values.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &ReplyBody {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, ReplyBody) {
        (self.status, self.headers, self.body)
    }
}

impl Default for Reply {
    fn default() -> Self {
        Self::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_sets_content_type() {
        let reply = Reply::text("hello");
        assert_eq!(reply.status_code(), StatusCode::OK);
        assert_eq!(reply.headers().get(CONTENT_TYPE).unwrap(), "text/plain; charset=utf-8");
        assert!(matches!(reply.body(), ReplyBody::Full(bytes) if bytes.as_ref() == b"hello"));
    }

    #[test]
    fn json_body() {
        let reply = Reply::json(&serde_json::json!({"id": 1})).unwrap().with_status(StatusCode::CREATED);
        assert_eq!(reply.status_code(), StatusCode::CREATED);
        assert_eq!(reply.headers().get(CONTENT_TYPE).unwrap(), "application/json");
        assert!(matches!(reply.body(), ReplyBody::Full(bytes) if bytes.as_ref() == br#"{"id":1}"#));
    }

    #[test]
    fn empty_text_has_no_body() {
        assert!(matches!(Reply::text("").body(), ReplyBody::Empty));
    }
}
