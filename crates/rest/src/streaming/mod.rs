//! Streaming replies.
//!
//! A [`StreamingEmitter`] turns a lazy asynchronous sequence into framed chunks:
//! - demand bounds how many elements are in flight, `1` is strictly serial
//! - [`Framing`] decides how elements are delimited on the wire
//! - the [`StreamHead`] handle sets status and headers, but only until the first chunk is flushed
//!
//! A deferred emitter first resolves an outer asynchronous value, its producer receives the head
//! handle so headers can depend on that value.
//!
//! # Example
//!
//! ```
//! use futures::stream;
//! use http::StatusCode;
//! use micro_rest::streaming::{ElementSource, Framing, StreamingEmitter};
//!
//! let emitter = StreamingEmitter::deferred(|head| async move {
//!     let rows = vec![1, 2, 3];
//!     head.set_status(StatusCode::PARTIAL_CONTENT)?;
//!     head.add_header("x-total-count", rows.len().to_string())?;
//!     Ok(ElementSource::json(stream::iter(rows)))
//! })
//! .with_framing(Framing::NewlineDelimited)
//! .with_demand(4);
//! # drop(emitter);
//! ```

mod sse;

pub use sse::{Event, Message, SseSender, sse_channel};

use crate::error::StreamError;
use crate::Failure;
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use http::header::{CONTENT_TYPE, HeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

/// How elements are delimited in the response body.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// `[a,b,c]`, an empty sequence is `[]`
    #[default]
    Array,
    /// one element per line
    NewlineDelimited,
    /// every element becomes the `data` of one server-sent event
    ServerSentEvents,
    /// elements are written as they are
    Raw,
}

impl Framing {
    pub fn content_type(self) -> HeaderValue {
        match self {
            Framing::Array => HeaderValue::from_static(mime::APPLICATION_JSON.as_ref()),
            Framing::NewlineDelimited => HeaderValue::from_static("application/x-ndjson"),
            Framing::ServerSentEvents => HeaderValue::from_static(mime::TEXT_EVENT_STREAM.as_ref()),
            Framing::Raw => HeaderValue::from_static(mime::APPLICATION_OCTET_STREAM.as_ref()),
        }
    }
}

#[derive(Debug, Default)]
struct HeadState {
    status: Option<StatusCode>,
    headers: HeaderMap,
    committed: bool,
}

/// Shared handle to the status and headers of a streaming reply.
#[derive(Debug, Clone, Default)]
pub struct StreamHead {
    state: Arc<Mutex<HeadState>>,
}

impl StreamHead {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HeadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_status(&self, status: StatusCode) -> Result<(), StreamError> {
        let mut state = self.lock();
        if state.committed {
            return Err(StreamError::HeadersCommitted);
        }
        state.status = Some(status);
        Ok(())
    }

    /// Appends a header value, earlier values of the same name are kept.
    pub fn add_header<K, V>(&self, name: K, value: V) -> Result<(), StreamError>
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: std::fmt::Display,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: std::fmt::Display,
    {
        let name = HeaderName::try_from(name).map_err(StreamError::invalid_header)?;
        let value = HeaderValue::try_from(value).map_err(StreamError::invalid_header)?;

        let mut state = self.lock();
        if state.committed {
            return Err(StreamError::HeadersCommitted);
        }
        state.headers.append(name, value);
        Ok(())
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.lock().status
    }

    pub fn is_committed(&self) -> bool {
        self.lock().committed
    }

    /// Freezes the head. Status and headers set on the handle override the reply's own.
    pub(crate) fn commit(&self, status: StatusCode, mut headers: HeaderMap) -> (StatusCode, HeaderMap) {
        let mut state = self.lock();
        state.committed = true;
        let status = state.status.unwrap_or(status);
        for name in state.headers.keys() {
            headers.remove(name);
        }
        for (name, value) in &state.headers {
            headers.append(name.clone(), value.clone());
        }
        (status, headers)
    }
}

type ElementFuture = BoxFuture<'static, Result<Bytes, Failure>>;

/// A lazy asynchronous sequence of encoded elements.
pub struct ElementSource {
    elements: BoxStream<'static, ElementFuture>,
}

impl ElementSource {
    /// Every item is a future of one element, up to `demand` of them are polled at once.
    pub fn pipelined<S, F>(stream: S) -> Self
    where
        S: Stream<Item = F> + Send + 'static,
        F: Future<Output = Result<Bytes, Failure>> + Send + 'static,
    {
        Self { elements: stream.map(|element| element.boxed()).boxed() }
    }

    pub fn encoded<S, T, E>(stream: S, encoder: E) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        E: Fn(T) -> Result<Bytes, Failure> + Send + 'static,
    {
        Self::pipelined(stream.map(move |item| future::ready(encoder(item))))
    }

    pub fn json<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Serialize,
    {
        Self::encoded(stream, |item| encode_json(&item))
    }

    /// Like [`json`](Self::json), a failed item fails the stream.
    pub fn try_json<S, T>(stream: S) -> Self
    where
        S: Stream<Item = Result<T, Failure>> + Send + 'static,
        T: Serialize,
    {
        Self::encoded(stream, |item| item.and_then(|item| encode_json(&item)))
    }

    pub fn text<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Into<String>,
    {
        Self::encoded(stream, |item| Ok(Bytes::from(item.into())))
    }

    pub fn bytes<S>(stream: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + 'static,
    {
        Self::encoded(stream, Ok)
    }

    pub fn empty() -> Self {
        Self::bytes(futures::stream::empty())
    }
}

impl Debug for ElementSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("ElementSource")
    }
}

fn encode_json<T: Serialize>(item: &T) -> Result<Bytes, Failure> {
    serde_json::to_vec(item).map(Bytes::from).map_err(|e| StreamError::from(e).into())
}

enum Source {
    Ready(ElementSource),
    Deferred(BoxFuture<'static, Result<ElementSource, Failure>>),
}

/// A streaming reply body.
pub struct StreamingEmitter {
    head: StreamHead,
    demand: Option<usize>,
    framing: Option<Framing>,
    content_type: Option<HeaderValue>,
    source: Source,
}

impl StreamingEmitter {
    pub fn new(source: ElementSource) -> Self {
        Self::with_source(StreamHead::new(), Source::Ready(source))
    }

    fn with_source(head: StreamHead, source: Source) -> Self {
        Self { head, demand: None, framing: None, content_type: None, source }
    }

    pub fn json<S, T>(stream: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
        T: Serialize,
    {
        Self::new(ElementSource::json(stream))
    }

    /// Resolves `producer` before the first element, `producer` may still change the head.
    pub fn deferred<P, F>(producer: P) -> Self
    where
        P: FnOnce(StreamHead) -> F,
        F: Future<Output = Result<ElementSource, Failure>> + Send + 'static,
    {
        let head = StreamHead::new();
        let future = producer(head.clone()).boxed();
        Self::with_source(head, Source::Deferred(future))
    }

    /// Elements in flight at most, `None` uses the pipeline default.
    #[must_use]
    pub fn with_demand(mut self, demand: usize) -> Self {
        self.demand = Some(demand.max(1));
        self
    }

    #[must_use]
    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = Some(framing);
        self
    }

    /// Overrides the content type derived from the framing.
    #[must_use]
    pub fn with_content_type(mut self, content_type: HeaderValue) -> Self {
        self.content_type = Some(content_type);
        self
    }

    pub fn head(&self) -> StreamHead {
        self.head.clone()
    }

    /// `None` uses the pipeline default.
    pub fn framing(&self) -> Option<Framing> {
        self.framing
    }

    pub fn demand(&self) -> Option<usize> {
        self.demand
    }

    /// Resolves a deferred source and sets up framing, nothing is written yet.
    pub(crate) async fn open(self, default_demand: usize, default_framing: Framing) -> Result<OpenStream, Failure> {
        let source = match self.source {
            Source::Ready(source) => source,
            Source::Deferred(future) => future.await?,
        };
        let demand = self.demand.unwrap_or(default_demand).max(1);
        let framing = self.framing.unwrap_or(default_framing);
        let content_type = self.content_type.unwrap_or_else(|| framing.content_type());
        let chunks = Framed::new(source.elements.buffered(demand), framing).boxed();
        Ok(OpenStream { head: self.head, content_type, chunks })
    }
}

impl Debug for StreamingEmitter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingEmitter")
            .field("demand", &self.demand)
            .field("framing", &self.framing)
            .field("deferred", &matches!(self.source, Source::Deferred(_)))
            .finish_non_exhaustive()
    }
}

/// A stream whose source has been resolved, ready to be committed and written.
pub(crate) struct OpenStream {
    pub(crate) head: StreamHead,
    pub(crate) content_type: HeaderValue,
    pub(crate) chunks: BoxStream<'static, Result<Bytes, Failure>>,
}

impl OpenStream {
    /// Commits the head, `headers` are the reply headers collected so far.
    pub(crate) fn commit(&self, status: StatusCode, mut headers: HeaderMap) -> (StatusCode, HeaderMap) {
        if !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, self.content_type.clone());
        }
        self.head.commit(status, headers)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum FrameState {
    Start,
    Streaming,
    Done,
}

pin_project! {
    /// Wraps encoded elements with the delimiters of a [`Framing`].
    struct Framed<S> {
        #[pin]
        inner: S,
        framing: Framing,
        state: FrameState,
    }
}

impl<S> Framed<S> {
    fn new(inner: S, framing: Framing) -> Self {
        Self { inner, framing, state: FrameState::Start }
    }
}

impl<S> Stream for Framed<S>
where
    S: Stream<Item = Result<Bytes, Failure>>,
{
    type Item = Result<Bytes, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();

        if *this.state == FrameState::Done {
            return Poll::Ready(None);
        }

        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(element)) => {
                let first = *this.state == FrameState::Start;
                *this.state = FrameState::Streaming;
                let framed = frame(*this.framing, element, first);
                if framed.is_err() {
                    *this.state = FrameState::Done;
                }
                Poll::Ready(Some(framed))
            }
            Some(Err(failure)) => {
                *this.state = FrameState::Done;
                Poll::Ready(Some(Err(failure)))
            }
            None => {
                let first = *this.state == FrameState::Start;
                *this.state = FrameState::Done;
                match (*this.framing, first) {
                    (Framing::Array, true) => Poll::Ready(Some(Ok(Bytes::from_static(b"[]")))),
                    (Framing::Array, false) => Poll::Ready(Some(Ok(Bytes::from_static(b"]")))),
                    _ => Poll::Ready(None),
                }
            }
        }
    }
}

fn frame(framing: Framing, element: Bytes, first: bool) -> Result<Bytes, Failure> {
    let framed = match framing {
        Framing::Array => {
            let mut buf = BytesMut::with_capacity(element.len() + 1);
            buf.put_u8(if first { b'[' } else { b',' });
            buf.put(element);
            buf.freeze()
        }
        Framing::NewlineDelimited => {
            let mut buf = BytesMut::with_capacity(element.len() + 1);
            buf.put(element);
            buf.put_u8(b'\n');
            buf.freeze()
        }
        Framing::ServerSentEvents => {
            let data = std::str::from_utf8(&element).map_err(StreamError::from)?;
            let mut buf = String::with_capacity(element.len() + 8);
            // `lines` yields nothing for empty data, the event still needs one data field
            for line in data.lines().chain(data.is_empty().then_some("")) {
                buf.push_str("data: ");
                buf.push_str(line);
                buf.push('\n');
            }
            buf.push('\n');
            Bytes::from(buf)
        }
        Framing::Raw => element,
    };
    Ok(framed)
}
