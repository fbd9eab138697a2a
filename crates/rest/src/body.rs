use crate::error::{BodyReadError, BoxError, PayloadTooLarge, StreamError};
use crate::handler::{HandlerOutcome, Phase, PhaseHandler, SharedHandler, Suspension};
use crate::registry::{BodyMode, Customizer, OperationDescriptor};
use crate::request::RequestContext;
use crate::Failure;
use bytes::Bytes;
use http_body::Body as HttpBody;
use http_body::{Frame, SizeHint};
use http_body_util::combinators::{BoxBody, UnsyncBoxBody};
use http_body_util::{BodyExt, Empty, Full, LengthLimitError, Limited};
use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

/// The body of an incoming request, as handed over by the transport.
pub struct RequestBody {
    inner: BoxBody<Bytes, BoxError>,
}

impl RequestBody {
    pub fn new<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes> + Send + Sync + 'static,
        B::Error: Into<BoxError>,
    {
        Self { inner: BoxBody::new(body.map_err(Into::into)) }
    }

    pub fn empty() -> Self {
        Self::new(Empty::<Bytes>::new())
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::new(Full::new(bytes))
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::from(Bytes::from(value))
    }
}

impl From<&'static str> for RequestBody {
    fn from(value: &'static str) -> Self {
        if value.is_empty() { Self::empty() } else { Self::from(Bytes::from_static(value.as_bytes())) }
    }
}

impl Debug for RequestBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestBody").field("size_hint", &self.inner.size_hint()).finish()
    }
}

impl HttpBody for RequestBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// The body of the `http::Response` handed to a transport by [`Pipeline::handle`](crate::Pipeline::handle).
pub struct ResponseBody {
    inner: Kind,
}

enum Kind {
    Once(Option<Bytes>),
    Stream(UnsyncBoxBody<Bytes, StreamError>),
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self { inner: Kind::Once(None) }
    }

    pub fn once(bytes: Bytes) -> Self {
        Self { inner: Kind::Once(Some(bytes)) }
    }

    pub fn stream<B>(body: B) -> Self
    where
        B: HttpBody<Data = Bytes, Error = StreamError> + Send + 'static,
    {
        Self { inner: Kind::Stream(UnsyncBoxBody::new(body)) }
    }
}

impl From<String> for ResponseBody {
    fn from(value: String) -> Self {
        ResponseBody { inner: Kind::Once(Some(Bytes::from(value))) }
    }
}

impl From<Option<Bytes>> for ResponseBody {
    fn from(option: Option<Bytes>) -> Self {
        match option {
            Some(bytes) => Self::once(bytes),
            None => Self::empty(),
        }
    }
}

impl From<&'static str> for ResponseBody {
    fn from(value: &'static str) -> Self {
        if value.is_empty() { Self::empty() } else { Self::once(value.as_bytes().into()) }
    }
}

impl Debug for ResponseBody {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Kind::Once(bytes) => f.debug_tuple("ResponseBody::Once").field(&bytes.as_ref().map(Bytes::len)).finish(),
            Kind::Stream(_) => f.write_str("ResponseBody::Stream"),
        }
    }
}

impl HttpBody for ResponseBody {
    type Data = Bytes;
    type Error = StreamError;

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let kind = &mut self.get_mut().inner;
        match kind {
            Kind::Once(option_bytes) => Poll::Ready(option_bytes.take().map(|bytes| Ok(Frame::data(bytes)))),
            Kind::Stream(box_body) => {
                let pin = Pin::new(box_body);
                pin.poll_frame(cx)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        let kind = &self.inner;
        match kind {
            Kind::Once(option_bytes) => option_bytes.is_none(),
            Kind::Stream(box_body) => box_body.is_end_stream(),
        }
    }

    fn size_hint(&self) -> SizeHint {
        let kind = &self.inner;
        match kind {
            Kind::Once(None) => SizeHint::with_exact(0),
            Kind::Once(Some(bytes)) => SizeHint::with_exact(bytes.len() as u64),
            Kind::Stream(box_body) => box_body.size_hint(),
        }
    }
}

/// Buffers the request body of operations declared with [`BodyMode::Buffer`].
#[derive(Debug)]
pub struct BodyReaderCustomizer {
    limit: usize,
}

impl BodyReaderCustomizer {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Customizer for BodyReaderCustomizer {
    fn contribute(&self, phase: Phase, target: &OperationDescriptor) -> Vec<SharedHandler> {
        match (phase, target.body()) {
            (Phase::PostMatch, BodyMode::Buffer) => vec![Arc::new(BodyReader { limit: self.limit })],
            _ => vec![],
        }
    }
}

struct BodyReader {
    limit: usize,
}

impl PhaseHandler for BodyReader {
    fn handle(&self, ctx: &mut RequestContext) -> HandlerOutcome {
        let Some(body) = ctx.take_body() else {
            return HandlerOutcome::Completed;
        };

        if body.is_end_stream() {
            ctx.set_body_bytes(Bytes::new());
            return HandlerOutcome::Completed;
        }

        let limit = self.limit;
        if body.size_hint().lower() > limit as u64 {
            return HandlerOutcome::Failed(PayloadTooLarge { limit }.into());
        }

        trace!(request_id = ctx.id(), limit, "reading request body");
        let read = async move {
            match Limited::new(body, limit).collect().await {
                Ok(collected) => Ok(collected.to_bytes()),
                Err(e) if e.is::<LengthLimitError>() => Err(Failure::new(PayloadTooLarge { limit })),
                Err(e) => Err(Failure::new(BodyReadError::new(e))),
            }
        };
        Suspension::then(read, |ctx, bytes| {
            ctx.set_body_bytes(bytes);
            Ok(())
        })
        .into()
    }

    fn name(&self) -> &str {
        "body_reader"
    }
}
