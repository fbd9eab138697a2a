//! The boundary between the pipeline and the transport.
//!
//! The pipeline writes a response through a [`ResponseWriter`]: the head exactly once, then any
//! number of body chunks, then either `finish` or `abort`. A transport decides how those map onto
//! the wire, e.g. content length versus chunked encoding.

use crate::body::ResponseBody;
use crate::error::{StreamError, WriteError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::channel::mpsc;
use futures::channel::oneshot;
use futures::{SinkExt, StreamExt};
use http::{HeaderMap, Response, StatusCode};
use http_body::Frame;
use http_body_util::StreamBody;
use tracing::trace;

#[async_trait]
pub trait ResponseWriter: Send {
    /// Commits status and headers, may only be called once.
    async fn write_head(&mut self, head: Response<()>) -> Result<(), WriteError>;

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), WriteError>;

    /// The response is complete.
    async fn finish(&mut self) -> Result<(), WriteError>;

    /// The response can not be completed, the transport must tear the connection down.
    async fn abort(&mut self);
}

pub(crate) fn response_head(status: StatusCode, headers: HeaderMap) -> Response<()> {
    let mut head = Response::new(());
    *head.status_mut() = status;
    *head.headers_mut() = headers;
    head
}

/// Collects the response in memory.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    head: Option<Response<()>>,
    chunks: Vec<Bytes>,
    finished: bool,
    aborted: bool,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<&Response<()>> {
        self.head.as_ref()
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.head.as_ref().map(Response::status)
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.head.as_ref().map(Response::headers)
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Every chunk written so far, concatenated.
    pub fn body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.chunks.iter().map(Bytes::len).sum());
        for chunk in &self.chunks {
            buf.extend_from_slice(chunk);
        }
        buf.freeze()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

#[async_trait]
impl ResponseWriter for MemoryWriter {
    async fn write_head(&mut self, head: Response<()>) -> Result<(), WriteError> {
        if self.head.is_some() {
            return Err(WriteError::HeadWritten);
        }
        self.head = Some(head);
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), WriteError> {
        if self.aborted || self.finished {
            return Err(WriteError::Closed);
        }
        self.chunks.push(chunk);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        self.aborted = true;
    }
}

type ChunkSender = mpsc::Sender<Result<Bytes, StreamError>>;

/// Hands the head over through a oneshot channel and streams the body through a bounded one.
#[derive(Debug)]
pub struct ChannelWriter {
    head: Option<oneshot::Sender<Response<()>>>,
    body: ChunkSender,
}

impl ChannelWriter {
    /// Returns the writer, the receiver of the head and the body fed by the writer.
    pub fn new(capacity: usize) -> (Self, oneshot::Receiver<Response<()>>, ResponseBody) {
        let (head_sender, head_receiver) = oneshot::channel();
        let (body_sender, body_receiver) = mpsc::channel(capacity);
        let body = ResponseBody::stream(StreamBody::new(body_receiver.map(|chunk: Result<Bytes, StreamError>| chunk.map(Frame::data))));
        (Self { head: Some(head_sender), body: body_sender }, head_receiver, body)
    }
}

#[async_trait]
impl ResponseWriter for ChannelWriter {
    async fn write_head(&mut self, head: Response<()>) -> Result<(), WriteError> {
        let sender = self.head.take().ok_or(WriteError::HeadWritten)?;
        sender.send(head).map_err(|_head| WriteError::Closed)
    }

    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), WriteError> {
        self.body.send(Ok(chunk)).await.map_err(|e| {
            trace!(cause = %e, "response body receiver is gone");
            WriteError::Closed
        })
    }

    async fn finish(&mut self) -> Result<(), WriteError> {
        self.body.close_channel();
        Ok(())
    }

    async fn abort(&mut self) {
        // dropping the head sender tells a waiting receiver there will be no response
        self.head = None;
        let _ = self.body.send(Err(StreamError::Aborted)).await;
        self.body.close_channel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;
    use http::HeaderValue;
    use http_body_util::BodyExt;

    fn head(status: StatusCode) -> Response<()> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        response_head(status, headers)
    }

    #[tokio::test]
    async fn memory_writer_collects() {
        let mut writer = MemoryWriter::new();
        writer.write_head(head(StatusCode::CREATED)).await.unwrap();
        writer.write_chunk(Bytes::from_static(b"ab")).await.unwrap();
        writer.write_chunk(Bytes::from_static(b"c")).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(writer.status(), Some(StatusCode::CREATED));
        assert_eq!(writer.headers().unwrap().get(CONTENT_TYPE).unwrap(), "text/plain");
        assert_eq!(writer.body(), Bytes::from_static(b"abc"));
        assert!(writer.is_finished());
        assert!(matches!(writer.write_head(head(StatusCode::OK)).await, Err(WriteError::HeadWritten)));
    }

    #[tokio::test]
    async fn channel_writer_streams_body() {
        let (mut writer, head_receiver, body) = ChannelWriter::new(4);

        writer.write_head(head(StatusCode::OK)).await.unwrap();
        writer.write_chunk(Bytes::from_static(b"hello ")).await.unwrap();
        writer.write_chunk(Bytes::from_static(b"world")).await.unwrap();
        writer.finish().await.unwrap();

        assert_eq!(head_receiver.await.unwrap().status(), StatusCode::OK);
        assert_eq!(body.collect().await.unwrap().to_bytes(), Bytes::from_static(b"hello world"));
    }

    #[tokio::test]
    async fn channel_writer_abort() {
        let (mut writer, head_receiver, mut body) = ChannelWriter::new(4);
        writer.abort().await;

        assert!(head_receiver.await.is_err());
        assert!(matches!(body.frame().await, Some(Err(StreamError::Aborted))));
        assert!(body.frame().await.is_none());
    }
}
