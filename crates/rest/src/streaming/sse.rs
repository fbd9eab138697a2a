//! Server-sent events.

use crate::streaming::{ElementSource, Framing, StreamingEmitter};
use bytes::Bytes;
use futures::channel::mpsc::{SendError, Sender, channel};
use futures::{SinkExt, Stream};
use http::header::CACHE_CONTROL;
use http::HeaderValue;
use std::fmt::Write;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Retry(Duration),
    Message(Message),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    // https://html.spec.whatwg.org/multipage/server-sent-events.html#concept-event-stream-last-event-id
    pub id: Option<String>,
    pub name: Option<String>,
    // the message data
    pub data: String,
}

impl Event {
    pub fn message(data: String, id: Option<String>, name: Option<String>) -> Event {
        Event::Message(Message { id, name, data })
    }

    pub fn from_data<S: Into<String>>(data: S) -> Event {
        Event::Message(Message { id: None, name: None, data: data.into() })
    }

    pub fn retry(duration: impl Into<Duration>) -> Event {
        Event::Retry(duration.into())
    }

    /// Encodes the event in the `text/event-stream` format, including the blank line ending it.
    pub fn encode(&self) -> Bytes {
        let mut string = String::new();
        match self {
            Event::Message(Message { id, name, data }) => {
                string.reserve(data.len() + 16);
                if let Some(i) = id {
                    let _ = writeln!(string, "id: {i}");
                }
                if let Some(n) = name {
                    let _ = writeln!(string, "event: {n}");
                }
                for s in data.lines() {
                    let _ = writeln!(string, "data: {s}");
                }
                string.push('\n');
            }
            Event::Retry(duration) => {
                let _ = write!(string, "retry: {}\n\n", duration.as_millis());
            }
        }
        Bytes::from(string)
    }
}

impl ElementSource {
    pub fn events<S>(stream: S) -> Self
    where
        S: Stream<Item = Event> + Send + 'static,
    {
        Self::encoded(stream, |event| Ok(event.encode()))
    }
}

impl StreamingEmitter {
    /// A `text/event-stream` reply, events are written as soon as they are produced.
    pub fn events<S>(stream: S) -> Self
    where
        S: Stream<Item = Event> + Send + 'static,
    {
        let emitter = StreamingEmitter::new(ElementSource::events(stream))
            .with_framing(Framing::Raw)
            .with_content_type(Framing::ServerSentEvents.content_type());
        // a fresh head is never committed
        let _ = emitter.head().add_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        emitter
    }
}

/// The sending half of [`sse_channel`].
#[derive(Debug, Clone)]
pub struct SseSender {
    sink: Sender<Event>,
}

impl SseSender {
    pub async fn send(&mut self, event: Event) -> Result<(), SendError> {
        self.sink.send(event).await
    }

    pub async fn close(&mut self) -> Result<(), SendError> {
        self.sink.close().await
    }
}

/// An event stream fed through a bounded channel, the reply ends when every sender is dropped or
/// closed.
pub fn sse_channel(buffer: usize) -> (StreamingEmitter, SseSender) {
    let (sender, receiver) = channel::<Event>(buffer);
    (StreamingEmitter::events(receiver), SseSender { sink: sender })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn encode_message() {
        let event = Event::message("a\nb".into(), Some("1".into()), Some("update".into()));
        assert_eq!(event.encode(), Bytes::from_static(b"id: 1\nevent: update\ndata: a\ndata: b\n\n"));
        assert_eq!(Event::retry(Duration::from_secs(3)).encode(), Bytes::from_static(b"retry: 3000\n\n"));
    }

    #[tokio::test]
    async fn channel_events() {
        let (emitter, mut sender) = sse_channel(2);
        assert_eq!(emitter.head().lock().headers.get(CACHE_CONTROL).unwrap(), "no-cache");

        tokio::spawn(async move {
            sender.send(Event::from_data("one")).await.unwrap();
            sender.send(Event::from_data("two")).await.unwrap();
        });

        let open = emitter.open(1, Framing::Array).await.unwrap();
        assert_eq!(open.content_type, "text/event-stream");
        let chunks: Vec<_> = open.chunks.map(Result::unwrap).collect().await;
        assert_eq!(chunks, vec![Bytes::from_static(b"data: one\n\n"), Bytes::from_static(b"data: two\n\n")]);
    }
}
