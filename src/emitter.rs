//! The capability handed to a prompt handler for writing events.
//!
//! Writes go into an unbounded queue drained by the response body, so every
//! call returns immediately. Once the response has finished or the client has
//! gone away, further writes are dropped silently.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};

use crate::protocol::{CustomEvent, Event, StreamEvent, to_line};

type LineSender = mpsc::UnboundedSender<String>;

#[derive(Clone)]
pub struct Emitter {
    sender: Arc<Mutex<Option<LineSender>>>,
    released: watch::Receiver<()>,
}

/// The reading half of an [`Emitter`]: serialized lines in emission order.
///
/// Dropping it (hyper does so on disconnect or once the body is done) marks
/// every clone of the emitter as closed.
pub struct LineStream {
    receiver: mpsc::UnboundedReceiver<String>,
    _release: watch::Sender<()>,
}

impl Stream for LineStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Emitter {
    pub fn channel() -> (Emitter, LineStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (release, released) = watch::channel(());
        let emitter = Emitter {
            sender: Arc::new(Mutex::new(Some(sender))),
            released,
        };
        let lines = LineStream {
            receiver,
            _release: release,
        };
        (emitter, lines)
    }

    /// Serialize `event` and queue it behind everything emitted before it.
    pub fn emit(&self, event: impl Into<Event>) {
        let event = event.into();
        let line = match to_line(&event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(kind = event.kind(), error = %err, "failed to serialize event");
                return;
            }
        };

        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => {
                if sender.send(line).is_err() {
                    tracing::debug!(kind = event.kind(), "client gone, dropping event");
                } else {
                    tracing::debug!(kind = event.kind(), "event queued");
                }
            }
            None => tracing::debug!(kind = event.kind(), "stream finished, dropping event"),
        }
    }

    pub fn text_chunk(&self, text: impl Into<String>) {
        self.emit(StreamEvent::TextChunk { text: text.into() });
    }

    pub fn tool_start(
        &self,
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Option<Map<String, Value>>,
    ) {
        self.emit(StreamEvent::ToolStart {
            id: id.into(),
            name: name.into(),
            arguments,
        });
    }

    pub fn tool_done(&self, id: impl Into<String>, result: impl Into<String>) {
        self.emit(StreamEvent::ToolDone {
            id: id.into(),
            result: result.into(),
        });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(StreamEvent::Error {
            message: message.into(),
        });
    }

    pub fn done(&self) {
        self.emit(StreamEvent::Done { result: None });
    }

    pub fn done_with_result(&self, result: impl Into<String>) {
        self.emit(StreamEvent::Done {
            result: Some(result.into()),
        });
    }

    pub fn custom(&self, kind: impl Into<String>, fields: Map<String, Value>) {
        self.emit(CustomEvent::new(kind, fields));
    }

    /// True once the stream can no longer deliver events.
    pub fn is_closed(&self) -> bool {
        if self.released.has_changed().is_err() {
            return true;
        }
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().is_none_or(|sender| sender.is_closed())
    }

    /// Resolves when the reading side is dropped, e.g. because the client
    /// disconnected. Handlers may race their work against this to stop early.
    pub async fn closed(&self) {
        let mut released = self.released.clone();
        while released.changed().await.is_ok() {}
    }

    /// Stop accepting events. The queue drains and the stream ends once
    /// everything already emitted has been read.
    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
