//! Stream transports: open a server-push event stream for a thread.

pub mod http;
pub mod sse;

pub use sse::{HttpSseTransport, SseDecoder};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use uuid::Uuid;

use crate::error::{Result, ThreadlineError};
use crate::types::{StreamEvent, StreamMode, ThreadId};

/// What a transport is asked to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub thread_id: ThreadId,
    pub mode: StreamMode,
}

impl StreamRequest {
    pub fn reply(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            mode: StreamMode::Reply,
        }
    }

    pub fn interpretation(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            mode: StreamMode::Interpretation,
        }
    }
}

/// Opens event streams scoped to a thread.
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn open(&self, request: &StreamRequest) -> Result<StreamHandle>;
}

/// A live, non-restartable event stream.
///
/// Raw transport failures never reach the consumer as errors: they are turned
/// into one synthetic [`StreamEvent::Error`] after which the handle is closed.
/// A stream that ends without a terminal event is treated the same way.
pub struct StreamHandle {
    id: Uuid,
    events: Option<BoxStream<'static, Result<StreamEvent>>>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StreamHandle {
    pub fn new(events: BoxStream<'static, Result<StreamEvent>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            events: Some(events),
        }
    }

    /// Handle over a fixed list of events.
    pub fn from_events(events: Vec<StreamEvent>) -> Self {
        Self::new(futures::stream::iter(events.into_iter().map(Ok)).boxed())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_none()
    }

    /// Next event, or `None` once the handle is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let events = self.events.as_mut()?;
        loop {
            match events.next().await {
                Some(Ok(StreamEvent::Unknown)) => continue,
                Some(Ok(event)) => {
                    if event.is_terminal() {
                        self.close();
                    }
                    return Some(event);
                }
                Some(Err(e)) => {
                    tracing::error!(stream = %self.id, error = %e, "Stream transport failed");
                    self.close();
                    return Some(StreamEvent::error(e.to_string()));
                }
                None => {
                    tracing::warn!(stream = %self.id, "Stream closed without a terminal event");
                    self.close();
                    return Some(StreamEvent::error(
                        ThreadlineError::Stream("connection closed before the reply finished".into())
                            .to_string(),
                    ));
                }
            }
        }
    }

    /// Drop the underlying connection. Idempotent.
    pub fn close(&mut self) {
        if self.events.take().is_some() {
            tracing::debug!(stream = %self.id, "Stream closed");
        }
    }
}
