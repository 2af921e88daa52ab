//! User-visible notifications raised by composers.

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::mpsc;

use crate::types::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A message meant for the person looking at the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub thread_id: ThreadId,
    pub severity: Severity,
    pub message: String,
}

impl Notification {
    pub fn error(thread_id: ThreadId, message: impl Into<String>) -> Self {
        Self {
            thread_id,
            severity: Severity::Error,
            message: message.into(),
        }
    }

    pub fn warning(thread_id: ThreadId, message: impl Into<String>) -> Self {
        Self {
            thread_id,
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Receives notifications; must not block.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        let Notification {
            thread_id,
            severity,
            message,
        } = notification;
        match severity {
            Severity::Info => tracing::info!(%thread_id, "{message}"),
            Severity::Warning => tracing::warn!(%thread_id, "{message}"),
            Severity::Error => tracing::error!(%thread_id, "{message}"),
        }
    }
}

/// Forwards notifications over an unbounded channel, e.g. to a UI task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_notifier_delivers_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification::warning(ThreadId(1), "first"));
        notifier.notify(Notification::error(ThreadId(1), "second"));

        assert_eq!(rx.recv().await.unwrap().message, "first");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.severity, Severity::Error);
        assert_eq!(second.message, "second");
    }

    #[test]
    fn dropped_receiver_does_not_panic() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(Notification::error(ThreadId(2), "nobody listening"));
    }
}
