//! Convenience re-exports for common use.

pub use crate::config::ThreadlineConfig;
pub use crate::error::{Result, ThreadlineError};
pub use crate::gateway::{HttpMessageGateway, MessageGateway};
pub use crate::notify::{ChannelNotifier, Notification, Notifier, Severity, TracingNotifier};
pub use crate::session::{
    Collaborators, Composer, SessionSnapshot, SessionStatus, SubmitOutcome, TurnReport,
};
pub use crate::thread::{ComposerRegistry, ThreadEntry};
pub use crate::transport::{HttpSseTransport, StreamHandle, StreamRequest, StreamTransport};
pub use crate::types::{
    MessageId, PostMessage, Role, StreamEvent, ThreadId, ThreadMessage, VoteValue,
};
