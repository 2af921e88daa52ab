//! Message persistence gateway.

pub mod http;

pub use http::HttpMessageGateway;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{MessageId, PostMessage, ThreadId, ThreadMessage, VoteValue};

/// Persists thread messages and records votes.
///
/// Each call stands alone: a failure leaves nothing half-written and the
/// gateway never retries on its own.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    async fn post_message(&self, thread_id: ThreadId, message: PostMessage) -> Result<ThreadMessage>;

    async fn vote(&self, message_id: MessageId, value: VoteValue) -> Result<()>;
}
