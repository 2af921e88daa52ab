//! JSON-over-HTTP message gateway.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::MessageGateway;
use crate::config::ThreadlineConfig;
use crate::error::Result;
use crate::transport::http::{build_client, json_headers, status_to_error};
use crate::types::{MessageId, PostMessage, ThreadId, ThreadMessage, VoteValue};

#[derive(Debug, Serialize)]
struct PostMessageBody<'a> {
    thread_id: ThreadId,
    #[serde(flatten)]
    message: &'a PostMessage,
}

#[derive(Debug, Serialize)]
struct VoteBody {
    message_id: MessageId,
    vote_value: VoteValue,
}

/// [`MessageGateway`] backed by the host application's JSON endpoints.
#[derive(Debug, Clone)]
pub struct HttpMessageGateway {
    config: ThreadlineConfig,
    client: reqwest::Client,
}

impl HttpMessageGateway {
    pub fn new(config: ThreadlineConfig) -> Result<Self> {
        config.validate()?;
        let client = build_client(&config)?;
        Ok(Self { config, client })
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.config.endpoint(path);
        let resp = self
            .client
            .post(&url)
            .headers(json_headers(&self.config)?)
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }
        Ok(resp)
    }
}

#[async_trait]
impl MessageGateway for HttpMessageGateway {
    async fn post_message(&self, thread_id: ThreadId, message: PostMessage) -> Result<ThreadMessage> {
        debug!(%thread_id, role = %message.role, "Posting thread message");
        let body = PostMessageBody {
            thread_id,
            message: &message,
        };
        let resp = self.post_json(&self.config.post_path, &body).await?;
        Ok(resp.json().await?)
    }

    async fn vote(&self, message_id: MessageId, value: VoteValue) -> Result<()> {
        debug!(%message_id, %value, "Voting on message");
        let body = VoteBody {
            message_id,
            vote_value: value,
        };
        self.post_json(&self.config.vote_path, &body).await?;
        Ok(())
    }
}
