//! Streaming event types.

use serde::{Deserialize, Serialize};

/// An event delivered by a stream transport.
///
/// On the wire each record is a JSON object tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Stream accepted by the server.
    Start,
    /// Incremental text content.
    Content { text: String },
    /// Model started a tool invocation.
    ToolStart {
        #[serde(alias = "tool_call_id")]
        call_id: String,
        function_name: String,
        #[serde(default)]
        arguments: String,
    },
    /// Tool invocation finished.
    ToolEnd {
        #[serde(alias = "tool_call_id")]
        call_id: String,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        formatted_content: Option<String>,
    },
    /// Terminal failure.
    Error { message: String },
    /// Terminal success.
    End,
    /// Record type this client does not know; skipped.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content { text: text.into() }
    }

    pub fn tool_start(call_id: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self::ToolStart {
            call_id: call_id.into(),
            function_name: function_name.into(),
            arguments: String::new(),
        }
    }

    pub fn tool_end(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolEnd {
            call_id: call_id.into(),
            content: content.into(),
            formatted_content: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether the event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::End)
    }
}

/// A tool invocation in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub function_name: String,
    pub arguments: String,
}

/// A completed tool invocation waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub function_name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formatted_content: Option<String>,
}

/// Which kind of stream a transport is asked to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// Reply to the user's latest message.
    Reply,
    /// Narrate the tool results just persisted.
    Interpretation,
}
