//! Ordered view of a thread's messages for rendering.

use serde::{Deserialize, Serialize};

use crate::session::{SessionSnapshot, SessionStatus};
use crate::types::{MessageId, ThreadMessage, ToolCall, VoteValue};

/// The in-flight reply, shown after the persisted messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEntry {
    pub status: SessionStatus,
    pub text: String,
    pub showing_placeholder: bool,
    pub active_tool: Option<ToolCall>,
}

/// One row of the rendered thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThreadEntry {
    Persisted(ThreadMessage),
    Live(LiveEntry),
}

impl ThreadEntry {
    /// Persisted id; `None` for the live entry.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Persisted(message) => Some(message.id),
            Self::Live(_) => None,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live(_))
    }

    /// Votes and retries only apply to persisted messages.
    pub fn is_votable(&self) -> bool {
        self.message_id().is_some()
    }
}

/// Persisted messages ordered by creation time, unique by id.
#[derive(Debug, Clone, Default)]
pub struct ThreadMessageSequence {
    messages: Vec<ThreadMessage>,
}

impl ThreadMessageSequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a message. Returns `true` if the id was new.
    pub fn insert(&mut self, message: ThreadMessage) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            self.messages.sort_by_key(|m| (m.created_at, m.id));
            return false;
        }
        let index = self
            .messages
            .partition_point(|m| (m.created_at, m.id) <= (message.created_at, message.id));
        self.messages.insert(index, message);
        true
    }

    pub fn get(&self, id: MessageId) -> Option<&ThreadMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadMessage> {
        self.messages.iter()
    }

    /// Record a vote on a persisted message. Returns `false` if unknown.
    pub fn apply_vote(&mut self, id: MessageId, value: VoteValue) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.vote_value = value;
                true
            }
            None => false,
        }
    }

    /// Persisted messages followed by the live entry while a reply is in flight.
    pub fn entries(&self, snapshot: &SessionSnapshot) -> Vec<ThreadEntry> {
        let mut entries: Vec<ThreadEntry> = self
            .messages
            .iter()
            .cloned()
            .map(ThreadEntry::Persisted)
            .collect();
        if !snapshot.status.is_at_rest() {
            entries.push(ThreadEntry::Live(LiveEntry {
                status: snapshot.status,
                text: snapshot.text.clone(),
                showing_placeholder: snapshot.showing_placeholder,
                active_tool: snapshot.active_tool.clone(),
            }));
        }
        entries
    }
}

impl Extend<ThreadMessage> for ThreadMessageSequence {
    fn extend<T: IntoIterator<Item = ThreadMessage>>(&mut self, iter: T) {
        for message in iter {
            self.insert(message);
        }
    }
}

impl FromIterator<ThreadMessage> for ThreadMessageSequence {
    fn from_iter<T: IntoIterator<Item = ThreadMessage>>(iter: T) -> Self {
        let mut sequence = Self::new();
        sequence.extend(iter);
        sequence
    }
}
