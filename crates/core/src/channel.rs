//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel delivers inbound [`ChatEvent`]s and sends replies back. The
//! platform event loop itself lives outside this workspace; only a terminal
//! channel ships with the binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ChannelError;
use crate::memory::ThreadScope;

/// An inbound message from a chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Platform message ID, used for threaded replies
    pub message_id: String,

    /// Author identifier (platform-specific user ID)
    pub author_id: String,

    /// Human-readable author name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,

    /// Channel the message was posted in
    pub channel_id: String,

    /// Conversation thread within the channel
    pub thread_id: String,

    /// Group (server/guild) the channel belongs to; `None` for direct messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,

    /// The text content
    pub text: String,

    /// Whether the author is itself a bot
    #[serde(default)]
    pub is_bot_author: bool,

    /// Direct message or explicit mention of the agent
    #[serde(default)]
    pub addressed: bool,

    pub timestamp: DateTime<Utc>,
}

impl ChatEvent {
    /// The memory scope this event reads from and writes to.
    pub fn scope(&self) -> ThreadScope {
        ThreadScope {
            user_id: self.author_id.clone(),
            thread_id: self.thread_id.clone(),
            group_id: self.group_id.clone(),
        }
    }

    /// Display name, falling back to the raw author ID.
    pub fn author_label(&self) -> &str {
        self.author_name.as_deref().unwrap_or(&self.author_id)
    }
}

/// The core Channel trait.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "terminal").
    fn name(&self) -> &str;

    /// Start listening for incoming messages.
    async fn start(
        &self,
    ) -> std::result::Result<tokio::sync::mpsc::Receiver<ChatEvent>, ChannelError>;

    /// Send a reply into a channel, optionally threaded under a message.
    async fn send(
        &self,
        channel_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<(), ChannelError>;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(group: Option<&str>) -> ChatEvent {
        ChatEvent {
            message_id: "m1".into(),
            author_id: "u1".into(),
            author_name: None,
            channel_id: "c1".into(),
            thread_id: "t1".into(),
            group_id: group.map(String::from),
            text: "hello".into(),
            is_bot_author: false,
            addressed: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn scope_carries_group() {
        let scope = event(Some("g1")).scope();
        assert_eq!(scope.user_id, "u1");
        assert_eq!(scope.thread_id, "t1");
        assert!(scope.group().is_some());
    }

    #[test]
    fn direct_message_has_no_group_scope() {
        assert!(event(None).scope().group().is_none());
    }

    #[test]
    fn author_label_falls_back_to_id() {
        let mut ev = event(None);
        assert_eq!(ev.author_label(), "u1");
        ev.author_name = Some("Alice".into());
        assert_eq!(ev.author_label(), "Alice");
    }
}
