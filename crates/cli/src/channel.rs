//! Terminal channel: stdin lines in, stdout replies out.
//!
//! Without a group every line is a direct message. With `--group`, the
//! session behaves like a group channel: only lines starting with `@`
//! address the agent, everything else is chatter it may or may not join.

use async_trait::async_trait;
use chrono::Utc;
use lantern_core::channel::{Channel, ChatEvent};
use lantern_core::error::ChannelError;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const CHANNEL_ID: &str = "terminal";

/// Who is typing, and where.
#[derive(Debug, Clone)]
pub struct Session {
    pub user: String,
    pub thread: String,
    pub group: Option<String>,
}

impl Session {
    /// The chat event for one typed line.
    pub fn event(&self, line: &str) -> ChatEvent {
        let line = line.trim();
        let (addressed, text) = match (&self.group, line.strip_prefix('@')) {
            (None, _) => (true, line),
            (Some(_), Some(rest)) => (true, rest.trim_start()),
            (Some(_), None) => (false, line),
        };

        ChatEvent {
            message_id: uuid::Uuid::new_v4().to_string(),
            author_id: self.user.clone(),
            author_name: Some(self.user.clone()),
            channel_id: CHANNEL_ID.into(),
            thread_id: self.thread.clone(),
            group_id: self.group.clone(),
            text: text.to_string(),
            is_bot_author: false,
            addressed,
            timestamp: Utc::now(),
        }
    }
}

pub struct TerminalChannel {
    session: Session,
    speaker: String,
}

impl TerminalChannel {
    pub fn new(session: Session, speaker: impl Into<String>) -> Self {
        Self {
            session,
            speaker: speaker.into(),
        }
    }
}

fn is_exit(line: &str) -> bool {
    matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl Channel for TerminalChannel {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn start(&self) -> Result<mpsc::Receiver<ChatEvent>, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let session = self.session.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if is_exit(line) {
                            break;
                        }
                        if tx.send(session.event(line)).await.is_err() {
                            break;
                        }
                    }
                    // EOF (Ctrl+D)
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("Terminal input closed: {e}");
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, _channel_id: &str, content: &str, _reply_to: Option<&str>) -> Result<(), ChannelError> {
        println!();
        for line in content.lines() {
            println!("  {} > {line}", self.speaker);
        }
        println!();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(group: Option<&str>) -> Session {
        Session {
            user: "aki".into(),
            thread: "t1".into(),
            group: group.map(String::from),
        }
    }

    #[test]
    fn direct_session_addresses_every_line() {
        let event = session(None).event("  hello there ");
        assert!(event.addressed);
        assert_eq!(event.text, "hello there");
        assert_eq!(event.scope().thread().key(), "thread:aki:t1");
        assert!(event.group_id.is_none());
    }

    #[test]
    fn group_session_needs_a_mention() {
        let s = session(Some("g1"));
        let chatter = s.event("anyone up for lunch");
        assert!(!chatter.addressed);
        assert_eq!(chatter.group_id.as_deref(), Some("g1"));

        let mention = s.event("@ what's the weather?");
        assert!(mention.addressed);
        assert_eq!(mention.text, "what's the weather?");
    }

    #[test]
    fn message_ids_are_unique() {
        let s = session(None);
        assert_ne!(s.event("a").message_id, s.event("a").message_id);
    }

    #[test]
    fn exit_words() {
        assert!(is_exit("quit"));
        assert!(is_exit(":q"));
        assert!(!is_exit("quite"));
        assert_eq!(TerminalChannel::new(session(None), "Lantern").name(), "terminal");
    }
}
