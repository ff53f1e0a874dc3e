//! Message, turn, and segment domain types.
//!
//! Three value objects flow through the system:
//! - [`ConversationTurn`]: one persisted utterance of a thread
//! - [`MemorySegment`]: the context assembler's unit, tagged with its tier
//! - [`Message`]: what is finally sent to the completion service

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The role of a message in a completion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions (persona, rules, injected memory)
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

/// A single message in a completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::User => Role::User,
            Self::Assistant => Role::Assistant,
        }
    }
}

impl std::str::FromStr for Speaker {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("unknown speaker '{other}'")),
        }
    }
}

/// One utterance in a thread. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(speaker: Speaker, text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            speaker,
            text: text.into(),
            timestamp,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Speaker::User, text, Utc::now())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Speaker::Assistant, text, Utc::now())
    }
}

/// Which memory tier (or summarizer input) a segment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Rolling summary of the thread
    LongTermSummary,
    /// Rolling summary of the group the thread belongs to
    GroupSummary,
    /// What is known about the user across threads
    UserProfile,
    /// Turn pulled back by embedding similarity
    Recalled,
    /// One of the most recent turns
    ShortTerm,
    /// Derived analysis: what the conversation is about
    Topic,
    /// Derived analysis: open question the user still has
    Unresolved,
    /// Derived analysis: what the user expects from the reply
    Expectation,
    /// Derived analysis: emotional register of the user
    Tone,
    /// Derived analysis: intents detected in the latest message
    Intents,
    /// Summarizer instruction block
    Instruction,
    /// Chunk of crawled source text
    Source,
}

impl SegmentKind {
    /// Derived-analysis kinds, in the order they are emitted.
    pub const ANALYSIS: [SegmentKind; 5] = [
        Self::Topic,
        Self::Unresolved,
        Self::Expectation,
        Self::Tone,
        Self::Intents,
    ];
}

/// The context assembler's unit of prompt text.
///
/// `pinned` segments are never removed by compaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySegment {
    pub role: Role,
    pub content: String,
    pub pinned: bool,
    pub kind: SegmentKind,
}

impl MemorySegment {
    pub fn new(role: Role, content: impl Into<String>, kind: SegmentKind) -> Self {
        Self {
            role,
            content: content.into(),
            pinned: false,
            kind,
        }
    }

    /// A system segment.
    pub fn system(content: impl Into<String>, kind: SegmentKind) -> Self {
        Self::new(Role::System, content, kind)
    }

    /// Build a segment from a persisted turn.
    pub fn from_turn(turn: &ConversationTurn, kind: SegmentKind) -> Self {
        Self::new(turn.speaker.role(), turn.text.clone(), kind)
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    /// Size used for budget accounting, in characters.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
        }
    }
}
