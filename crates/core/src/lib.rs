//! # Lantern Core
//!
//! Domain types, traits, and error definitions for the Lantern conversational
//! agent. This crate has no I/O of its own. It defines the domain model that
//! every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (completion service, persistence, search
//! engine, page fetcher, chat platform) is a trait here. Implementations live
//! in their respective crates, so the crawler and the context assembler can
//! be exercised against in-process fakes.

pub mod error;
pub mod message;
pub mod provider;
pub mod channel;
pub mod memory;
pub mod search;
pub mod fetch;
pub mod crawl;
pub mod clock;
pub mod event;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use message::{ConversationTurn, MemorySegment, Message, Role, SegmentKind, Speaker};
pub use provider::{EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse};
pub use channel::{Channel, ChatEvent};
pub use memory::{MemoryStore, RecalledTurn, RollingSummary, StoreScope, ThreadScope, UserProfile};
pub use search::{SearchEngine, SearchHit};
pub use fetch::{FetchedPage, PageFetcher};
pub use crawl::{AccessTier, Caller, CrawlBudget, CrawlNode};
pub use clock::{Clock, ManualClock, SystemClock};
pub use event::{DomainEvent, EventBus, QuotaScope};
