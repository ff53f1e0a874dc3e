//! Network collaborators for Lantern.
//!
//! [`OpenAiCompatProvider`] implements `lantern_core::Provider` (completions
//! and embeddings); [`GoogleSearch`] implements `lantern_core::SearchEngine`.

pub mod google_search;
pub mod openai_compat;

pub use google_search::GoogleSearch;
pub use openai_compat::OpenAiCompatProvider;
