//! Experience stores for Cirrus agents.
//!
//! Records live in namespaces (one per agent and user, e.g.
//! `learning:alice`) and are ranked against free-text queries with BM25.
//!
//! # Main types
//!
//! - [`InMemoryExperienceStore`]: Process-local store, lost on exit.
//! - [`FileExperienceStore`]: JSONL-backed store that reloads on start.
//! - [`KeywordIndex`]: BM25 index used by both stores.

/// BM25 keyword index.
pub mod bm25;
/// In-memory and file-backed experience stores.
pub mod store;

pub use bm25::KeywordIndex;
pub use store::{FileExperienceStore, InMemoryExperienceStore};
