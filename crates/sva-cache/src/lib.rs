//! SVA Evidence Cache
//!
//! Per-commit snapshots of the evidence that backed each step verdict of a
//! story, and the logic to decide which of those verdicts still hold.
//!
//! # Architecture
//!
//! ```text
//! CompletedEvaluation ─► build_cache_data ─► CacheData ─► EvidenceCacheStore::save
//!                                                              │
//!                          (story_id, [c3, c2, c1]) ─► get ◄───┘
//!                                                       │
//!                                  CacheEntry ─► validate(hasher, strategy) ─► ValidationResult
//! ```
//!
//! Stored blobs are never trusted: [`validate`] reads them one assertion at a
//! time against a JSON schema, so malformed rows degrade to "re-verify"
//! instead of failing the run.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod backend;
mod builder;
mod error;
mod model;
mod schema;
mod store;
mod validator;

pub use backend::{CacheBackend, MemoryBackend, SqliteBackend};
pub use builder::{build_cache_data, CompletedEvaluation, EvaluatedAssertion, EvaluatedStep};
pub use error::{CacheError, CacheResult, UnknownStrategy};
pub use model::{
    AssertionCacheEntry, AssertionIndex, CacheData, CacheEntry, InvalidationStrategy,
    StepCacheEntry, StepConclusion, StepIndex,
};
pub use store::{CommitLookup, EvidenceCacheStore, SaveOutcome};
pub use validator::{validate, InvalidAssertion, ValidationResult};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
