//! SVA Evidence
//!
//! Content-addressed evidence for story verification.
//!
//! # Core Concepts
//!
//! - [`EvidenceReference`]: `path[:start-end]` pointer to supporting code
//! - [`ContentHash`]: 32-byte Blake3 hash of a file's bytes
//! - [`FileHasher`]: hashes files of one repository checkout
//! - [`build_evidence_hashes`]: groups references per file and hashes each file once
//!
//! # Example
//!
//! ```rust,ignore
//! use sva_evidence::{build_evidence_hashes, CheckoutHasher};
//!
//! let hasher = CheckoutHasher::new("/work/checkout");
//! let hashes = build_evidence_hashes(&["src/auth/reset.ts:10-40"], &hasher).await;
//! assert!(hashes.is_complete());
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod builder;
mod hash;
mod hasher;
mod memory;
mod reference;

pub use builder::{build_evidence_hashes, EvidenceHashes, FileEvidenceEntry};
pub use hash::{ContentHash, HashError};
pub use hasher::{CheckoutHasher, FileHashError, FileHasher, MemoizedHasher};
pub use memory::MemoryFileHasher;
pub use reference::{extract_paths, group_by_path, EvidenceReference, LineRange, ReferenceError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
