#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/screener/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Cache store implementations for the fundamentals screener.
//!
//! This crate provides implementations of the [`RecordCache`] trait from `screener-core`:
//!
//! - [`FileCache`] - Durable one-file-per-key JSON cache with atomic writes (default)
//! - [`InMemoryCache`] - Simple in-memory cache for testing
//! - [`NoopCache`] - No-op cache that doesn't store anything

/// File-backed cache implementation.
pub mod file;
/// Safe file-name derivation for cache keys.
pub mod key;
/// In-memory cache implementation.
pub mod memory;
/// No-op cache implementation.
pub mod noop;

// Re-export the trait for convenience
pub use screener_core::RecordCache;

// Re-export implementations
pub use file::FileCache;
pub use memory::InMemoryCache;
pub use noop::NoopCache;
