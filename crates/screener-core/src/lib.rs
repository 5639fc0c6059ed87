#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/screener/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for the fundamentals screener.
//!
//! This crate provides the foundational abstractions shared by every other crate:
//!
//! - [`RecordCache`](cache::RecordCache) - Durable cache store contract
//! - [`RecordSource`](provider::RecordSource) - Per-dataset provider reads
//! - [`UniverseSource`](provider::UniverseSource) - Entity listing
//! - [`RateScheduler`](rate::RateScheduler) - Pure pacing computation
//! - [`Evaluator`](evaluate::Evaluator) - Screening rules seam
//! - [`assess`](coverage::assess) - Coverage of cached periods against a window

/// Cache trait and entry types.
pub mod cache;
/// Coverage assessment and merge rules.
pub mod coverage;
/// Error types for screening operations.
pub mod error;
/// Evaluation verdicts and the evaluator trait.
pub mod evaluate;
/// Normalization of provider frames.
pub mod frame;
/// Provider traits and dataset definitions.
pub mod provider;
/// Account tiers, endpoint classes and the rate scheduler.
pub mod rate;
/// Core data types (EntityId, PeriodKey, PeriodRecord, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use cache::{CacheCategory, CacheEntry, CacheKey, CacheStats, RecordCache, TtlPolicy};
pub use coverage::Coverage;
pub use error::{ErrorKind, Result, ScreenError};
pub use evaluate::{Evaluator, Verdict};
pub use provider::{DataProvider, Dataset, PERIOD_COLUMN, RecordSource, UniverseSource};
pub use rate::{AccountTier, EndpointClass, RateScheduler};
pub use types::{
    EntityId, FetchTask, FieldMap, FieldValue, NormalizedRecordSet, PeriodKey, PeriodRecord,
    PeriodSet, QueryWindow, RecordOrigin,
};
