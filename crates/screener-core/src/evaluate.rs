//! Evaluation seam.
//!
//! Rule sets live outside this workspace. The batch engine only needs a pass/fail
//! verdict for fundamentals and valuation plus a ranking key.

use serde::Serialize;
use std::fmt::Debug;

use crate::types::{FieldMap, NormalizedRecordSet};

/// Outcome of one rule set applied to one entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Verdict {
    /// Whether the entity satisfies the rules.
    pub passed: bool,
    /// Optional numeric score produced by the rules.
    pub score: Option<f64>,
    /// Rule-specific details.
    pub details: FieldMap,
}

impl Verdict {
    /// A passing verdict.
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Self::default()
        }
    }

    /// A failing verdict.
    #[must_use]
    pub fn reject() -> Self {
        Self::default()
    }

    /// Sets the score.
    #[must_use]
    pub const fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Pure evaluation rules applied to normalized records.
pub trait Evaluator: Send + Sync + Debug {
    /// Applies the fundamentals rules.
    fn fundamentals(&self, records: &NormalizedRecordSet) -> Verdict;

    /// Applies the valuation rules.
    fn valuation(&self, records: &NormalizedRecordSet) -> Verdict;

    /// Ascending sort key among passed entities; `None` sorts last.
    fn ranking_key(&self, _records: &NormalizedRecordSet, valuation: &Verdict) -> Option<f64> {
        valuation.score
    }
}
