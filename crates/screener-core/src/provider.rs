//! Provider traits for fetching fundamentals.
//!
//! This module defines the core provider traits:
//!
//! - [`DataProvider`] - Base trait for all data providers
//! - [`RecordSource`] - Per-dataset tabular reads for one entity
//! - [`UniverseSource`] - Listing of screenable entities

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::fmt::{self, Debug};

use crate::{
    error::Result,
    rate::EndpointClass,
    types::EntityId,
};

/// Name of the period-end column in every statement frame.
pub const PERIOD_COLUMN: &str = "end_date";

/// Base trait for all data providers.
pub trait DataProvider: Send + Sync + Debug {
    /// Returns the name of this provider (e.g., "Tushare Pro").
    fn name(&self) -> &str;

    /// Returns a description of this provider.
    fn description(&self) -> &str;
}

/// Data category a provider can read for one entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dataset {
    /// Company profile (entity metadata).
    Profile,
    /// Audit opinion records.
    AuditOpinion,
    /// Balance sheet statements.
    BalanceSheet,
    /// Income statements.
    Income,
    /// Cash flow statements.
    CashFlow,
}

impl Dataset {
    /// Statement datasets, in the order they are fetched.
    pub const STATEMENTS: [Self; 4] = [
        Self::AuditOpinion,
        Self::BalanceSheet,
        Self::Income,
        Self::CashFlow,
    ];

    /// Endpoint class used for pacing calls to this dataset.
    #[must_use]
    pub const fn endpoint_class(&self) -> EndpointClass {
        match self {
            Self::Profile => EndpointClass::Metadata,
            _ => EndpointClass::Financial,
        }
    }

    /// Returns a stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::AuditOpinion => "audit_opinion",
            Self::BalanceSheet => "balance_sheet",
            Self::Income => "income",
            Self::CashFlow => "cash_flow",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of tabular records for one entity.
///
/// Statement frames carry a [`PERIOD_COLUMN`] with `YYYYMMDD` strings or dates.
/// An entity with no data yields an empty frame rather than an error.
#[async_trait]
pub trait RecordSource: DataProvider {
    /// Reads one dataset for an entity, optionally restricted to a date window.
    async fn fetch_dataset(
        &self,
        dataset: Dataset,
        entity: &EntityId,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<DataFrame>;
}

/// Source of the entity universe to screen.
#[async_trait]
pub trait UniverseSource: DataProvider {
    /// Lists listed entities, optionally excluding special-treatment names.
    async fn universe(&self, exclude_special_treatment: bool) -> Result<Vec<EntityId>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_classes() {
        assert_eq!(Dataset::Profile.endpoint_class(), EndpointClass::Metadata);
        assert!(
            Dataset::STATEMENTS
                .iter()
                .all(|d| d.endpoint_class() == EndpointClass::Financial)
        );
    }
}
