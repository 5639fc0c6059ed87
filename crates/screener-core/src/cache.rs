//! Cache contract for storing fetched records.
//!
//! This module defines the [`RecordCache`] trait that every cache store implements,
//! together with the entry, key and expiry types it operates on.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug};

use crate::{
    error::{Result, ScreenError},
    types::{EntityId, FieldMap, PeriodKey, PeriodSet},
};

/// Expiry class of a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheCategory {
    /// Never cached; writes are accepted and discarded.
    Volatile,
    /// Long-lived data such as company metadata.
    SemiStatic,
    /// Multi-year financial statements.
    Periodic,
}

impl CacheCategory {
    /// Returns a stable lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Volatile => "volatile",
            Self::SemiStatic => "semi_static",
            Self::Periodic => "periodic",
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, non-empty cache key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a key.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if the key is empty or whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(ScreenError::InvalidKey(key));
        }
        Ok(Self(key))
    }

    /// Key of the entry holding exactly one query window for an entity.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if `entity` is empty.
    pub fn for_window(
        entity: &EntityId,
        start: NaiveDate,
        end: NaiveDate,
        required_count: usize,
    ) -> Result<Self> {
        Self::require_entity(entity)?;
        Self::new(format!(
            "{entity}_{}_{}_{required_count}",
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        ))
    }

    /// Key of the entry accumulating every period ever fetched for an entity.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if `entity` is empty.
    pub fn history(entity: &EntityId) -> Result<Self> {
        Self::require_entity(entity)?;
        Self::new(format!("{entity}_history"))
    }

    /// Key of the entry holding an entity's company profile.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if `entity` is empty.
    pub fn profile(entity: &EntityId) -> Result<Self> {
        Self::require_entity(entity)?;
        Self::new(format!("company_info_{entity}"))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn require_entity(entity: &EntityId) -> Result<()> {
        if entity.is_empty() {
            return Err(ScreenError::InvalidKey(String::new()));
        }
        Ok(())
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = ScreenError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

/// One stored cache entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The key this entry is stored under.
    pub key: CacheKey,
    /// Time of the last write.
    pub stored_at: DateTime<Utc>,
    /// Expiry class.
    pub category: CacheCategory,
    /// Entity-level attributes (profile fields).
    #[serde(default)]
    pub attributes: FieldMap,
    /// Period records, unique per period key.
    #[serde(default)]
    pub payload: PeriodSet,
    /// Periods the provider confirmed it has no record for.
    #[serde(default)]
    pub absent: BTreeSet<PeriodKey>,
}

impl CacheEntry {
    /// Creates an empty entry stamped with the current time.
    #[must_use]
    pub fn new(key: CacheKey, category: CacheCategory) -> Self {
        Self {
            key,
            stored_at: Utc::now(),
            category,
            attributes: FieldMap::new(),
            payload: PeriodSet::new(),
            absent: BTreeSet::new(),
        }
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: PeriodSet) -> Self {
        self.payload = payload;
        self
    }

    /// Sets the entity attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: FieldMap) -> Self {
        self.attributes = attributes;
        self
    }

    /// Sets the known-absent periods.
    #[must_use]
    pub fn with_absent(mut self, absent: BTreeSet<PeriodKey>) -> Self {
        self.absent = absent;
        self
    }

    /// Overrides the write timestamp.
    #[must_use]
    pub const fn with_stored_at(mut self, stored_at: DateTime<Utc>) -> Self {
        self.stored_at = stored_at;
        self
    }
}

/// Per-category time-to-live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    /// TTL of [`CacheCategory::SemiStatic`] entries.
    pub semi_static: TimeDelta,
    /// TTL of [`CacheCategory::Periodic`] entries.
    pub periodic: TimeDelta,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            semi_static: TimeDelta::days(30),
            periodic: TimeDelta::days(7),
        }
    }
}

impl TtlPolicy {
    /// Returns the TTL of a category, or `None` if the category is never stored.
    #[must_use]
    pub const fn ttl(&self, category: CacheCategory) -> Option<TimeDelta> {
        match category {
            CacheCategory::Volatile => None,
            CacheCategory::SemiStatic => Some(self.semi_static),
            CacheCategory::Periodic => Some(self.periodic),
        }
    }

    /// Returns true if `entry` is no longer valid at `now`.
    #[must_use]
    pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        self.ttl(entry.category)
            .is_none_or(|ttl| now.signed_duration_since(entry.stored_at) > ttl)
    }
}

/// Summary of what a cache currently holds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of entries.
    pub total: usize,
    /// Entries still within their TTL.
    pub valid: usize,
    /// Expired or undecodable entries.
    pub expired: usize,
    /// Bytes occupied by entries, where the backend can tell.
    pub size_bytes: u64,
    /// Valid entries per category.
    pub by_category: BTreeMap<CacheCategory, usize>,
}

/// Durable key to entry store with category-specific expiry.
///
/// Implementations validate expiry at read time and treat expired or corrupt
/// entries as absent, deleting them as a side effect.
#[async_trait]
pub trait RecordCache: Send + Sync + Debug {
    /// Returns a live entry, or `Ok(None)` if absent, expired or corrupt.
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Stores an entry under its key, replacing any previous one.
    ///
    /// Returns `false` if nothing was stored ([`CacheCategory::Volatile`]).
    async fn set(&self, entry: &CacheEntry) -> Result<bool>;

    /// Removes an entry. Returns true if one existed.
    async fn delete(&self, key: &CacheKey) -> Result<bool>;

    /// Lists every stored key.
    async fn list_keys(&self) -> Result<Vec<CacheKey>>;

    /// Removes expired and undecodable entries, returning how many were removed.
    async fn sweep_expired(&self) -> Result<usize>;

    /// Reports entry counts and sizes.
    async fn stats(&self) -> Result<CacheStats>;

    /// Removes every entry, returning how many were removed.
    async fn clear(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_rejects_empty() {
        assert!(matches!(CacheKey::new(""), Err(ScreenError::InvalidKey(_))));
        assert!(matches!(CacheKey::new("  \t"), Err(ScreenError::InvalidKey(_))));
        assert!(CacheKey::history(&EntityId::new(" ")).is_err());
    }

    #[test]
    fn test_key_formats() {
        let entity = EntityId::new("600519.SH");
        let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();

        let window = CacheKey::for_window(&entity, start, end, 5).unwrap();
        assert_eq!(window.as_str(), "600519.SH_20180101_20221231_5");
        assert_eq!(
            CacheKey::history(&entity).unwrap().as_str(),
            "600519.SH_history"
        );
        assert_eq!(
            CacheKey::profile(&entity).unwrap().as_str(),
            "company_info_600519.SH"
        );
    }

    #[test]
    fn test_key_deserialize_validates() {
        assert!(serde_json::from_str::<CacheKey>(r#""""#).is_err());
        let key: CacheKey = serde_json::from_str(r#""abc""#).unwrap();
        assert_eq!(key.as_str(), "abc");
    }

    #[test]
    fn test_ttl_boundaries() {
        let policy = TtlPolicy::default();
        let now = Utc::now();
        let key = CacheKey::new("k").unwrap();
        let eps = TimeDelta::seconds(1);

        let fresh = CacheEntry::new(key.clone(), CacheCategory::SemiStatic)
            .with_stored_at(now - policy.semi_static + eps);
        assert!(!policy.is_expired(&fresh, now));

        let stale = CacheEntry::new(key.clone(), CacheCategory::SemiStatic)
            .with_stored_at(now - policy.semi_static - eps);
        assert!(policy.is_expired(&stale, now));

        let volatile = CacheEntry::new(key, CacheCategory::Volatile).with_stored_at(now);
        assert!(policy.is_expired(&volatile, now));
    }

    #[test]
    fn test_entry_tolerates_missing_fields() {
        let json = r#"{"key":"k","stored_at":"2024-01-01T00:00:00Z","category":"PERIODIC"}"#;
        let entry: CacheEntry = serde_json::from_str(json).unwrap();
        assert!(entry.payload.is_empty());
        assert!(entry.absent.is_empty());
        assert_eq!(entry.category, CacheCategory::Periodic);
    }
}
