//! Core data types for screening.
//!
//! This module defines the fundamental data structures:
//!
//! - [`EntityId`] - Security identifier (e.g. `600519.SH`)
//! - [`PeriodKey`] - Reporting-period end date
//! - [`FieldValue`] / [`FieldMap`] - Schema-agnostic field bag
//! - [`PeriodRecord`] / [`PeriodSet`] - Per-period records keyed by period end
//! - [`QueryWindow`] / [`FetchTask`] - The requested window for one entity
//! - [`NormalizedRecordSet`] - Merged output handed to evaluation

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::cache::CacheKey;
use crate::error::{Result, ScreenError};

/// A security identifier.
///
/// Identifiers are trimmed and uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    /// Creates a new identifier from a string, trimming and converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_uppercase())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// End date of a reporting period.
///
/// Only full-year periods (ending December 31st) are kept by the orchestrator;
/// interim periods are recognised so they can be filtered out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(NaiveDate);

impl PeriodKey {
    /// Wraps a period end date.
    #[must_use]
    pub const fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// The full-year period ending on December 31st of `year`.
    #[must_use]
    pub fn annual(year: i32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, 12, 31).map(Self)
    }

    /// Parses `YYYYMMDD` or `YYYY-MM-DD`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        NaiveDate::parse_from_str(s, "%Y%m%d")
            .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
            .ok()
            .map(Self)
    }

    /// Returns the period end date.
    #[must_use]
    pub const fn date(&self) -> NaiveDate {
        self.0
    }

    /// Returns the calendar year the period ends in.
    #[must_use]
    pub fn year(&self) -> i32 {
        self.0.year()
    }

    /// Returns true for full-year (non-interim) periods.
    #[must_use]
    pub fn is_full_period(&self) -> bool {
        self.0.month() == 12 && self.0.day() == 31
    }

    /// First day covered by this full-year period.
    #[must_use]
    pub fn period_start(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.0.year(), 1, 1).unwrap_or(self.0)
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

/// A single normalized field value.
///
/// Vendor numeric wrappers, decimals and not-a-number markers are converted
/// into one of these native variants before anything is persisted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Missing or not-a-number.
    #[default]
    Null,
    /// Boolean flag.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Finite floating-point value.
    Float(f64),
    /// Text value (including dates rendered as ISO strings).
    Text(String),
}

impl FieldValue {
    /// Builds a float value, mapping NaN and infinities to [`FieldValue::Null`].
    #[must_use]
    pub fn float(value: f64) -> Self {
        if value.is_finite() {
            Self::Float(value)
        } else {
            Self::Null
        }
    }

    /// Returns true for [`FieldValue::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Numeric view of the value, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            Self::Null | Self::Bool(_) => None,
        }
    }

    /// Text view of the value, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::float(value)
    }
}

impl From<f32> for FieldValue {
    fn from(value: f32) -> Self {
        Self::float(f64::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl<T: Into<Self>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Field name to value bag.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// All fields known for one reporting period.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeriodRecord {
    /// End date of the reporting period.
    pub period_end: PeriodKey,
    /// Business fields; opaque to the cache and scheduler.
    #[serde(default)]
    pub fields: FieldMap,
}

impl PeriodRecord {
    /// Creates an empty record for a period.
    #[must_use]
    pub fn new(period_end: PeriodKey) -> Self {
        Self {
            period_end,
            fields: FieldMap::new(),
        }
    }

    /// Sets a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Copies every field of `fields` into this record, overwriting same-named fields.
    ///
    /// A `Null` never replaces a value already present.
    pub fn absorb(&mut self, fields: FieldMap) {
        for (name, value) in fields {
            if value.is_null() && self.fields.get(&name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            self.fields.insert(name, value);
        }
    }

    /// Copies only the fields this record lacks or holds as `Null`.
    pub fn fill_missing(&mut self, fields: FieldMap) {
        for (name, value) in fields {
            match self.fields.get(&name) {
                Some(existing) if !existing.is_null() => {}
                _ => {
                    self.fields.insert(name, value);
                }
            }
        }
    }
}

/// Ordered set of period records with unique period keys.
///
/// Serialized as a list, newest period first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PeriodRecord>", into = "Vec<PeriodRecord>")]
pub struct PeriodSet {
    records: BTreeMap<PeriodKey, PeriodRecord>,
}

impl PeriodSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record, replacing any record with the same period key.
    pub fn insert(&mut self, record: PeriodRecord) {
        self.records.insert(record.period_end, record);
    }

    /// Merges `newer` into this set; on key collision the record from `newer` wins.
    pub fn merge_newer(&mut self, newer: Self) {
        self.records.extend(newer.records);
    }

    /// Unions `other` into this set field by field, so records for the same period
    /// from different datasets end up in one record.
    pub fn union_fields(&mut self, other: Self) {
        for (key, record) in other.records {
            match self.records.get_mut(&key) {
                Some(existing) => existing.absorb(record.fields),
                None => {
                    self.records.insert(key, record);
                }
            }
        }
    }

    /// Drops every interim (non full-year) period.
    pub fn retain_full_periods(&mut self) {
        self.records.retain(|key, _| key.is_full_period());
    }

    /// Returns a copy restricted to the given periods.
    #[must_use]
    pub fn restricted_to(&self, periods: &[PeriodKey]) -> Self {
        Self {
            records: periods
                .iter()
                .filter_map(|key| self.records.get(key).map(|r| (*key, r.clone())))
                .collect(),
        }
    }

    /// Returns true if a record exists for the period.
    #[must_use]
    pub fn contains(&self, key: &PeriodKey) -> bool {
        self.records.contains_key(key)
    }

    /// Returns the record for a period.
    #[must_use]
    pub fn get(&self, key: &PeriodKey) -> Option<&PeriodRecord> {
        self.records.get(key)
    }

    /// Number of periods held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no periods are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Period keys, newest first.
    pub fn keys_newest_first(&self) -> impl Iterator<Item = &PeriodKey> {
        self.records.keys().rev()
    }

    /// Records, newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &PeriodRecord> {
        self.records.values().rev()
    }

    /// Consumes the set and returns its records, newest first.
    #[must_use]
    pub fn into_newest_first(self) -> Vec<PeriodRecord> {
        self.records.into_values().rev().collect()
    }
}

impl From<Vec<PeriodRecord>> for PeriodSet {
    fn from(records: Vec<PeriodRecord>) -> Self {
        records.into_iter().collect()
    }
}

impl From<PeriodSet> for Vec<PeriodRecord> {
    fn from(set: PeriodSet) -> Self {
        set.into_newest_first()
    }
}

impl FromIterator<PeriodRecord> for PeriodSet {
    fn from_iter<I: IntoIterator<Item = PeriodRecord>>(iter: I) -> Self {
        let mut set = Self::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

/// A requested query window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryWindow {
    /// First day of the window (inclusive).
    pub start: NaiveDate,
    /// Last day of the window (inclusive).
    pub end: NaiveDate,
    /// Number of periods the caller needs; `0` means every period in the window.
    pub required_count: usize,
}

impl QueryWindow {
    /// Creates a window.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidParameter`] if `start` is after `end`.
    pub fn new(start: NaiveDate, end: NaiveDate, required_count: usize) -> Result<Self> {
        if start > end {
            return Err(ScreenError::InvalidParameter(format!(
                "window start {start} is after end {end}"
            )));
        }
        Ok(Self {
            start,
            end,
            required_count,
        })
    }

    /// Window covering whole calendar years `start_year..=end_year`.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidParameter`] for out-of-range or inverted years.
    pub fn years(start_year: i32, end_year: i32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(start_year, 1, 1)
            .ok_or_else(|| ScreenError::InvalidParameter(format!("bad year {start_year}")))?;
        let end = NaiveDate::from_ymd_opt(end_year, 12, 31)
            .ok_or_else(|| ScreenError::InvalidParameter(format!("bad year {end_year}")))?;
        let count = usize::try_from(end_year - start_year + 1).unwrap_or(0);
        Self::new(start, end, count)
    }

    /// Full-year periods the window asks for, newest first.
    ///
    /// Truncated to `required_count` when it is non-zero.
    #[must_use]
    pub fn expected_periods(&self) -> Vec<PeriodKey> {
        let mut periods: Vec<PeriodKey> = (self.start.year()..=self.end.year())
            .rev()
            .filter_map(PeriodKey::annual)
            .filter(|key| key.date() >= self.start && key.date() <= self.end)
            .collect();
        if self.required_count > 0 {
            periods.truncate(self.required_count);
        }
        periods
    }
}

impl fmt::Display for QueryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{} (n={})", self.start, self.end, self.required_count)
    }
}

/// One entity's query: what the orchestrator is asked to produce.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FetchTask {
    /// The entity to fetch.
    pub entity: EntityId,
    /// The requested window.
    pub window: QueryWindow,
}

impl FetchTask {
    /// Creates a task.
    #[must_use]
    pub const fn new(entity: EntityId, window: QueryWindow) -> Self {
        Self { entity, window }
    }

    /// Cache key of the exact window entry for this task.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if the entity identifier is empty.
    pub fn cache_key(&self) -> Result<CacheKey> {
        CacheKey::for_window(
            &self.entity,
            self.window.start,
            self.window.end,
            self.window.required_count,
        )
    }
}

/// Where a normalized record set came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordOrigin {
    /// Served entirely from cache.
    Cache,
    /// Cached periods merged with newly fetched ones.
    Merged,
    /// Fetched from the provider with nothing usable in cache.
    Provider,
}

/// Merged, normalized records for one entity and window.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedRecordSet {
    /// The entity.
    pub entity: EntityId,
    /// The window the records were requested for.
    pub window: QueryWindow,
    /// Entity-level metadata (company profile).
    pub attributes: FieldMap,
    /// Full-year period records inside the window, newest first.
    pub periods: Vec<PeriodRecord>,
    /// Where the records came from.
    pub origin: RecordOrigin,
    /// External calls issued to build this set.
    pub external_calls: usize,
}

impl NormalizedRecordSet {
    /// The most recent period record.
    #[must_use]
    pub fn latest(&self) -> Option<&PeriodRecord> {
        self.periods.first()
    }

    /// The record for a specific period.
    #[must_use]
    pub fn period(&self, key: &PeriodKey) -> Option<&PeriodRecord> {
        self.periods.iter().find(|r| &r.period_end == key)
    }

    /// Period keys held, newest first.
    #[must_use]
    pub fn period_keys(&self) -> Vec<PeriodKey> {
        self.periods.iter().map(|r| r.period_end).collect()
    }
}
