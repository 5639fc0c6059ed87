//! Conversion of provider frames into schema-agnostic records.
//!
//! Every cell is converted into a native [`FieldValue`] before it reaches the cache:
//! NaN and infinities become `Null`, dates become ISO strings.

use chrono::NaiveDate;
use polars::prelude::{AnyValue, DataFrame};

use crate::{
    error::{Result, ScreenError},
    provider::PERIOD_COLUMN,
    types::{FieldMap, FieldValue, PeriodKey, PeriodRecord, PeriodSet},
};

/// Identifier columns that carry no statement values.
const KEY_COLUMNS: [&str; 7] = [
    "ts_code",
    "ann_date",
    "f_ann_date",
    PERIOD_COLUMN,
    "report_type",
    "comp_type",
    "update_flag",
];

/// Days from 0001-01-01 (CE day 1) to the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

/// Converts one cell into a [`FieldValue`].
#[must_use]
pub fn field_value(value: &AnyValue<'_>) -> FieldValue {
    match value {
        AnyValue::Null => FieldValue::Null,
        AnyValue::Boolean(v) => FieldValue::Bool(*v),
        AnyValue::String(s) => FieldValue::Text((*s).to_string()),
        AnyValue::StringOwned(s) => FieldValue::Text(s.to_string()),
        AnyValue::Int8(v) => FieldValue::Int(i64::from(*v)),
        AnyValue::Int16(v) => FieldValue::Int(i64::from(*v)),
        AnyValue::Int32(v) => FieldValue::Int(i64::from(*v)),
        AnyValue::Int64(v) => FieldValue::Int(*v),
        AnyValue::UInt8(v) => FieldValue::Int(i64::from(*v)),
        AnyValue::UInt16(v) => FieldValue::Int(i64::from(*v)),
        AnyValue::UInt32(v) => FieldValue::Int(i64::from(*v)),
        AnyValue::UInt64(v) => {
            i64::try_from(*v).map_or_else(|_| FieldValue::float(*v as f64), FieldValue::Int)
        }
        AnyValue::Float32(v) => FieldValue::float(f64::from(*v)),
        AnyValue::Float64(v) => FieldValue::float(*v),
        AnyValue::Date(days) => date_from_epoch_days(*days).map_or(FieldValue::Null, |d| {
            FieldValue::Text(d.format("%Y-%m-%d").to_string())
        }),
        other => FieldValue::Text(other.to_string()),
    }
}

fn date_from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
}

fn period_key(value: &AnyValue<'_>) -> Option<PeriodKey> {
    match value {
        AnyValue::String(s) => PeriodKey::parse(s),
        AnyValue::StringOwned(s) => PeriodKey::parse(s.as_str()),
        AnyValue::Date(days) => date_from_epoch_days(*days).map(PeriodKey::new),
        _ => None,
    }
}

fn row(df: &DataFrame, index: usize) -> Result<FieldMap> {
    let mut fields = FieldMap::new();
    for column in df.get_columns() {
        let value = column
            .get(index)
            .map_err(|e| ScreenError::Parse(e.to_string()))?;
        fields.insert(column.name().to_string(), field_value(&value));
    }
    Ok(fields)
}

/// Groups a statement frame into period records keyed by [`PERIOD_COLUMN`].
///
/// Rows without a parseable period, rows for interim periods and rows whose value
/// columns are all null are dropped. When several rows share a period the first
/// one wins; later rows only fill fields it left null. A frame without the period
/// column yields an empty set.
///
/// # Errors
/// Returns [`ScreenError::Parse`] if a cell cannot be read.
pub fn frame_to_periods(df: &DataFrame) -> Result<PeriodSet> {
    let mut set = PeriodSet::new();
    let Ok(periods) = df.column(PERIOD_COLUMN) else {
        return Ok(set);
    };

    for index in 0..df.height() {
        let raw = periods
            .get(index)
            .map_err(|e| ScreenError::Parse(e.to_string()))?;
        let Some(key) = period_key(&raw).filter(PeriodKey::is_full_period) else {
            continue;
        };
        let fields = row(df, index)?;
        let has_values = fields
            .iter()
            .any(|(name, value)| !KEY_COLUMNS.contains(&name.as_str()) && !value.is_null());
        if !has_values {
            continue;
        }
        let mut record = set.get(&key).cloned().unwrap_or_else(|| PeriodRecord::new(key));
        record.fill_missing(fields);
        set.insert(record);
    }
    Ok(set)
}

/// Reads entity-level attributes from the first row of a profile frame.
///
/// # Errors
/// Returns [`ScreenError::Parse`] if a cell cannot be read.
pub fn frame_to_attributes(df: &DataFrame) -> Result<FieldMap> {
    if df.height() == 0 {
        return Ok(FieldMap::new());
    }
    row(df, 0)
}
