//! Call-counting stub provider and threshold evaluator for tests.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::{Column, DataFrame};
use screener_core::{
    CacheCategory, CacheEntry, CacheKey, DataProvider, Dataset, EntityId, Evaluator, FetchTask,
    FieldMap, NormalizedRecordSet, PeriodKey, PeriodRecord, RecordCache, RecordSource, Result,
    ScreenError, UniverseSource, Verdict,
};
use tokio::time::Instant;

type Window = Option<(NaiveDate, NaiveDate)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Behavior {
    Normal,
    Fail,
    Hang,
}

/// Scripted data for one entity.
#[derive(Clone, Debug)]
pub(crate) struct StubEntity {
    years: Vec<i32>,
    revenue: Option<f64>,
    n_income: f64,
    behavior: Behavior,
}

impl StubEntity {
    pub(crate) fn years(years: RangeInclusive<i32>) -> Self {
        Self {
            years: years.collect(),
            revenue: Some(100.0),
            n_income: 10.0,
            behavior: Behavior::Normal,
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            ..Self::years(2018..=2022)
        }
    }

    pub(crate) fn hanging() -> Self {
        Self {
            behavior: Behavior::Hang,
            ..Self::years(2018..=2022)
        }
    }

    pub(crate) fn with_revenue(mut self, revenue: Option<f64>) -> Self {
        self.revenue = revenue;
        self
    }

    pub(crate) fn with_net_income(mut self, n_income: f64) -> Self {
        self.n_income = n_income;
        self
    }

    /// The full record a provider would assemble for one year.
    pub(crate) fn record(&self, year: i32) -> PeriodRecord {
        let mut record = PeriodRecord::new(PeriodKey::annual(year).unwrap())
            .with_field("audit_result", "standard unqualified")
            .with_field("total_assets", 1_000.0)
            .with_field("total_liab", 400.0)
            .with_field("n_income", self.n_income)
            .with_field("n_cashflow_act", 12.0);
        if let Some(revenue) = self.revenue {
            record = record.with_field("revenue", revenue);
        }
        record
    }

    fn frame(&self, entity: &EntityId, dataset: Dataset, window: Window) -> DataFrame {
        if dataset == Dataset::Profile {
            return DataFrame::new(vec![
                Column::new("ts_code".into(), vec![entity.to_string()]),
                Column::new("com_name".into(), vec![format!("{entity} Corp")]),
            ])
            .unwrap_or_default();
        }

        let years: Vec<i32> = self
            .years
            .iter()
            .copied()
            .filter(|year| {
                let end = PeriodKey::annual(*year).map(|k| k.date());
                window.is_none_or(|(start, stop)| end.is_some_and(|d| d >= start && d <= stop))
            })
            .collect();
        if years.is_empty() {
            return DataFrame::empty();
        }

        // every year also gets an interim row that must be filtered out
        let mut end_dates = Vec::new();
        for year in &years {
            end_dates.push(format!("{year}1231"));
            end_dates.push(format!("{year}0630"));
        }
        let rows = end_dates.len();
        let mut columns = vec![
            Column::new("ts_code".into(), vec![entity.to_string(); rows]),
            Column::new("end_date".into(), end_dates),
        ];
        match dataset {
            Dataset::AuditOpinion => columns.push(Column::new(
                "audit_result".into(),
                vec!["standard unqualified"; rows],
            )),
            Dataset::BalanceSheet => {
                columns.push(Column::new("total_assets".into(), vec![1_000.0; rows]));
                columns.push(Column::new("total_liab".into(), vec![400.0; rows]));
            }
            Dataset::Income => {
                columns.push(Column::new("revenue".into(), vec![self.revenue; rows]));
                columns.push(Column::new("n_income".into(), vec![self.n_income; rows]));
            }
            Dataset::CashFlow => {
                columns.push(Column::new("n_cashflow_act".into(), vec![12.0; rows]));
            }
            Dataset::Profile => {}
        }
        DataFrame::new(columns).unwrap_or_default()
    }
}

/// Provider stub that records every call.
#[derive(Debug, Default)]
pub(crate) struct StubSource {
    entities: HashMap<EntityId, StubEntity>,
    calls: Mutex<Vec<(EntityId, Dataset, Window, Instant)>>,
}

impl StubSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_entity(mut self, entity: &str, stub: StubEntity) -> Self {
        self.entities.insert(EntityId::new(entity), stub);
        self
    }

    pub(crate) fn calls_for(&self, entity: &str) -> Vec<(Dataset, Window)> {
        let entity = EntityId::new(entity);
        self.calls
            .lock()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|(id, ..)| *id == entity)
                    .map(|(_, dataset, window, _)| (*dataset, *window))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    /// Issue times of every call, in call order.
    pub(crate) fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .map(|calls| calls.iter().map(|(.., at)| *at).collect())
            .unwrap_or_default()
    }

    pub(crate) fn reset_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }
}

impl DataProvider for StubSource {
    fn name(&self) -> &str {
        "Stub"
    }

    fn description(&self) -> &str {
        "Scripted provider for tests"
    }
}

#[async_trait]
impl RecordSource for StubSource {
    async fn fetch_dataset(
        &self,
        dataset: Dataset,
        entity: &EntityId,
        window: Window,
    ) -> Result<DataFrame> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((entity.clone(), dataset, window, Instant::now()));
        }
        let Some(stub) = self.entities.get(entity) else {
            return Ok(DataFrame::empty());
        };
        match stub.behavior {
            Behavior::Fail => Err(ScreenError::Network("connection reset".to_string())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(DataFrame::empty())
            }
            Behavior::Normal => Ok(stub.frame(entity, dataset, window)),
        }
    }
}

#[async_trait]
impl UniverseSource for StubSource {
    async fn universe(&self, _exclude_special_treatment: bool) -> Result<Vec<EntityId>> {
        let mut entities: Vec<EntityId> = self.entities.keys().cloned().collect();
        entities.sort();
        Ok(entities)
    }
}

/// Writes a window entry for `task` holding `stub`'s records.
pub(crate) async fn seed_window(cache: &dyn RecordCache, task: &FetchTask, stub: &StubEntity) {
    let payload = stub.years.iter().map(|year| stub.record(*year)).collect();
    let entry = CacheEntry::new(task.cache_key().unwrap(), CacheCategory::Periodic)
        .with_payload(payload);
    cache.set(&entry).await.unwrap();
}

/// Writes a live profile entry for `entity`.
pub(crate) async fn seed_profile(cache: &dyn RecordCache, entity: &str) {
    let entity = EntityId::new(entity);
    let attributes: FieldMap = [("com_name".to_string(), format!("{entity} Corp").into())].into();
    let entry = CacheEntry::new(CacheKey::profile(&entity).unwrap(), CacheCategory::SemiStatic)
        .with_attributes(attributes);
    cache.set(&entry).await.unwrap();
}

/// Passes entities whose latest net income is positive and whose revenue is not
/// negative; ranks by revenue.
#[derive(Debug, Default)]
pub(crate) struct StubEvaluator;

impl StubEvaluator {
    fn latest(records: &NormalizedRecordSet, field: &str) -> Option<f64> {
        records
            .latest()
            .and_then(|r| r.get(field))
            .and_then(|v| v.as_f64())
    }
}

impl Evaluator for StubEvaluator {
    fn fundamentals(&self, records: &NormalizedRecordSet) -> Verdict {
        match Self::latest(records, "n_income") {
            Some(income) if income > 0.0 => Verdict::pass(),
            _ => Verdict::reject(),
        }
    }

    fn valuation(&self, records: &NormalizedRecordSet) -> Verdict {
        match Self::latest(records, "revenue") {
            Some(revenue) if revenue < 0.0 => Verdict::reject(),
            Some(revenue) => Verdict::pass().with_score(revenue),
            None => Verdict::pass(),
        }
    }
}
