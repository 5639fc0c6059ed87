//! Per-entity fetch-through orchestration.
//!
//! Lookup order for one [`FetchTask`]: the exact window entry, then the entity's
//! history entry, then the provider. Provider reads run strictly in sequence and
//! only cover the periods the cache is missing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use polars::prelude::DataFrame;
use screener_core::{
    AccountTier, CacheCategory, CacheEntry, CacheKey, Coverage, Dataset, EndpointClass,
    FetchTask, FieldMap, NormalizedRecordSet, PeriodKey, PeriodSet, QueryWindow, RateScheduler,
    RecordCache, RecordOrigin, RecordSource, Result, ScreenError,
    coverage::{assess, merge},
    frame::{frame_to_attributes, frame_to_periods},
};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Pacing applied between one worker's provider calls.
///
/// A worker keeps the same `Pacing` across entities, so the gap before an
/// entity's first call is measured from the previous entity's last call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    /// Delay computation.
    pub scheduler: RateScheduler,
    /// Account tier of the provider subscription.
    pub tier: AccountTier,
    /// Number of workers sharing the provider ceiling.
    pub workers: usize,
    last_call: Option<Instant>,
}

impl Pacing {
    /// Creates a pacing policy.
    #[must_use]
    pub const fn new(scheduler: RateScheduler, tier: AccountTier, workers: usize) -> Self {
        Self {
            scheduler,
            tier,
            workers,
            last_call: None,
        }
    }

    /// Delay before the next call to an endpoint of `class`.
    #[must_use]
    pub fn delay_before(&self, class: EndpointClass) -> Duration {
        self.scheduler.delay_for(class, self.tier, self.workers)
    }

    /// Waits until a call to `class` may be issued and records it as issued.
    pub async fn wait(&mut self, class: EndpointClass) {
        if let Some(last) = self.last_call {
            tokio::time::sleep_until(last + self.delay_before(class)).await;
        }
        self.last_call = Some(Instant::now());
    }
}

/// Fetches one entity's records through the cache.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    source: Arc<dyn RecordSource>,
    cache: Arc<dyn RecordCache>,
    call_timeout: Duration,
}

impl FetchOrchestrator {
    /// Create an orchestrator over a provider and a cache.
    #[must_use]
    pub fn new(source: Arc<dyn RecordSource>, cache: Arc<dyn RecordCache>) -> Self {
        Self {
            source,
            cache,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Set the timeout applied to every provider call.
    #[must_use]
    pub const fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Returns the cache this orchestrator reads and writes.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn RecordCache> {
        &self.cache
    }

    /// Reads a cache entry, treating storage failures as a miss.
    async fn cached(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn store(&self, entry: &CacheEntry) {
        if let Err(e) = self.cache.set(entry).await {
            warn!(key = %entry.key, error = %e, "Failed to write cache entry");
        }
    }

    /// Reports how well the cache covers `task` without calling the provider.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if the task's entity is empty.
    #[instrument(skip(self), fields(entity = %task.entity))]
    pub async fn probe(&self, task: &FetchTask) -> Result<Coverage> {
        let window_key = task.cache_key()?;
        if let Some(entry) = self.cached(&window_key).await {
            let coverage = assess(&task.window, &entry.payload, &entry.absent);
            if coverage.is_ready() {
                return Ok(coverage);
            }
        }
        let history_key = CacheKey::history(&task.entity)?;
        Ok(self
            .cached(&history_key)
            .await
            .map_or(Coverage::Miss, |entry| {
                assess(&task.window, &entry.payload, &entry.absent)
            }))
    }

    /// Returns records for `task`, calling the provider only for periods the cache lacks.
    ///
    /// With `pacing`, every provider call waits until the scheduler's delay for its
    /// endpoint class has passed since the previous call paced by the same `pacing`.
    ///
    /// # Errors
    /// - [`ScreenError::InvalidKey`] if the task's entity is empty
    /// - [`ScreenError::DataUnavailable`] if neither cache nor provider has usable periods
    /// - Provider errors and [`ScreenError::Timeout`] when a call fails or hangs
    #[instrument(skip(self, pacing), fields(entity = %task.entity, window = %task.window))]
    pub async fn fetch(
        &self,
        task: &FetchTask,
        pacing: Option<&mut Pacing>,
    ) -> Result<NormalizedRecordSet> {
        let window_key = task.cache_key()?;
        let history_key = CacheKey::history(&task.entity)?;
        let profile_key = CacheKey::profile(&task.entity)?;

        if let Some(entry) = self.cached(&window_key).await {
            if assess(&task.window, &entry.payload, &entry.absent).is_ready() {
                debug!("Window entry covers request");
                return Ok(records(task, entry.attributes, &entry.payload, RecordOrigin::Cache, 0));
            }
        }

        let history = self.cached(&history_key).await;
        let coverage = history.as_ref().map_or(Coverage::Miss, |entry| {
            assess(&task.window, &entry.payload, &entry.absent)
        });

        let profile = self.cached(&profile_key).await;
        let attributes = profile
            .as_ref()
            .or(history.as_ref())
            .map(|entry| entry.attributes.clone())
            .unwrap_or_default();

        let (range, requested, origin) = match &coverage {
            Coverage::Ready { tolerated } => {
                debug!(?tolerated, "History entry covers request");
                let history = history.unwrap_or_else(|| {
                    CacheEntry::new(history_key.clone(), CacheCategory::Periodic)
                });
                let result = records(task, attributes, &history.payload, RecordOrigin::Cache, 0);
                self.store_window(task, window_key, &history.payload, &history.absent, &result)
                    .await;
                return Ok(result);
            }
            Coverage::Partial { missing, .. } => {
                let range = coverage.fetch_range().unwrap_or(task.window);
                debug!(missing = missing.len(), from = %range.start, to = %range.end, "Incremental fetch");
                (range, missing.clone(), RecordOrigin::Merged)
            }
            Coverage::Miss => {
                debug!("Full fetch");
                (task.window, task.window.expected_periods(), RecordOrigin::Provider)
            }
        };

        let fetched = self
            .fetch_from_source(task, &range, profile.is_none(), pacing)
            .await?;

        if fetched.periods.is_empty() && origin == RecordOrigin::Provider {
            return Err(unavailable(task));
        }

        let attributes = fetched.attributes.clone().unwrap_or(attributes);
        let (cached_payload, mut absent) = history
            .map(|entry| (entry.payload, entry.absent))
            .unwrap_or_default();
        let merged = merge(cached_payload, fetched.periods);

        // the newest requested period may simply not be published yet
        let newest = task.window.expected_periods().first().copied();
        absent.extend(
            requested
                .iter()
                .filter(|key| !merged.contains(key) && Some(**key) != newest)
                .copied(),
        );
        absent.retain(|key| !merged.contains(key));

        let result = records(task, attributes.clone(), &merged, origin, fetched.calls);
        if result.periods.is_empty() {
            return Err(unavailable(task));
        }

        if let Some(profile) = fetched.attributes.filter(|a| !a.is_empty()) {
            self.store(&CacheEntry::new(profile_key, CacheCategory::SemiStatic).with_attributes(profile))
                .await;
        }
        self.store(
            &CacheEntry::new(history_key, CacheCategory::Periodic)
                .with_attributes(attributes)
                .with_payload(merged.clone())
                .with_absent(absent.clone()),
        )
        .await;
        self.store_window(task, window_key, &merged, &absent, &result)
            .await;

        debug!(
            periods = result.periods.len(),
            calls = fetched.calls,
            "Fetched records"
        );
        Ok(result)
    }

    async fn store_window(
        &self,
        task: &FetchTask,
        key: CacheKey,
        payload: &PeriodSet,
        absent: &BTreeSet<PeriodKey>,
        result: &NormalizedRecordSet,
    ) {
        let expected = task.window.expected_periods();
        let absent = absent
            .iter()
            .filter(|period| expected.contains(period))
            .copied()
            .collect();
        self.store(
            &CacheEntry::new(key, CacheCategory::Periodic)
                .with_attributes(result.attributes.clone())
                .with_payload(payload.restricted_to(&expected))
                .with_absent(absent),
        )
        .await;
    }

    /// Issues the dependent provider reads for `range` in order.
    async fn fetch_from_source(
        &self,
        task: &FetchTask,
        range: &QueryWindow,
        with_profile: bool,
        mut pacing: Option<&mut Pacing>,
    ) -> Result<Fetched> {
        let sequence = with_profile
            .then_some(Dataset::Profile)
            .into_iter()
            .chain(Dataset::STATEMENTS);

        let mut fetched = Fetched::default();
        for dataset in sequence {
            if let Some(pacing) = pacing.as_deref_mut() {
                pacing.wait(dataset.endpoint_class()).await;
            }
            let window = (dataset != Dataset::Profile).then_some((range.start, range.end));
            let frame = self.call(dataset, task, window).await?;
            fetched.calls += 1;

            if dataset == Dataset::Profile {
                fetched.attributes = Some(frame_to_attributes(&frame)?);
            } else {
                fetched.periods.union_fields(frame_to_periods(&frame)?);
            }
        }
        Ok(fetched)
    }

    async fn call(
        &self,
        dataset: Dataset,
        task: &FetchTask,
        window: Option<(chrono::NaiveDate, chrono::NaiveDate)>,
    ) -> Result<DataFrame> {
        let call = self.source.fetch_dataset(dataset, &task.entity, window);
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(frame)) => {
                debug!(%dataset, rows = frame.height(), "Provider call");
                Ok(frame)
            }
            Ok(Err(e)) => {
                warn!(%dataset, error = %e, "Provider call failed");
                Err(e)
            }
            Err(_) => {
                warn!(%dataset, after = ?self.call_timeout, "Provider call timed out");
                Err(ScreenError::Timeout {
                    operation: format!("{} {dataset}", self.source.name()),
                    after: self.call_timeout,
                })
            }
        }
    }
}

/// Output of one provider read sequence.
#[derive(Debug, Default)]
struct Fetched {
    attributes: Option<FieldMap>,
    periods: PeriodSet,
    calls: usize,
}

fn unavailable(task: &FetchTask) -> ScreenError {
    ScreenError::DataUnavailable {
        entity: task.entity.to_string(),
        start: task.window.start.to_string(),
        end: task.window.end.to_string(),
    }
}

fn records(
    task: &FetchTask,
    attributes: FieldMap,
    payload: &PeriodSet,
    origin: RecordOrigin,
    external_calls: usize,
) -> NormalizedRecordSet {
    let expected = task.window.expected_periods();
    NormalizedRecordSet {
        entity: task.entity.clone(),
        window: task.window,
        attributes,
        periods: payload.restricted_to(&expected).into_newest_first(),
        origin,
        external_calls,
    }
}
