#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/screener/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Fetch-through caching and batch screening for rate-limited fundamentals data.
//!
//! This crate wires a [`RecordSource`], a [`RecordCache`] and an [`Evaluator`]
//! together. Every collaborator is constructed once by the caller and passed in
//! explicitly; nothing here holds process-wide state.
//!
//! # Features
//!
//! - `tushare` - Tushare Pro provider (enabled by default)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use screener::{QueryWindow, Screener, ScreenerConfig};
//!
//! #[tokio::main]
//! async fn main() -> screener::Result<()> {
//!     let config = ScreenerConfig::from_env()?;
//!     let screener = Screener::tushare(config, Arc::new(MyRules))?;
//!
//!     let window = QueryWindow::years(2019, 2023)?;
//!     let outcome = screener.screen_universe(window, 4, true).await?;
//!     for entity in &outcome.passed {
//!         println!("{} {:?}", entity.entity, entity.rank);
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

// Core types and traits
pub use screener_core::*;

// Cache implementations
pub use screener_cache::{FileCache, InMemoryCache, NoopCache};

// Providers
#[cfg(feature = "tushare")]
pub use screener_tushare::TushareProvider;

mod batch;
mod config;
mod orchestrator;
#[cfg(test)]
mod test_support;

pub use batch::{
    BatchEngine, BatchOutcome, BatchPhase, BatchProgress, BatchRequest, EntityFailure,
    PassedEntity, WorkerGroupPlan,
};
pub use config::{
    ACCOUNT_POINTS_ENV, ACCOUNT_TIER_ENV, BatchConfig, CACHE_DIR_ENV, CALL_TIMEOUT_ENV,
    EXTRA_DELAY_ENV, ScreenerConfig,
};
pub use orchestrator::{FetchOrchestrator, Pacing};

/// Screener facade over one provider, one cache and one rule set.
#[derive(Clone)]
pub struct Screener {
    config: ScreenerConfig,
    source: Arc<dyn RecordSource>,
    orchestrator: Arc<FetchOrchestrator>,
    engine: BatchEngine,
    universe: Option<Arc<dyn UniverseSource>>,
}

impl fmt::Debug for Screener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Screener")
            .field("config", &self.config)
            .field("source", &self.source.name())
            .field("cache", self.orchestrator.cache())
            .field("universe", &self.universe.as_ref().map(|u| u.name()))
            .finish_non_exhaustive()
    }
}

impl Screener {
    /// Create a screener from explicit collaborators.
    #[must_use]
    pub fn new(
        config: ScreenerConfig,
        source: Arc<dyn RecordSource>,
        cache: Arc<dyn RecordCache>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Self {
        debug!(
            provider = source.name(),
            tier = %config.tier,
            "Creating screener"
        );
        let orchestrator = Arc::new(
            FetchOrchestrator::new(source.clone(), cache).with_call_timeout(config.call_timeout),
        );
        let engine = BatchEngine::new(orchestrator.clone(), evaluator)
            .with_config(config.batch)
            .with_scheduler(config.scheduler());
        Self {
            config,
            source,
            orchestrator,
            engine,
            universe: None,
        }
    }

    /// Create a screener backed by a [`FileCache`] in the configured directory.
    ///
    /// # Errors
    /// Returns [`ScreenError::Cache`] if the cache directory cannot be created.
    pub fn from_config(
        config: ScreenerConfig,
        source: Arc<dyn RecordSource>,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<Self> {
        let cache = FileCache::new(&config.cache_dir)?.with_ttl(config.ttl);
        Ok(Self::new(config, source, Arc::new(cache), evaluator))
    }

    /// Create a screener over Tushare Pro, reading the token from the environment.
    ///
    /// The provider also serves as the universe source.
    ///
    /// # Errors
    /// Returns an error if the token is missing or the cache directory cannot be created.
    #[cfg(feature = "tushare")]
    pub fn tushare(config: ScreenerConfig, evaluator: Arc<dyn Evaluator>) -> Result<Self> {
        let provider = Arc::new(TushareProvider::from_env()?);
        Ok(Self::from_config(config, provider.clone(), evaluator)?.with_universe(provider))
    }

    /// Set the source used by [`Screener::screen_universe`].
    #[must_use]
    pub fn with_universe(mut self, universe: Arc<dyn UniverseSource>) -> Self {
        self.universe = Some(universe);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ScreenerConfig {
        &self.config
    }

    /// Returns the fetch orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Arc<FetchOrchestrator> {
        &self.orchestrator
    }

    /// Returns the batch engine.
    #[must_use]
    pub const fn engine(&self) -> &BatchEngine {
        &self.engine
    }

    /// Returns the cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn RecordCache> {
        self.orchestrator.cache()
    }

    /// Fetches one entity's records through the cache, paced as a single worker.
    ///
    /// # Errors
    /// See [`FetchOrchestrator::fetch`].
    pub async fn fetch(&self, entity: EntityId, window: QueryWindow) -> Result<NormalizedRecordSet> {
        let mut pacing = Pacing::new(self.config.scheduler(), self.config.tier, 1);
        self.orchestrator
            .fetch(&FetchTask::new(entity, window), Some(&mut pacing))
            .await
    }

    /// Screens `entities` with up to `concurrency` fetch workers.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if any entity is empty.
    pub async fn screen(
        &self,
        entities: Vec<EntityId>,
        window: QueryWindow,
        concurrency: usize,
    ) -> Result<BatchOutcome> {
        self.engine.run(&self.request(entities, window, concurrency)).await
    }

    /// Screens `entities`, reporting progress and honoring `cancel`.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if any entity is empty.
    pub async fn screen_with<F>(
        &self,
        entities: Vec<EntityId>,
        window: QueryWindow,
        concurrency: usize,
        cancel: &CancellationToken,
        progress: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        self.engine
            .run_with(&self.request(entities, window, concurrency), cancel, progress)
            .await
    }

    /// Screens every entity the universe source lists.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidParameter`] if no universe source is set, or
    /// the universe source's error if listing fails.
    pub async fn screen_universe(
        &self,
        window: QueryWindow,
        concurrency: usize,
        exclude_special_treatment: bool,
    ) -> Result<BatchOutcome> {
        let universe = self.universe.as_ref().ok_or_else(|| {
            ScreenError::InvalidParameter("no universe source configured".to_string())
        })?;
        let entities = universe.universe(exclude_special_treatment).await?;
        info!(
            provider = universe.name(),
            entities = entities.len(),
            "Loaded universe"
        );
        self.screen(entities, window, concurrency).await
    }

    fn request(&self, entities: Vec<EntityId>, window: QueryWindow, concurrency: usize) -> BatchRequest {
        BatchRequest::new(entities, window)
            .with_concurrency(concurrency)
            .with_tier(self.config.tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubEntity, StubEvaluator, StubSource};
    use tempfile::TempDir;

    fn stub_source() -> Arc<StubSource> {
        Arc::new(
            StubSource::new()
                .with_entity("A", StubEntity::years(2018..=2022))
                .with_entity("B", StubEntity::years(2018..=2022).with_net_income(-1.0)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_file_backed_screener_reuses_cache() {
        let dir = TempDir::new().unwrap();
        let config = ScreenerConfig::new()
            .with_cache_dir(dir.path())
            .with_tier(AccountTier::Premium);
        let source = stub_source();
        let screener =
            Screener::from_config(config, source.clone(), Arc::new(StubEvaluator)).unwrap();
        let window = QueryWindow::years(2018, 2022).unwrap();

        let first = screener.fetch(EntityId::new("a"), window).await.unwrap();
        assert_eq!(first.external_calls, 5);
        assert_eq!(first.periods.len(), 5);

        let second = screener.fetch(EntityId::new("A"), window).await.unwrap();
        assert_eq!(second.external_calls, 0);
        assert_eq!(second.periods, first.periods);

        // window, history and profile entries
        assert_eq!(screener.cache().list_keys().await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_screen_universe() {
        let source = stub_source();
        let screener = Screener::new(
            ScreenerConfig::new(),
            source.clone(),
            Arc::new(InMemoryCache::new()),
            Arc::new(StubEvaluator),
        )
        .with_universe(source);
        let window = QueryWindow::years(2018, 2022).unwrap();

        let outcome = screener.screen_universe(window, 2, true).await.unwrap();
        assert_eq!(outcome.fetched, 2);
        assert_eq!(outcome.passed.len(), 1);
        assert_eq!(outcome.passed[0].entity, EntityId::new("A"));
        assert_eq!(outcome.failed, 1);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn test_screen_universe_requires_source() {
        let screener = Screener::new(
            ScreenerConfig::new(),
            stub_source(),
            Arc::new(NoopCache::new()),
            Arc::new(StubEvaluator),
        );
        let window = QueryWindow::years(2018, 2022).unwrap();

        let err = screener.screen_universe(window, 2, false).await.unwrap_err();
        assert!(matches!(err, ScreenError::InvalidParameter(_)));
    }

    #[test]
    fn test_debug_names_collaborators() {
        let screener = Screener::new(
            ScreenerConfig::new(),
            stub_source(),
            Arc::new(NoopCache::new()),
            Arc::new(StubEvaluator),
        );
        let debug = format!("{screener:?}");
        assert!(debug.contains("Stub"));
        assert!(debug.contains("NoopCache"));
    }
}
