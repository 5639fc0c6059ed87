//! Batch screening over many entities.
//!
//! A run probes the cache for every entity, splits the list into a ready group
//! (served from cache, wide and unpaced) and a fetch group (narrow and paced by
//! the [`RateScheduler`]), then evaluates and ranks whatever comes back.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use screener_core::{
    AccountTier, EndpointClass, EntityId, ErrorKind, Evaluator, FetchTask, NormalizedRecordSet,
    QueryWindow, RateScheduler, Result, ScreenError, Verdict,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::BatchConfig;
use crate::orchestrator::{FetchOrchestrator, Pacing};

/// Inputs for one batch run.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchRequest {
    /// Entities to screen.
    pub entities: Vec<EntityId>,
    /// Query window applied to every entity.
    pub window: QueryWindow,
    /// Requested worker count for entities that need provider calls.
    pub concurrency: usize,
    /// Provider account tier used for pacing.
    pub tier: AccountTier,
    /// Delay added to every paced call on top of the computed one.
    pub extra_delay: Duration,
}

impl BatchRequest {
    /// Creates a request with one fetch worker and the default tier.
    #[must_use]
    pub fn new(entities: impl IntoIterator<Item = EntityId>, window: QueryWindow) -> Self {
        Self {
            entities: entities.into_iter().collect(),
            window,
            concurrency: 1,
            tier: AccountTier::default(),
            extra_delay: Duration::ZERO,
        }
    }

    /// Set the fetch worker count.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the account tier.
    #[must_use]
    pub const fn with_tier(mut self, tier: AccountTier) -> Self {
        self.tier = tier;
        self
    }

    /// Set the extra per-call delay.
    #[must_use]
    pub const fn with_extra_delay(mut self, extra_delay: Duration) -> Self {
        self.extra_delay = extra_delay;
        self
    }
}

/// Which worker group processed an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BatchPhase {
    /// Entities fully covered by the cache.
    Ready,
    /// Entities that need at least one provider call.
    Fetch,
}

/// One worker group's assignment.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerGroupPlan {
    /// Group this plan drives.
    pub phase: BatchPhase,
    /// Entities assigned to the group.
    pub entities: Vec<EntityId>,
    /// Worker count.
    pub concurrency: usize,
    /// Delay each worker honors between its own financial-statement calls.
    pub per_call_delay: Duration,
    /// Pacing handed to the orchestrator, `None` for the ready group.
    pub pacing: Option<Pacing>,
}

/// Snapshot handed to the progress callback after each entity completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    /// Entities completed so far, strictly increasing across callbacks.
    pub completed: usize,
    /// Entities in the batch.
    pub total: usize,
    /// Entities that passed so far.
    pub passed: usize,
    /// Entities that were rejected or errored so far.
    pub failed: usize,
    /// Entity that just completed.
    pub entity: EntityId,
    /// Group the entity ran in.
    pub phase: BatchPhase,
}

/// An entity that passed both rule sets.
#[derive(Clone, Debug, PartialEq)]
pub struct PassedEntity {
    /// The entity.
    pub entity: EntityId,
    /// Records the rules were applied to.
    pub records: NormalizedRecordSet,
    /// Fundamentals verdict.
    pub fundamentals: Verdict,
    /// Valuation verdict.
    pub valuation: Verdict,
    /// Ascending sort key; `None` sorts last.
    pub rank: Option<f64>,
}

/// An entity whose fetch failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityFailure {
    /// The entity.
    pub entity: EntityId,
    /// Classification of the error.
    pub kind: ErrorKind,
    /// Rendered error.
    pub message: String,
}

/// Aggregate result of a batch run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchOutcome {
    /// Passed entities, ranked.
    pub passed: Vec<PassedEntity>,
    /// Entities that did not pass, whether rejected by rules or errored.
    pub failed: usize,
    /// Errored entities.
    pub errors: Vec<EntityFailure>,
    /// Size of the ready group.
    pub ready: usize,
    /// Size of the fetch group.
    pub fetched: usize,
    /// Entities never started because the run was cancelled.
    pub skipped: usize,
    /// Whether a stop was requested during the run.
    pub cancelled: bool,
}

/// Result of one entity's evaluation.
#[derive(Debug)]
enum Evaluated {
    Passed(Box<PassedEntity>),
    Rejected,
}

/// Runs the fetch orchestrator and the evaluator across many entities.
#[derive(Debug, Clone)]
pub struct BatchEngine {
    orchestrator: Arc<FetchOrchestrator>,
    evaluator: Arc<dyn Evaluator>,
    config: BatchConfig,
    scheduler: RateScheduler,
}

impl BatchEngine {
    /// Create an engine with default worker limits.
    #[must_use]
    pub fn new(orchestrator: Arc<FetchOrchestrator>, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            orchestrator,
            evaluator,
            config: BatchConfig::default(),
            scheduler: RateScheduler::new(),
        }
    }

    /// Set the worker limits.
    #[must_use]
    pub const fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the scheduler used for the fetch group.
    #[must_use]
    pub const fn with_scheduler(mut self, scheduler: RateScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Probes the cache for every entity and builds the two worker groups.
    ///
    /// Issues no provider calls.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if any entity is empty.
    #[instrument(skip(self, request), fields(entities = request.entities.len()))]
    pub async fn plan(&self, request: &BatchRequest) -> Result<(WorkerGroupPlan, WorkerGroupPlan)> {
        let mut ready = Vec::new();
        let mut needs_fetch = Vec::new();
        for entity in &request.entities {
            let task = FetchTask::new(entity.clone(), request.window);
            if self.orchestrator.probe(&task).await?.is_ready() {
                ready.push(task.entity);
            } else {
                needs_fetch.push(task.entity);
            }
        }

        let ready_concurrency = ready.len().clamp(1, self.config.ready_concurrency_cap.max(1));
        let fetch_concurrency = request
            .concurrency
            .clamp(1, self.config.max_fetch_concurrency.max(1));
        let scheduler = self
            .scheduler
            .with_extra_delay(self.scheduler.extra_delay() + request.extra_delay);
        let pacing = Pacing::new(scheduler, request.tier, fetch_concurrency);

        Ok((
            WorkerGroupPlan {
                phase: BatchPhase::Ready,
                entities: ready,
                concurrency: ready_concurrency,
                per_call_delay: Duration::ZERO,
                pacing: None,
            },
            WorkerGroupPlan {
                phase: BatchPhase::Fetch,
                entities: needs_fetch,
                concurrency: fetch_concurrency,
                per_call_delay: pacing.delay_before(EndpointClass::Financial),
                pacing: Some(pacing),
            },
        ))
    }

    /// Screens every entity in `request`.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if any entity is empty. Per-entity
    /// provider and data errors are recorded in the outcome instead.
    pub async fn run(&self, request: &BatchRequest) -> Result<BatchOutcome> {
        self.run_with(request, &CancellationToken::new(), |_| {}).await
    }

    /// Screens every entity, reporting progress and honoring `cancel`.
    ///
    /// `cancel` is checked before each entity starts; an entity already fetching
    /// runs to completion. `progress` is called once per completed entity.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidKey`] if any entity is empty.
    #[instrument(skip_all, fields(entities = request.entities.len(), window = %request.window))]
    pub async fn run_with<F>(
        &self,
        request: &BatchRequest,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<BatchOutcome>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        let (ready, needs_fetch) = self.plan(request).await?;
        info!(
            ready = ready.entities.len(),
            fetch = needs_fetch.entities.len(),
            fetch_workers = needs_fetch.concurrency,
            per_call_delay = ?needs_fetch.per_call_delay,
            "Cache probe complete"
        );

        let mut outcome = BatchOutcome {
            ready: ready.entities.len(),
            fetched: needs_fetch.entities.len(),
            ..BatchOutcome::default()
        };
        let total = request.entities.len();

        for plan in [&ready, &needs_fetch] {
            if plan.entities.is_empty() {
                continue;
            }
            self.run_group(plan, request.window, cancel, total, &mut outcome, &mut progress)
                .await?;
            info!(
                phase = ?plan.phase,
                passed = outcome.passed.len(),
                failed = outcome.failed,
                "Worker group finished"
            );
        }

        outcome.passed.sort_by(by_rank);
        outcome.cancelled = cancel.is_cancelled();
        info!(
            passed = outcome.passed.len(),
            failed = outcome.failed,
            errors = outcome.errors.len(),
            skipped = outcome.skipped,
            "Batch complete"
        );
        Ok(outcome)
    }

    async fn run_group<F>(
        &self,
        plan: &WorkerGroupPlan,
        window: QueryWindow,
        cancel: &CancellationToken,
        total: usize,
        outcome: &mut BatchOutcome,
        progress: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&BatchProgress) + Send,
    {
        // one pacing clock per worker, carried from entity to entity
        let template = plan.pacing;
        let clocks = Mutex::new(vec![template; plan.concurrency.max(1)]);
        let clocks = &clocks;
        let mut results = stream::iter(plan.entities.iter().cloned())
            .map(move |entity| async move {
                if cancel.is_cancelled() {
                    return (entity, None);
                }
                let mut clock = clocks
                    .lock()
                    .ok()
                    .and_then(|mut free| free.pop())
                    .unwrap_or(template);
                let task = FetchTask::new(entity, window);
                let result = self
                    .orchestrator
                    .fetch(&task, clock.as_mut())
                    .await
                    .map(|records| self.evaluate(records));
                if let Ok(mut free) = clocks.lock() {
                    free.push(clock);
                }
                (task.entity, Some(result))
            })
            .buffer_unordered(plan.concurrency.max(1));

        while let Some((entity, result)) = results.next().await {
            match result {
                None => {
                    outcome.skipped += 1;
                    continue;
                }
                Some(Ok(Evaluated::Passed(passed))) => {
                    debug!(entity = %entity, rank = ?passed.rank, "Entity passed");
                    outcome.passed.push(*passed);
                }
                Some(Ok(Evaluated::Rejected)) => {
                    debug!(entity = %entity, "Entity rejected");
                    outcome.failed += 1;
                }
                Some(Err(e)) if e.kind() == ErrorKind::InvalidKey => return Err(e),
                Some(Err(e)) => {
                    warn!(entity = %entity, kind = ?e.kind(), error = %e, "Entity failed");
                    outcome.failed += 1;
                    outcome.errors.push(failure(entity.clone(), &e));
                }
            }
            progress(&BatchProgress {
                completed: outcome.passed.len() + outcome.failed,
                total,
                passed: outcome.passed.len(),
                failed: outcome.failed,
                entity,
                phase: plan.phase,
            });
        }
        Ok(())
    }

    fn evaluate(&self, records: NormalizedRecordSet) -> Evaluated {
        let fundamentals = self.evaluator.fundamentals(&records);
        if !fundamentals.passed {
            return Evaluated::Rejected;
        }
        let valuation = self.evaluator.valuation(&records);
        if !valuation.passed {
            return Evaluated::Rejected;
        }
        let rank = self.evaluator.ranking_key(&records, &valuation);
        Evaluated::Passed(Box::new(PassedEntity {
            entity: records.entity.clone(),
            records,
            fundamentals,
            valuation,
            rank,
        }))
    }
}

fn failure(entity: EntityId, error: &ScreenError) -> EntityFailure {
    EntityFailure {
        entity,
        kind: error.kind(),
        message: error.to_string(),
    }
}

fn by_rank(a: &PassedEntity, b: &PassedEntity) -> Ordering {
    let rank = match (a.rank, b.rank) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    rank.then_with(|| a.entity.cmp(&b.entity))
}
