//! Filter orchestration
//!
//! Drives a run end to end:
//! 1. Resolve the source selection and the metric CRS
//! 2. Connect every target and pick its effective provider tier
//! 3. Prepare the source geometry once per tier/backend group
//! 4. Per dataset, under its lock: compile, materialize, apply, push history
//!    and invalidate caches
//!
//! Failures are recorded per dataset and never abort the rest of the run.

mod context;
mod runner;
mod types;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;

pub use context::EngineContext;
pub use runner::{DatasetLocks, ExclusiveRunner, ExclusiveTask, InlineRunner, SerialRunner};
pub use types::{
    AppliedDataset, FilterAction, ProgressEvent, ProgressStage, RunOptions, RunSummary,
    SkippedDataset,
};

use crate::data::cache::{
    CacheServiceStats, ExploredSelection, ExpressionKey, GeometryKey, SelectionMode,
};
use crate::data::connector::{DatasetConnector, DatasetHandle};
use crate::data::executor::SqlExecutor;
use crate::data::sql::SqlBackend;
use crate::domain::backend::{BackendStrategy, Compiled, MaterializationRef, StrategyJob};
use crate::domain::dataset::{DatasetDescriptor, FeatureKey, ProviderKind};
use crate::domain::error::EngineError;
use crate::domain::filter::{FilterChain, validate_chain};
use crate::domain::geometry::{
    BufferSpec, PrepareRequest, Prepared, PreparedGeometry, SourceSelection, crs, prepare,
};
use crate::domain::history::{FilterState, HistoryEntry};
use crate::domain::session::SessionArtifact;

/// Target dataset connected for one run
struct Target {
    handle: DatasetHandle,
    strategy: BackendStrategy,
    backend: Option<SqlBackend>,
}

impl Target {
    fn id(&self) -> &str {
        &self.handle.descriptor.dataset_id
    }
}

/// Geometry and tier shared by the targets of one group
struct GroupPlan {
    strategy: BackendStrategy,
    backend: Option<SqlBackend>,
    geometry: Option<Arc<PreparedGeometry>>,
}

/// Per-run values threaded through dataset processing
struct RunScope<'a> {
    action: FilterAction,
    chain: &'a FilterChain,
    source: Option<&'a SourceSelection>,
    options: &'a RunOptions,
    metric_srid: u32,
    total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Undo,
    Redo,
}

pub struct FilterOrchestrator {
    ctx: EngineContext,
    connector: Arc<dyn DatasetConnector>,
    locks: DatasetLocks,
    /// Materialized objects per dataset, dropped on reset
    artifacts: DashMap<String, Vec<(BackendStrategy, MaterializationRef)>>,
}

impl FilterOrchestrator {
    pub fn new(ctx: EngineContext, connector: Arc<dyn DatasetConnector>) -> Self {
        Self {
            ctx,
            connector,
            locks: DatasetLocks::new(),
            artifacts: DashMap::new(),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Rebuild histories from the persisted session
    pub async fn restore_session(&self) -> Result<usize, EngineError> {
        let Some(store) = &self.ctx.session else {
            return Ok(0);
        };
        let snapshot = store.load().await?;
        for artifact in &snapshot.artifacts {
            self.track_artifact(
                &artifact.dataset_id,
                BackendStrategy::for_kind(artifact.provider_kind),
                &artifact.reference,
            );
        }
        Ok(self.ctx.history.restore(&snapshot))
    }

    /// Run `action` for `targets`, using `source` as the spatial reference
    pub async fn run_filter_action(
        &self,
        action: FilterAction,
        source: Option<&DatasetDescriptor>,
        targets: &[DatasetDescriptor],
        chain: &FilterChain,
        options: RunOptions,
    ) -> Result<RunSummary, EngineError> {
        tracing::debug!(
            action = %action,
            targets = targets.len(),
            filters = chain.len(),
            "Starting filter run"
        );

        let mut summary = RunSummary::new(action);
        match action {
            FilterAction::Filter | FilterAction::Export => match validate_chain(chain) {
                Ok(()) => {
                    self.run_chain(action, source, targets, chain, &options, &mut summary)
                        .await
                }
                Err(e) => summary.skip_all(targets, &e),
            },
            FilterAction::Unfilter => self.run_unfilter(targets, &options, &mut summary).await,
            FilterAction::Reset => self.run_reset(targets, &options, &mut summary).await,
        }

        if action.mutates() || !summary.artifacts.is_empty() {
            self.save_session(&mut summary).await;
        }

        tracing::debug!(
            action = %action,
            applied = summary.applied.len(),
            skipped = summary.skipped.len(),
            warnings = summary.warnings.len(),
            cancelled = summary.cancelled,
            "Filter run finished"
        );
        Ok(summary)
    }

    /// Move a dataset's history cursor back; returns the expression to re-apply
    pub fn undo(&self, dataset_id: &str) -> Result<String, EngineError> {
        Ok(self.ctx.history.undo(dataset_id)?.expression.clone())
    }

    /// Move a dataset's history cursor forward; returns the expression to re-apply
    pub fn redo(&self, dataset_id: &str) -> Result<String, EngineError> {
        Ok(self.ctx.history.redo(dataset_id)?.expression.clone())
    }

    /// Undo and apply the previous state to the dataset
    pub async fn apply_undo(&self, descriptor: &DatasetDescriptor) -> Result<Arc<FilterState>, EngineError> {
        self.step(descriptor, Direction::Undo).await
    }

    /// Redo and apply the next state to the dataset
    pub async fn apply_redo(&self, descriptor: &DatasetDescriptor) -> Result<Arc<FilterState>, EngineError> {
        self.step(descriptor, Direction::Redo).await
    }

    pub fn history(&self, dataset_id: &str) -> Vec<HistoryEntry> {
        self.ctx.history.entries(dataset_id)
    }

    pub fn cache_stats(&self) -> CacheServiceStats {
        self.ctx.cache.stats()
    }

    /// Record the features a user selected on a dataset
    pub fn record_selection(&self, dataset_id: &str, keys: Vec<FeatureKey>) {
        let mode = selection_mode(&keys);
        self.ctx.cache.record_exploration(
            dataset_id,
            mode,
            ExploredSelection {
                keys,
                expression: None,
            },
        );
    }

    // =========================================================================
    // Filter / Export
    // =========================================================================

    async fn run_chain(
        &self,
        action: FilterAction,
        source: Option<&DatasetDescriptor>,
        targets: &[DatasetDescriptor],
        chain: &FilterChain,
        options: &RunOptions,
        summary: &mut RunSummary,
    ) {
        let spatial = chain.has_spatial_filters();
        let source_selection = match (spatial, source) {
            (false, _) => None,
            (true, None) => {
                let e = EngineError::invalid("spatial filters need a source dataset");
                summary.skip_all(targets, &e);
                return;
            }
            (true, Some(source)) => match self.resolve_source(source, options).await {
                Ok(selection) => Some(selection),
                Err(e) => {
                    summary.skip_all(targets, &e);
                    return;
                }
            },
        };

        let metric_srid = match (&source_selection, &options.buffer) {
            (Some(selection), Some(_)) => {
                let explicit = options.metric_srid.or(self.ctx.engine.metric_srid);
                match crs::resolve_metric_srid(selection.descriptor.srid, explicit) {
                    Ok(srid) => srid,
                    Err(e) => {
                        summary.skip_all(targets, &e);
                        return;
                    }
                }
            }
            (Some(selection), None) => selection.descriptor.srid,
            (None, _) => 0,
        };

        let scope = RunScope {
            action,
            chain,
            source: source_selection.as_ref(),
            options,
            metric_srid,
            total: targets.len(),
        };

        // Connect and pick tiers
        let mut connected: Vec<Target> = Vec::new();
        for descriptor in targets {
            self.emit(options, &descriptor.dataset_id, ProgressStage::Preparing, 0, scope.total);
            match self.connect_target(descriptor, summary).await {
                Ok(target) => connected.push(target),
                Err(e) => summary.skip(&descriptor.dataset_id, &e),
            }
        }
        if self.cancel_remaining(&connected, options, summary) {
            return;
        }

        // One geometry per group, in first-seen order
        let mut groups: Vec<((BackendStrategy, Option<SqlBackend>), Result<GroupPlan, EngineError>)> =
            Vec::new();
        for target in &connected {
            let key = (target.strategy, target.backend);
            if groups.iter().any(|(k, _)| *k == key) {
                continue;
            }
            let plan = self.plan_group(target, &scope, summary).await;
            groups.push((key, plan));
        }
        if self.cancel_remaining(&connected, options, summary) {
            return;
        }

        let mut completed = summary.skipped.len();
        for target in &connected {
            if options.is_cancelled() {
                summary.cancelled = true;
                tracing::warn!(dataset = %target.id(), "Run cancelled before dataset");
                summary.skip(target.id(), &EngineError::Cancelled);
                continue;
            }

            let key = (target.strategy, target.backend);
            let plan = groups
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, plan)| plan);
            completed += 1;
            let result = match plan {
                Some(Ok(plan)) => self.filter_dataset(target, plan, &scope, summary).await,
                Some(Err(e)) => {
                    self.emit(options, target.id(), ProgressStage::Skipped, completed, scope.total);
                    summary.skip(target.id(), e);
                    continue;
                }
                None => Err(EngineError::invalid("dataset was not grouped")),
            };

            match result {
                Ok(applied) => {
                    self.emit(options, target.id(), ProgressStage::Done, completed, scope.total);
                    summary.applied.push(applied);
                }
                Err(e) => {
                    self.emit(options, target.id(), ProgressStage::Skipped, completed, scope.total);
                    summary.skip(target.id(), &e);
                }
            }
        }
    }

    async fn resolve_source(
        &self,
        source: &DatasetDescriptor,
        options: &RunOptions,
    ) -> Result<SourceSelection, EngineError> {
        let handle = self.connector.connect(source).await?;
        let keys = match &options.source_keys {
            Some(keys) if !keys.is_empty() => {
                self.record_selection(&source.dataset_id, keys.clone());
                keys.clone()
            }
            _ => self.explored_keys(&source.dataset_id).ok_or_else(|| {
                EngineError::invalid(format!(
                    "no features selected on source {}",
                    source.dataset_id
                ))
            })?,
        };

        let features = match &handle.reader {
            Some(reader) => reader.read_features(Some(&keys)).await?,
            None => Vec::new(),
        };
        let backend = handle.sql.as_ref().map(|s| s.backend());
        tracing::debug!(
            source = %source.dataset_id,
            keys = keys.len(),
            features = features.len(),
            "Source selection resolved"
        );
        Ok(SourceSelection {
            descriptor: source.clone(),
            keys,
            features,
            backend,
        })
    }

    fn explored_keys(&self, dataset_id: &str) -> Option<Vec<FeatureKey>> {
        [
            SelectionMode::MultipleFeatures,
            SelectionMode::SingleFeature,
            SelectionMode::CustomExpression,
        ]
        .into_iter()
        .filter_map(|mode| self.ctx.cache.exploration(dataset_id, mode))
        .find(|selection| !selection.keys.is_empty())
        .map(|selection| selection.keys.clone())
    }

    async fn connect_target(
        &self,
        descriptor: &DatasetDescriptor,
        summary: &mut RunSummary,
    ) -> Result<Target, EngineError> {
        let handle = self.connector.connect(descriptor).await?;
        let strategy = self.effective_strategy(&handle, summary)?;
        let backend = match strategy {
            BackendStrategy::GenericReader => None,
            _ => handle.sql.as_ref().map(|s| s.backend()),
        };
        Ok(Target {
            handle,
            strategy,
            backend,
        })
    }

    /// Tier that can actually serve the dataset in this run
    fn effective_strategy(
        &self,
        handle: &DatasetHandle,
        summary: &mut RunSummary,
    ) -> Result<BackendStrategy, EngineError> {
        let desc = &handle.descriptor;
        let sql_backend = handle.sql.as_ref().map(|s| s.backend());
        let has_reader = handle.reader.is_some();

        match desc.provider_kind {
            ProviderKind::FullSql
                if self.ctx.engine.full_sql_available && sql_backend == Some(SqlBackend::Postgis) =>
            {
                Ok(BackendStrategy::FullSql)
            }
            ProviderKind::FullSql => {
                let reason = if self.ctx.engine.full_sql_available {
                    "no PostGIS executor"
                } else {
                    "full SQL backend unavailable"
                };
                let degraded = match sql_backend {
                    Some(SqlBackend::Spatialite | SqlBackend::Duckdb) => BackendStrategy::EmbeddedSql,
                    _ if has_reader => BackendStrategy::GenericReader,
                    _ => {
                        return Err(EngineError::metadata(
                            &desc.dataset_id,
                            format!("{} and nothing to fall back to", reason),
                        ));
                    }
                };
                summary.warn(format!(
                    "{}: {}, filtering through {}",
                    desc.dataset_id,
                    reason,
                    degraded.kind()
                ));
                Ok(degraded)
            }
            ProviderKind::EmbeddedSql if sql_backend.is_some() => Ok(BackendStrategy::EmbeddedSql),
            ProviderKind::EmbeddedSql if has_reader => {
                summary.warn(format!(
                    "{}: no embedded SQL executor, filtering in memory",
                    desc.dataset_id
                ));
                Ok(BackendStrategy::GenericReader)
            }
            ProviderKind::EmbeddedSql => Err(EngineError::metadata(
                &desc.dataset_id,
                "dataset offers neither an SQL executor nor a feature reader",
            )),
            ProviderKind::GenericReader if has_reader => Ok(BackendStrategy::GenericReader),
            ProviderKind::GenericReader => Err(EngineError::metadata(
                &desc.dataset_id,
                "dataset offers no feature reader",
            )),
        }
    }

    async fn plan_group(
        &self,
        first: &Target,
        scope: &RunScope<'_>,
        summary: &mut RunSummary,
    ) -> Result<GroupPlan, EngineError> {
        let Some(source) = scope.source else {
            return Ok(GroupPlan {
                strategy: first.strategy,
                backend: first.backend,
                geometry: None,
            });
        };

        let validator = match first.strategy {
            BackendStrategy::EmbeddedSql => first.handle.sql.as_deref(),
            _ => None,
        };
        let prepared = self
            .group_geometry(source, first.strategy, first.backend, validator, scope)
            .await?;

        for skipped in &prepared.geometry().skipped {
            summary.warn(format!("source feature skipped: {}", skipped));
        }
        match prepared {
            Prepared::Ready(geometry) => Ok(GroupPlan {
                strategy: first.strategy,
                backend: first.backend,
                geometry: Some(geometry),
            }),
            Prepared::Degraded { geometry, reason } => {
                summary.warn(format!(
                    "{} group degraded to in-memory filtering: {}",
                    first.backend.map(|b| b.name()).unwrap_or("sql"),
                    reason
                ));
                Ok(GroupPlan {
                    strategy: BackendStrategy::GenericReader,
                    backend: None,
                    geometry: Some(geometry),
                })
            }
        }
    }

    /// Prepared geometry for a group, through the geometry cache
    async fn group_geometry(
        &self,
        source: &SourceSelection,
        strategy: BackendStrategy,
        backend: Option<SqlBackend>,
        validator: Option<&dyn SqlExecutor>,
        scope: &RunScope<'_>,
    ) -> Result<Prepared, EngineError> {
        let buffer = scope.options.buffer.as_ref();
        let key = GeometryKey::new(
            source.descriptor.dataset_id.as_str(),
            buffer
                .map(BufferSpec::fingerprint)
                .unwrap_or_else(|| "none".to_string()),
            format!(
                "{}/{}",
                strategy.kind(),
                backend.map(|b| b.name()).unwrap_or("memory")
            ),
            format!("{}:{}", source.fingerprint(), scope.metric_srid),
        );
        if let Some(cached) = self.ctx.cache.geometries.get(&key) {
            tracing::debug!(source = %source.descriptor.dataset_id, "Prepared geometry cache hit");
            return Ok(Prepared::Ready(cached));
        }

        let prepared = prepare(PrepareRequest {
            source,
            kind: strategy.kind(),
            backend,
            buffer,
            metric_srid: scope.metric_srid,
            validator,
        })
        .await?;
        if let Prepared::Ready(geometry) = &prepared {
            self.ctx.cache.geometries.put(&key, Arc::clone(geometry));
        }
        Ok(prepared)
    }

    async fn filter_dataset(
        &self,
        target: &Target,
        plan: &GroupPlan,
        scope: &RunScope<'_>,
        summary: &mut RunSummary,
    ) -> Result<AppliedDataset, EngineError> {
        let id = target.id().to_string();
        let _guard = self.locks.acquire(&id).await;
        let handle = &target.handle;

        let mut chain = scope.chain.clone();
        chain.dataset_id = id.clone();

        let attempt = self
            .materialize_with(plan.strategy, plan.geometry.as_deref(), handle, &chain, scope)
            .await;
        let (strategy, compiled, reference) = match attempt {
            Ok(done) => done,
            Err(e)
                if e.is_materialization()
                    && plan.strategy != BackendStrategy::GenericReader
                    && handle.reader.is_some() =>
            {
                summary.warn(format!(
                    "{}: {} failed ({}), retrying in memory",
                    id,
                    plan.strategy.kind(),
                    e
                ));
                let geometry = match scope.source {
                    Some(source) if chain.has_spatial_filters() => Some(
                        self.group_geometry(source, BackendStrategy::GenericReader, None, None, scope)
                            .await?
                            .geometry()
                            .clone(),
                    ),
                    _ => None,
                };
                self.materialize_with(
                    BackendStrategy::GenericReader,
                    geometry.as_deref(),
                    handle,
                    &chain,
                    scope,
                )
                .await?
            }
            Err(e) => return Err(e),
        };

        if let Some(artifact) = reference.artifact() {
            summary.artifacts.push(artifact);
            self.track_artifact(&id, strategy, &reference);
        }

        if strategy == BackendStrategy::GenericReader
            && let Some(count) = handle.feature_count_estimate
            && count > self.ctx.engine.large_dataset_threshold
        {
            summary.warn(format!(
                "{}: {} features filtered in memory, consider an SQL backend above {}",
                id, count, self.ctx.engine.large_dataset_threshold
            ));
        }

        if scope.action == FilterAction::Export {
            return Ok(AppliedDataset {
                dataset_id: id,
                provider_kind: strategy.kind(),
                expression: reference.subset().to_string(),
                sequence: None,
            });
        }

        let baseline = handle.subset.current_subset().await?;
        self.emit(scope.options, &id, ProgressStage::Applying, 0, scope.total);
        let applied = self
            .ctx
            .runner
            .run(
                &id,
                Box::pin(async { strategy.apply(&reference, handle).await.map(|_| ()) }),
            )
            .await;
        if let Err(e) = applied {
            if let Err(cleanup_err) = strategy.cleanup(&reference, handle).await {
                tracing::warn!(dataset = %id, error = %cleanup_err, "Cleanup after failed apply failed");
            }
            return Err(e);
        }

        let sequence = if baseline != reference.subset() {
            self.ctx
                .history
                .seed_baseline(&id, &baseline, handle.descriptor.provider_kind);
            let state = self
                .ctx
                .history
                .push(&id, reference.subset(), strategy.kind());
            Some(state.sequence)
        } else {
            self.ctx.history.current(&id).map(|s| s.sequence)
        };
        self.invalidate_changed(&id);

        tracing::debug!(
            dataset = %id,
            strategy = %strategy.kind(),
            expression = %compiled.expression,
            "Dataset filtered"
        );
        Ok(AppliedDataset {
            dataset_id: id,
            provider_kind: strategy.kind(),
            expression: reference.subset().to_string(),
            sequence,
        })
    }

    async fn materialize_with(
        &self,
        strategy: BackendStrategy,
        geometry: Option<&PreparedGeometry>,
        handle: &DatasetHandle,
        chain: &FilterChain,
        scope: &RunScope<'_>,
    ) -> Result<(BackendStrategy, Compiled, MaterializationRef), EngineError> {
        let job = StrategyJob {
            handle,
            chain,
            geometry,
            scratch_schema: &self.ctx.engine.scratch_schema,
        };
        let id = &handle.descriptor.dataset_id;

        self.emit(scope.options, id, ProgressStage::Compiling, 0, scope.total);
        let compiled = self.compile_cached(strategy, &job).await?;

        self.emit(scope.options, id, ProgressStage::Materializing, 0, scope.total);
        let reference = strategy.materialize(&job, &compiled).await?;
        Ok((strategy, compiled, reference))
    }

    /// Compile through the expression cache; in-memory selections depend on
    /// dataset contents and are never cached
    async fn compile_cached(
        &self,
        strategy: BackendStrategy,
        job: &StrategyJob<'_>,
    ) -> Result<Compiled, EngineError> {
        if strategy == BackendStrategy::GenericReader {
            return strategy.build_expression(job).await;
        }
        let key = ExpressionKey::new(
            &job.handle.descriptor.dataset_id,
            &job.chain.fingerprint(),
            strategy.kind(),
            job.geometry.map(|g| g.fingerprint.as_str()),
        );
        if let Some(expression) = self.ctx.cache.expressions.get(&key) {
            tracing::debug!(dataset = %job.handle.descriptor.dataset_id, "Expression cache hit");
            return Ok(Compiled::sql(expression));
        }
        let compiled = strategy.build_expression(job).await?;
        tracing::trace!(dataset = %job.handle.descriptor.dataset_id, expression = %compiled.expression, "Compiled expression");
        self.ctx.cache.expressions.put(&key, compiled.expression.clone());
        Ok(compiled)
    }

    /// Drop cache entries that depend on a dataset's visible features
    fn invalidate_changed(&self, dataset_id: &str) {
        self.ctx.cache.geometries.invalidate_dataset(dataset_id);
        self.ctx.cache.exploring.invalidate_dataset(dataset_id);
    }

    // =========================================================================
    // Unfilter / Reset / undo / redo
    // =========================================================================

    async fn run_unfilter(
        &self,
        targets: &[DatasetDescriptor],
        options: &RunOptions,
        summary: &mut RunSummary,
    ) {
        let total = targets.len();
        for (i, descriptor) in targets.iter().enumerate() {
            let id = descriptor.dataset_id.as_str();
            if options.is_cancelled() {
                summary.cancelled = true;
                summary.skip(id, &EngineError::Cancelled);
                continue;
            }
            match self.step(descriptor, Direction::Undo).await {
                Ok(state) => {
                    self.emit(options, id, ProgressStage::Done, i + 1, total);
                    summary.applied.push(AppliedDataset {
                        dataset_id: id.to_string(),
                        provider_kind: state.provider_kind,
                        expression: state.expression.clone(),
                        sequence: Some(state.sequence),
                    });
                }
                Err(e) => {
                    self.emit(options, id, ProgressStage::Skipped, i + 1, total);
                    summary.skip(id, &e);
                }
            }
        }
    }

    async fn step(
        &self,
        descriptor: &DatasetDescriptor,
        direction: Direction,
    ) -> Result<Arc<FilterState>, EngineError> {
        let id = descriptor.dataset_id.as_str();
        let _guard = self.locks.acquire(id).await;
        let handle = self.connector.connect(descriptor).await?;

        let state = match direction {
            Direction::Undo => self.ctx.history.undo(id)?,
            Direction::Redo => self.ctx.history.redo(id)?,
        };
        let expression = state.expression.clone();
        let applied = self
            .ctx
            .runner
            .run(
                id,
                Box::pin(async {
                    handle.subset.set_subset(&expression).await.map_err(|e| {
                        EngineError::materialization(id, e.to_string())
                    })
                }),
            )
            .await;

        if let Err(e) = applied {
            // Keep the cursor on the state that is still applied
            let restored = match direction {
                Direction::Undo => self.ctx.history.redo(id),
                Direction::Redo => self.ctx.history.undo(id),
            };
            if let Err(restore_err) = restored {
                tracing::warn!(dataset = %id, error = %restore_err, "Failed to restore history cursor");
            }
            return Err(e);
        }

        self.invalidate_changed(id);
        tracing::debug!(dataset = %id, direction = ?direction, sequence = state.sequence, "History step applied");
        Ok(state)
    }

    async fn run_reset(
        &self,
        targets: &[DatasetDescriptor],
        options: &RunOptions,
        summary: &mut RunSummary,
    ) {
        let total = targets.len();
        for (i, descriptor) in targets.iter().enumerate() {
            let id = descriptor.dataset_id.as_str();
            if options.is_cancelled() {
                summary.cancelled = true;
                summary.skip(id, &EngineError::Cancelled);
                continue;
            }
            match self.reset_dataset(descriptor, summary).await {
                Ok(()) => {
                    self.emit(options, id, ProgressStage::Done, i + 1, total);
                    summary.applied.push(AppliedDataset {
                        dataset_id: id.to_string(),
                        provider_kind: descriptor.provider_kind,
                        expression: String::new(),
                        sequence: None,
                    });
                }
                Err(e) => {
                    self.emit(options, id, ProgressStage::Skipped, i + 1, total);
                    summary.skip(id, &e);
                }
            }
        }
    }

    async fn reset_dataset(
        &self,
        descriptor: &DatasetDescriptor,
        summary: &mut RunSummary,
    ) -> Result<(), EngineError> {
        let id = descriptor.dataset_id.as_str();
        let _guard = self.locks.acquire(id).await;
        let handle = self.connector.connect(descriptor).await?;

        self.ctx
            .runner
            .run(
                id,
                Box::pin(async {
                    handle
                        .subset
                        .set_subset("")
                        .await
                        .map_err(|e| EngineError::materialization(id, e.to_string()))
                }),
            )
            .await?;

        if let Some((_, artifacts)) = self.artifacts.remove(id) {
            for (strategy, reference) in artifacts {
                if let Err(e) = strategy.cleanup(&reference, &handle).await {
                    summary.warn(format!(
                        "{}: failed to drop {}: {}",
                        id,
                        reference.artifact().unwrap_or_default(),
                        e
                    ));
                }
            }
        }

        self.ctx.history.clear(id);
        self.ctx.cache.invalidate_dataset(id);
        tracing::debug!(dataset = %id, "Dataset reset");
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Write the current histories to the session store, if one is configured
    pub async fn persist_session(&self) -> Result<(), EngineError> {
        let Some(store) = &self.ctx.session else {
            return Ok(());
        };
        let mut snapshot = self.ctx.history.snapshot();
        snapshot.artifacts = self.artifact_records();
        store.save(snapshot).await?;
        Ok(())
    }

    /// Skip every connected target once the run is cancelled; true when it was
    fn cancel_remaining(&self, connected: &[Target], options: &RunOptions, summary: &mut RunSummary) -> bool {
        if !options.is_cancelled() {
            return false;
        }
        summary.cancelled = true;
        tracing::warn!(targets = connected.len(), "Run cancelled before filtering");
        let total = summary.skipped.len() + connected.len();
        for target in connected {
            summary.skip(target.id(), &EngineError::Cancelled);
            self.emit(options, target.id(), ProgressStage::Skipped, summary.skipped.len(), total);
        }
        true
    }

    /// Remember a backend object for a later reset; each object once
    fn track_artifact(&self, dataset_id: &str, strategy: BackendStrategy, reference: &MaterializationRef) {
        if reference.artifact().is_none() {
            return;
        }
        let mut tracked = self.artifacts.entry(dataset_id.to_string()).or_default();
        if !tracked.iter().any(|(_, known)| known == reference) {
            tracked.push((strategy, reference.clone()));
        }
    }

    /// Tracked objects, sorted by dataset id
    fn artifact_records(&self) -> Vec<SessionArtifact> {
        let mut records: Vec<SessionArtifact> = self
            .artifacts
            .iter()
            .flat_map(|entry| {
                let dataset_id = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(|(strategy, reference)| SessionArtifact {
                        dataset_id: dataset_id.clone(),
                        provider_kind: strategy.kind(),
                        reference: reference.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        records.sort_by(|a, b| a.dataset_id.cmp(&b.dataset_id));
        records
    }

    async fn save_session(&self, summary: &mut RunSummary) {
        if let Err(e) = self.persist_session().await {
            summary.warn(format!("session not saved: {}", e));
        }
    }

    /// Report progress without waiting; a full or closed channel drops the event
    fn emit(
        &self,
        options: &RunOptions,
        dataset_id: &str,
        stage: ProgressStage,
        completed: usize,
        total: usize,
    ) {
        let Some(progress) = &options.progress else {
            return;
        };
        let event = ProgressEvent {
            dataset_id: dataset_id.to_string(),
            stage,
            completed,
            total,
        };
        match progress.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::debug!(dataset = %dataset_id, stage = ?stage, "Progress channel full, event dropped");
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(dataset = %dataset_id, "Progress receiver dropped");
            }
        }
    }
}

fn selection_mode(keys: &[FeatureKey]) -> SelectionMode {
    if keys.len() == 1 {
        SelectionMode::SingleFeature
    } else {
        SelectionMode::MultipleFeatures
    }
}
