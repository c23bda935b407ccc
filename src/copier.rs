//! DataCopier - main entry point for a multi-table copy
//!
//! Planning resolves every [`TableSpec`] against the schema metadata,
//! levels the tables by foreign key and propagates filters down the levels.
//! Execution exports one source snapshot and copies level by level; the
//! tables of a level run concurrently and a level starts only after the
//! previous one has fully committed. Concurrency within a level is bounded
//! by the pool sizes unless `max_parallel_tables` says otherwise.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::{Semaphore, watch};
use tracing::{info, warn};

use crate::config::CopyConfig;
use crate::constraints::ConstraintDeferrer;
use crate::copy::{CopyAction, PlanOptions, TableCopyStats, TablePlan};
use crate::error::{CopyError, Result};
use crate::schema::{PgMetadataProvider, SchemaMetadata, SchemaMetadataProvider};
use crate::snapshot::SourceSnapshot;
use crate::sorter::{TableLevels, sort_tables};
use crate::sql::filter::propagate_filters;
use crate::table::TableSpec;
use crate::types::TableName;
use crate::validation::validate_specs;

// ============================================================================
// Plan
// ============================================================================

/// Every table copy of a run, grouped by level
#[derive(Debug, Clone)]
pub struct CopyPlan {
    levels: TableLevels,
    groups: Vec<Vec<TablePlan>>,
}

impl CopyPlan {
    pub fn levels(&self) -> &TableLevels {
        &self.levels
    }

    /// Tables left out because of circular foreign keys
    pub fn skipped(&self) -> &[TableName] {
        self.levels.unresolved()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TablePlan> {
        self.groups.iter().flatten()
    }

    pub fn table(&self, table: &TableName) -> Option<&TablePlan> {
        self.tables().find(|plan| &plan.source == table)
    }
}

/// Validate `specs`, level the tables and resolve each copy
pub fn plan_copy(
    metadata: &SchemaMetadata,
    specs: &[TableSpec],
    config: &CopyConfig,
) -> Result<CopyPlan> {
    validate_specs(metadata, specs, config)?;

    let by_table: HashMap<&TableName, &TableSpec> =
        specs.iter().map(|spec| (&spec.table, spec)).collect();

    let levels = sort_tables(by_table.keys().copied(), metadata.foreign_keys());
    if !levels.unresolved().is_empty() {
        let names: Vec<String> = levels.unresolved().iter().map(ToString::to_string).collect();
        if !config.skip_cyclic_tables {
            return Err(CopyError::CyclicDependency(names));
        }
        warn!(tables = %names.join(", "), "Skipping tables with circular foreign keys");
    }

    let propagated = propagate_filters(levels.ordered(), metadata.foreign_keys(), |table| {
        by_table.get(table).and_then(|spec| spec.filter.clone())
    });

    let options = PlanOptions {
        default_batch_size: config.default_batch_size,
        target_schema: config.target_schema.as_deref(),
        sync_sequences: config.sync_sequences,
    };

    let mut groups = Vec::with_capacity(levels.groups().len());
    for group in levels.groups() {
        let mut plans = Vec::with_capacity(group.len());
        for table in group {
            let spec = by_table
                .get(table)
                .ok_or_else(|| CopyError::configuration(format!("No copy spec for {}", table)))?;
            plans.push(TablePlan::resolve(
                spec,
                metadata,
                propagated.get(table),
                &options,
            )?);
        }
        groups.push(plans);
    }

    Ok(CopyPlan { levels, groups })
}

// ============================================================================
// Report
// ============================================================================

/// Result of a completed copy
#[derive(Debug, Clone, Serialize)]
pub struct CopyReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Tables in the order their levels ran
    pub levels: Vec<Vec<TableName>>,
    /// Tables left out because of circular foreign keys
    pub skipped: Vec<TableName>,
    pub tables: BTreeMap<TableName, TableCopyStats>,
}

impl CopyReport {
    pub fn stats(&self, table: impl Into<TableName>) -> Option<&TableCopyStats> {
        self.tables.get(&table.into())
    }

    /// Rows submitted for `table`, the primary per-table count
    pub fn rows_submitted(&self, table: impl Into<TableName>) -> Option<u64> {
        self.stats(table).map(|s| s.rows_submitted)
    }

    pub fn total_rows_submitted(&self) -> u64 {
        self.tables.values().map(|s| s.rows_submitted).sum()
    }

    pub fn total_rows_affected(&self) -> u64 {
        self.tables.values().map(|s| s.rows_affected).sum()
    }
}

// ============================================================================
// DataCopier
// ============================================================================

/// Copies data from a source database to a target database
pub struct DataCopier {
    source: PgPool,
    target: PgPool,
    config: CopyConfig,
}

impl DataCopier {
    /// Connect both pools from the configured URLs
    pub async fn connect(config: CopyConfig) -> Result<Self> {
        let source = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.source_url)
            .await
            .map_err(|e| CopyError::connection(format!("Source connection failed: {}", e)))?;
        let target = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.target_url)
            .await
            .map_err(|e| CopyError::connection(format!("Target connection failed: {}", e)))?;

        Ok(Self::from_pools(source, target, config))
    }

    /// Use existing pools; the URLs in `config` are ignored
    pub fn from_pools(source: PgPool, target: PgPool, config: CopyConfig) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    pub fn source_pool(&self) -> &PgPool {
        &self.source
    }

    pub fn target_pool(&self) -> &PgPool {
        &self.target
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    /// Read the source catalog for the configured schemas
    pub async fn load_metadata(&self) -> Result<SchemaMetadata> {
        let provider = PgMetadataProvider::new(self.source.clone(), self.config.schemas.clone());
        SchemaMetadata::load(&provider).await
    }

    /// Copy `specs`, reading metadata from the source catalog
    pub async fn copy(&self, specs: &[TableSpec]) -> Result<CopyReport> {
        let metadata = self.load_metadata().await?;
        self.copy_with_metadata(&metadata, specs).await
    }

    pub async fn copy_with_provider(
        &self,
        provider: &dyn SchemaMetadataProvider,
        specs: &[TableSpec],
    ) -> Result<CopyReport> {
        let metadata = SchemaMetadata::load(provider).await?;
        self.copy_with_metadata(&metadata, specs).await
    }

    pub async fn copy_with_metadata(
        &self,
        metadata: &SchemaMetadata,
        specs: &[TableSpec],
    ) -> Result<CopyReport> {
        let plan = plan_copy(metadata, specs, &self.config)?;
        self.execute(plan).await
    }

    /// Run a prepared plan under one source snapshot
    pub async fn execute(&self, plan: CopyPlan) -> Result<CopyReport> {
        let started_at = Utc::now();
        let CopyPlan { levels, groups } = plan;

        let snapshot = SourceSnapshot::export(&self.source).await?;
        let result = self.run_levels(groups, snapshot.token()).await;
        snapshot.release().await;
        let tables = result?;

        let report = CopyReport {
            started_at,
            finished_at: Utc::now(),
            levels: levels.groups().to_vec(),
            skipped: levels.unresolved().to_vec(),
            tables,
        };
        info!(
            tables = report.tables.len(),
            rows_submitted = report.total_rows_submitted(),
            rows_affected = report.total_rows_affected(),
            "Copy finished"
        );
        Ok(report)
    }

    /// Tables of one level copied at once. Each copy holds one connection of
    /// each pool, so without `max_parallel_tables` the smaller pool decides.
    fn parallel_tables(&self) -> usize {
        table_parallelism(
            self.config.max_parallel_tables,
            self.source.options().get_max_connections(),
            self.target.options().get_max_connections(),
        )
    }

    async fn run_levels(
        &self,
        groups: Vec<Vec<TablePlan>>,
        snapshot: &str,
    ) -> Result<BTreeMap<TableName, TableCopyStats>> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let parallelism = self.parallel_tables();
        let task = TableTask {
            source: &self.source,
            target: &self.target,
            snapshot,
            stop: stop_rx,
            permits: Semaphore::new(parallelism),
            progress_interval: self.config.progress_interval,
        };
        let task = &task;

        let mut stats = BTreeMap::new();
        for (level, group) in groups.iter().enumerate() {
            info!(
                level,
                parallelism,
                tables = %group.iter().map(|p| p.source.to_string()).collect::<Vec<_>>().join(", "),
                "Starting level"
            );

            let mut running: FuturesUnordered<_> = group
                .iter()
                .map(|plan| async move { (&plan.source, task.run(plan).await) })
                .collect();

            let mut first_error: Option<CopyError> = None;
            while let Some((table, result)) = running.next().await {
                let failure = match result {
                    Ok(table_stats) => {
                        stats.insert(table.clone(), table_stats);
                        continue;
                    }
                    Err(e) => CopyError::table(table.to_string(), e),
                };
                if failure.is_cancelled() || first_error.is_some() {
                    continue;
                }
                warn!(error = %failure, "Table copy failed, stopping the remaining copies");
                stop_tx.send_replace(true);
                first_error = Some(failure);
            }

            if let Some(e) = first_error {
                return Err(e);
            }
        }

        Ok(stats)
    }
}

fn table_parallelism(configured: Option<usize>, source_pool: u32, target_pool: u32) -> usize {
    configured
        .unwrap_or_else(|| source_pool.min(target_pool) as usize)
        .max(1)
}

/// What one table copy shares with its siblings
struct TableTask<'a> {
    source: &'a PgPool,
    target: &'a PgPool,
    snapshot: &'a str,
    stop: watch::Receiver<bool>,
    permits: Semaphore,
    progress_interval: Duration,
}

impl TableTask<'_> {
    async fn run(&self, plan: &TablePlan) -> Result<TableCopyStats> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| CopyError::Task(e.to_string()))?;
        if *self.stop.borrow() {
            return Err(CopyError::Cancelled);
        }

        let deferrer = ConstraintDeferrer::new(self.target.clone(), plan.target.clone());
        let action = CopyAction::new(plan, self.source, self.target)
            .with_snapshot(self.snapshot)
            .with_progress_interval(self.progress_interval)
            .with_stop_signal(self.stop.clone());
        deferrer.with_deferred(action.run()).await
    }
}
