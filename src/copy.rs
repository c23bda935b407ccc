//! Streaming copy of one table
//!
//! A [`TablePlan`] is a [`TableSpec`] resolved against the schema metadata:
//! column types, effective filter and every statement the copy runs.
//! [`CopyAction`] executes a plan. It reads the source through a server-side
//! cursor inside a repeatable-read transaction that imports the shared
//! snapshot, and writes the target in batched multi-row INSERTs inside one
//! transaction, committed at the end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde::de::IgnoredAny;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{CopyError, Result};
use crate::output::OutputColumn;
use crate::schema::SchemaMetadata;
use crate::sql::dml::DmlGenerator;
use crate::sql::sanitize::quote_literal;
use crate::sql::where_clause::{WhereClause, and_opt};
use crate::table::{ConflictTarget, TableSpec};
use crate::types::{ColumnType, ColumnValue, RowLayout, SourceRow, TableName};

/// PostgreSQL accepts at most this many bind parameters per statement
const MAX_BIND_PARAMS: usize = 65_535;

/// Column that orders limited copies, newest first
const ORDER_COLUMN: &str = "id";

/// Outcome of one table copy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TableCopyStats {
    /// Rows read from the source and sent to the target
    pub rows_submitted: u64,
    /// Rows the target reported as inserted or updated
    pub rows_affected: u64,
    pub elapsed: Duration,
}

// ============================================================================
// Plan
// ============================================================================

/// Options applied while resolving a [`TableSpec`]
#[derive(Debug, Clone, Default)]
pub struct PlanOptions<'a> {
    pub default_batch_size: usize,
    pub target_schema: Option<&'a str>,
    pub sync_sequences: bool,
}

/// A table copy with every statement prepared
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub source: TableName,
    pub target: TableName,
    pub columns: Vec<OutputColumn>,
    pub layout: Arc<RowLayout>,
    pub filter: Option<WhereClause>,
    pub batch_size: usize,
    pub select_sql: String,
    pub insert_prefix: String,
    pub conflict_clause: String,
    /// `CAST` closers, one per column
    casts: Vec<String>,
    /// Sequence adjustments run after the copy commits
    pub sequence_sql: Vec<String>,
}

impl TablePlan {
    /// Resolve `spec` against `metadata`; `propagated` is the clause derived
    /// from filtered parent tables
    pub fn resolve(
        spec: &TableSpec,
        metadata: &SchemaMetadata,
        propagated: Option<&WhereClause>,
        options: &PlanOptions<'_>,
    ) -> Result<Self> {
        let columns = spec.effective_columns(metadata);

        let mut typed: Vec<(String, ColumnType)> = Vec::with_capacity(columns.len());
        let mut unknown = Vec::new();
        for column in &columns {
            match metadata.column_type(&spec.table, column.name()) {
                Some(ty) => typed.push((column.name().to_string(), ty.clone())),
                None => unknown.push(format!("Unknown column {}.{}", spec.table, column.name())),
            }
        }
        if !unknown.is_empty() {
            return Err(CopyError::Configuration(unknown));
        }

        let target = match options.target_schema {
            Some(schema) => spec.table.in_schema(schema),
            None => spec.table.clone(),
        };
        let filter = and_opt(spec.filter.as_ref(), propagated);
        let batch_size = spec.batch_size.unwrap_or(options.default_batch_size).max(1);
        let order_by = metadata
            .column_type(&spec.table, ORDER_COLUMN)
            .map(|_| ORDER_COLUMN);

        let dml = DmlGenerator::new(&spec.table, &target, &typed);
        let select_sql = dml.generate_select(filter.as_ref(), spec.limit, order_by);
        let insert_prefix = dml.generate_insert_prefix();
        let constraint_columns = match spec.on_conflict.as_ref().map(|c| &c.target) {
            Some(ConflictTarget::Constraint(name)) => metadata.constraint_columns(&spec.table, name),
            _ => None,
        };
        let conflict_clause = dml.generate_on_conflict(
            spec.on_conflict.as_ref(),
            metadata.primary_key(&spec.table),
            constraint_columns,
        )?;
        let sequence_sql = if options.sync_sequences {
            metadata
                .sequence_columns(&spec.table)
                .iter()
                .filter(|col| typed.iter().any(|(name, _)| name == *col))
                .map(|col| dml.generate_sequence_sync(col))
                .collect()
        } else {
            Vec::new()
        };
        let casts = typed
            .iter()
            .map(|(_, ty)| DmlGenerator::cast_suffix(ty))
            .collect();

        Ok(Self {
            source: spec.table.clone(),
            target,
            columns,
            layout: Arc::new(RowLayout::new(typed)),
            filter,
            batch_size,
            select_sql,
            insert_prefix,
            conflict_clause,
            casts,
            sequence_sql,
        })
    }

    /// Largest number of rows one INSERT can carry
    fn rows_per_statement(&self) -> usize {
        (MAX_BIND_PARAMS / self.layout.len().max(1)).max(1)
    }

    fn writers(&self) -> Vec<ColumnWriter<'_>> {
        self.columns
            .iter()
            .zip(self.layout.types())
            .enumerate()
            .map(|(index, (column, ty))| ColumnWriter {
                table: &self.source,
                column,
                index,
                // passthrough values came out of a JSON column already
                check_json: ty.is_json() && !matches!(column, OutputColumn::Source(_)),
            })
            .collect()
    }
}

// ============================================================================
// Value encoding
// ============================================================================

/// Text bound for one column and cast back to the column type by the INSERT.
/// JSON columns take the same path, so passthrough JSON keeps its exact text.
type BindValue = Option<String>;

/// Output column paired with its position and target encoding
struct ColumnWriter<'a> {
    table: &'a TableName,
    column: &'a OutputColumn,
    index: usize,
    /// Output must parse as JSON before it is sent
    check_json: bool,
}

impl ColumnWriter<'_> {
    fn write(&self, row: &SourceRow) -> Result<BindValue> {
        let value = self.column.transform(row, self.index);
        encode(value, self.check_json).ok_or_else(|| CopyError::InvalidJson {
            table: self.table.to_string(),
            column: self.column.name().to_string(),
        })
    }
}

/// Text form of a value; `None` when `check_json` is set and the text does
/// not parse as JSON
fn encode(value: ColumnValue, check_json: bool) -> Option<BindValue> {
    match value {
        ColumnValue::Null => Some(None),
        ColumnValue::Json(v) => Some(Some(v.to_string())),
        ColumnValue::Text(s) if check_json => serde_json::from_str::<IgnoredAny>(&s)
            .ok()
            .map(|_| Some(s)),
        ColumnValue::Text(s) => Some(Some(s)),
    }
}

fn decode_row(layout: &Arc<RowLayout>, row: &PgRow) -> Result<SourceRow> {
    let texts = (0..layout.len())
        .map(|i| row.try_get::<Option<String>, _>(i))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(SourceRow::from_texts(Arc::clone(layout), texts))
}

// ============================================================================
// CopyAction
// ============================================================================

/// Runs one [`TablePlan`]
pub struct CopyAction<'a> {
    plan: &'a TablePlan,
    source: &'a PgPool,
    target: &'a PgPool,
    snapshot: Option<&'a str>,
    progress_interval: Duration,
    stop: Option<watch::Receiver<bool>>,
}

impl<'a> CopyAction<'a> {
    pub fn new(plan: &'a TablePlan, source: &'a PgPool, target: &'a PgPool) -> Self {
        Self {
            plan,
            source,
            target,
            snapshot: None,
            progress_interval: Duration::from_secs(10),
            stop: None,
        }
    }

    /// Read under an exported snapshot
    pub fn with_snapshot(mut self, token: &'a str) -> Self {
        self.snapshot = Some(token);
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Abandon the copy at the next batch boundary once `stop` turns true
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    fn stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(|stop| *stop.borrow())
    }

    pub async fn run(&self) -> Result<TableCopyStats> {
        let started = Instant::now();
        let plan = self.plan;

        let mut source_tx = self.source.begin().await?;
        sqlx::raw_sql("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *source_tx)
            .await?;
        if let Some(token) = self.snapshot {
            let sql = format!("SET TRANSACTION SNAPSHOT {}", quote_literal(token));
            sqlx::raw_sql(&sql).execute(&mut *source_tx).await?;
        }

        let total: i64 = sqlx::query_scalar(&DmlGenerator::generate_count(&plan.select_sql))
            .persistent(false)
            .fetch_one(&mut *source_tx)
            .await?;
        info!(
            table = %plan.source,
            target = %plan.target,
            total,
            batch_size = plan.batch_size,
            "Copying table"
        );
        debug!(table = %plan.source, sql = %plan.select_sql, "Source query");

        let declare = DmlGenerator::generate_declare_cursor(&plan.select_sql);
        sqlx::raw_sql(&declare).execute(&mut *source_tx).await?;

        let mut target_tx = self.target.begin().await?;
        let mut stats = match self.stream(&mut *source_tx, &mut *target_tx, total).await {
            Ok(stats) => stats,
            Err(e) => {
                // release the target locks before constraints are restored
                if let Err(rollback) = target_tx.rollback().await {
                    warn!(table = %plan.source, error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        };
        target_tx.commit().await?;
        source_tx.commit().await?;

        for sql in &plan.sequence_sql {
            sqlx::query(sql).persistent(false).execute(self.target).await?;
        }

        stats.elapsed = started.elapsed();
        info!(
            table = %plan.source,
            rows_submitted = stats.rows_submitted,
            rows_affected = stats.rows_affected,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "Finished table"
        );
        Ok(stats)
    }

    /// Fetch from the open cursor and insert until it is exhausted
    async fn stream(
        &self,
        source: &mut PgConnection,
        target: &mut PgConnection,
        total: i64,
    ) -> Result<TableCopyStats> {
        let plan = self.plan;
        let fetch = DmlGenerator::generate_fetch(plan.batch_size);
        let writers = plan.writers();
        let mut buffer: Vec<Vec<BindValue>> = Vec::with_capacity(plan.batch_size);
        let mut stats = TableCopyStats::default();
        let mut last_progress = Instant::now();

        loop {
            if self.stopped() {
                debug!(table = %plan.source, "Copy stopped after another table failed");
                return Err(CopyError::Cancelled);
            }

            let rows: Vec<PgRow> = sqlx::query(&fetch)
                .persistent(false)
                .fetch_all(&mut *source)
                .await?;
            let fetched = rows.len();

            for row in &rows {
                let source_row = decode_row(&plan.layout, row)?;
                let values = writers
                    .iter()
                    .map(|writer| writer.write(&source_row))
                    .collect::<Result<Vec<_>>>()?;
                buffer.push(values);
                if buffer.len() >= plan.batch_size {
                    self.flush(target, &mut buffer, &mut stats).await?;
                }
            }

            if last_progress.elapsed() >= self.progress_interval {
                info!(
                    table = %plan.source,
                    inserted = stats.rows_submitted,
                    total,
                    "Copy progress"
                );
                last_progress = Instant::now();
            }

            if fetched < plan.batch_size {
                break;
            }
        }

        self.flush(target, &mut buffer, &mut stats).await?;
        Ok(stats)
    }

    /// Insert everything buffered, split by the bind parameter limit
    async fn flush(
        &self,
        conn: &mut PgConnection,
        buffer: &mut Vec<Vec<BindValue>>,
        stats: &mut TableCopyStats,
    ) -> Result<()> {
        let plan = self.plan;
        let per_statement = plan.rows_per_statement();

        while !buffer.is_empty() {
            let take = buffer.len().min(per_statement);
            let chunk: Vec<Vec<BindValue>> = buffer.drain(..take).collect();

            let mut builder: QueryBuilder<'_, Postgres> = QueryBuilder::new(&plan.insert_prefix);
            builder.push_values(chunk, |mut row_builder, row| {
                for (value, cast) in row.into_iter().zip(&plan.casts) {
                    row_builder
                        .push("CAST(")
                        .push_bind_unseparated(value)
                        .push_unseparated(cast);
                }
            });
            builder.push(&plan.conflict_clause);

            let result = builder.build().execute(&mut *conn).await?;
            stats.rows_submitted += take as u64;
            stats.rows_affected += result.rows_affected();
        }

        Ok(())
    }
}
