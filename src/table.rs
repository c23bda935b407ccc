//! Per-table copy requests
//!
//! A [`TableSpec`] names a table, the ordered output columns, and optional
//! filter, limit, batch size and conflict policy.

use std::collections::BTreeSet;

use crate::error::{CopyError, Result};
use crate::output::{Lens, OutputColumn};
use crate::schema::SchemaMetadata;
use crate::sql::where_clause::WhereClause;
use crate::types::{ColumnType, SourceRow, TableName};

// ============================================================================
// Conflict policy
// ============================================================================

/// What an insert conflicts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictTarget {
    /// The table's primary key columns
    PrimaryKey,
    Columns(Vec<String>),
    /// A named unique or exclusion constraint
    Constraint(String),
}

/// What happens to a conflicting row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictAction {
    DoNothing,
    /// Overwrite the listed columns, or every column outside the target when `None`
    DoUpdate(Option<Vec<String>>),
}

/// `ON CONFLICT` clause for the target insert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnConflict {
    pub target: ConflictTarget,
    pub action: ConflictAction,
}

impl OnConflict {
    pub fn new(target: ConflictTarget, action: ConflictAction) -> Self {
        Self { target, action }
    }

    /// Skip rows whose primary key already exists
    pub fn do_nothing() -> Self {
        Self::new(ConflictTarget::PrimaryKey, ConflictAction::DoNothing)
    }

    /// Overwrite every non-key column of rows whose primary key already exists
    pub fn do_update() -> Self {
        Self::new(ConflictTarget::PrimaryKey, ConflictAction::DoUpdate(None))
    }
}

// ============================================================================
// TableSpec
// ============================================================================

/// Copy request for one table
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub table: TableName,
    /// Output columns; the SELECT and INSERT list exactly these, in order
    pub columns: Vec<OutputColumn>,
    pub filter: Option<WhereClause>,
    /// Copy at most this many rows (the highest `id`s when the table has one)
    pub limit: Option<u64>,
    /// Rows per fetch and per insert; the configured default when `None`
    pub batch_size: Option<usize>,
    pub on_conflict: Option<OnConflict>,
    /// Pass primary and foreign key columns through without listing them
    pub include_keys: bool,
}

impl TableSpec {
    pub fn new(table: impl Into<TableName>, columns: Vec<OutputColumn>) -> Self {
        Self {
            table: table.into(),
            columns,
            filter: None,
            limit: None,
            batch_size: None,
            on_conflict: None,
            include_keys: false,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<WhereClause>) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(&filter.into()),
            None => filter.into(),
        });
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_on_conflict(mut self, on_conflict: OnConflict) -> Self {
        self.on_conflict = Some(on_conflict);
        self
    }

    /// List only non-key columns; keys are passed through automatically
    pub fn with_keys(mut self) -> Self {
        self.include_keys = true;
        self
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(OutputColumn::name).collect()
    }

    /// Output columns with key columns prepended when `include_keys` is set.
    /// Keys already listed keep their listed definition.
    pub fn effective_columns(&self, metadata: &SchemaMetadata) -> Vec<OutputColumn> {
        if !self.include_keys {
            return self.columns.clone();
        }
        let listed: BTreeSet<&str> = self.column_names().into_iter().collect();
        let mut keys: Vec<String> = metadata.primary_key(&self.table).to_vec();
        for fk_col in metadata.foreign_key_columns(&self.table) {
            if !keys.contains(&fk_col) {
                keys.push(fk_col);
            }
        }

        keys.into_iter()
            .filter(|k| !listed.contains(k.as_str()))
            .map(OutputColumn::Source)
            .chain(self.columns.iter().cloned())
            .collect()
    }
}

// ============================================================================
// Validated builder
// ============================================================================

impl SchemaMetadata {
    /// Start a spec for `table`, checking column names as they are added
    pub fn table_spec(&self, table: impl Into<TableName>) -> Result<TableSpecBuilder> {
        let table = table.into();
        let known = self
            .columns(&table)
            .ok_or_else(|| CopyError::configuration(format!("Unknown table {}", table)))?
            .to_vec();
        Ok(TableSpecBuilder {
            spec: TableSpec::new(table, Vec::new()),
            known,
            unknown: Vec::new(),
        })
    }
}

/// Builds a [`TableSpec`] against the table's known columns
#[derive(Debug)]
pub struct TableSpecBuilder {
    spec: TableSpec,
    known: Vec<(String, ColumnType)>,
    unknown: Vec<String>,
}

impl TableSpecBuilder {
    fn push(mut self, column: OutputColumn) -> Self {
        if !self.known.iter().any(|(name, _)| name == column.name()) {
            self.unknown.push(column.name().to_string());
        }
        self.spec.columns.push(column);
        self
    }

    pub fn source(self, column: &str) -> Self {
        self.push(OutputColumn::source(column))
    }

    pub fn fixed(self, column: &str, value: Option<&str>) -> Self {
        self.push(OutputColumn::fixed(column, value))
    }

    pub fn transform<F>(self, column: &str, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.push(OutputColumn::transformed(column, f))
    }

    pub fn transform_with_row<F>(self, column: &str, f: F) -> Self
    where
        F: Fn(&SourceRow, &str) -> String + Send + Sync + 'static,
    {
        self.push(OutputColumn::transformed_with_row(column, f))
    }

    pub fn transform_nullable<F>(self, column: &str, f: F) -> Self
    where
        F: Fn(&SourceRow, Option<&str>) -> Option<String> + Send + Sync + 'static,
    {
        self.push(OutputColumn::transformed_nullable(column, f))
    }

    /// Transform the part of a JSON column focused by `lens`
    pub fn lens<F>(self, column: &str, lens: Lens, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.push(OutputColumn::transformed(column, f).with_lens(lens))
    }

    /// Pass through every known column not mentioned so far, in table order
    pub fn remaining_source(mut self) -> Self {
        let listed: BTreeSet<String> = self
            .spec
            .columns
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rest: Vec<String> = self
            .known
            .iter()
            .map(|(name, _)| name.clone())
            .filter(|name| !listed.contains(name))
            .collect();
        for name in rest {
            self.spec.columns.push(OutputColumn::Source(name));
        }
        self
    }

    pub fn filter(mut self, filter: impl Into<WhereClause>) -> Self {
        self.spec = self.spec.with_filter(filter);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.spec.batch_size = Some(batch_size);
        self
    }

    pub fn on_conflict(mut self, on_conflict: OnConflict) -> Self {
        self.spec.on_conflict = Some(on_conflict);
        self
    }

    pub fn include_keys(mut self) -> Self {
        self.spec.include_keys = true;
        self
    }

    /// Finish, failing with every unknown column at once
    pub fn build(self) -> Result<TableSpec> {
        if self.unknown.is_empty() {
            return Ok(self.spec);
        }
        Err(CopyError::Configuration(
            self.unknown
                .iter()
                .map(|c| format!("Unknown column {}.{}", self.spec.table, c))
                .collect(),
        ))
    }
}
