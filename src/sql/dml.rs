//! Statement generation for one table copy
//!
//! Generates the source SELECT/COUNT/cursor statements and the target INSERT
//! with its optional ON CONFLICT clause.

use crate::error::{CopyError, Result};
use crate::sql::sanitize::{quote_column_list, quote_identifier, quote_literal};
use crate::sql::where_clause::WhereClause;
use crate::table::{ConflictAction, ConflictTarget, OnConflict};
use crate::types::{ColumnType, TableName};

/// Name of the server-side cursor used for streaming reads
pub const CURSOR_NAME: &str = "__subset_copy_cursor";

/// Statement generator for one table copy
pub struct DmlGenerator<'a> {
    source: &'a TableName,
    target: &'a TableName,
    columns: &'a [(String, ColumnType)],
}

impl<'a> DmlGenerator<'a> {
    /// `columns` are the output columns, in order, with their source types
    pub fn new(
        source: &'a TableName,
        target: &'a TableName,
        columns: &'a [(String, ColumnType)],
    ) -> Self {
        Self {
            source,
            target,
            columns,
        }
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Source query reading every output column as text.
    ///
    /// `order_by` is applied (descending) only together with a limit.
    pub fn generate_select(
        &self,
        filter: Option<&WhereClause>,
        limit: Option<u64>,
        order_by: Option<&str>,
    ) -> String {
        let select_list = self
            .columns
            .iter()
            .map(|(name, _)| format!("{}::text", quote_identifier(name)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("SELECT {} FROM {}", select_list, self.source.quoted());

        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.render());
        }

        if let Some(limit) = limit {
            if let Some(column) = order_by {
                // qualified so it cannot resolve to the text-cast output column
                sql.push_str(&format!(
                    " ORDER BY {}.{} DESC",
                    self.source.quoted(),
                    quote_identifier(column)
                ));
            }
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        sql
    }

    /// Row count of a generated select
    pub fn generate_count(select: &str) -> String {
        format!("SELECT COUNT(*) FROM ({}) AS \"__subset_count\"", select)
    }

    pub fn generate_declare_cursor(select: &str) -> String {
        format!(
            "DECLARE {} NO SCROLL CURSOR FOR {}",
            quote_identifier(CURSOR_NAME),
            select
        )
    }

    pub fn generate_fetch(batch_size: usize) -> String {
        format!(
            "FETCH FORWARD {} FROM {}",
            batch_size,
            quote_identifier(CURSOR_NAME)
        )
    }

    /// `INSERT INTO target (cols) ` ready for a VALUES list
    pub fn generate_insert_prefix(&self) -> String {
        format!(
            "INSERT INTO {} ({}) ",
            self.target.quoted(),
            quote_column_list(&self.column_names())
        )
    }

    /// Placeholder wrapper for one value: everything is bound as text and
    /// cast back to the column's type
    pub fn cast_suffix(column_type: &ColumnType) -> String {
        format!(" AS {})", column_type.sql_type)
    }

    /// Trailing `ON CONFLICT` clause, or an empty string.
    ///
    /// `constraint_columns` are the columns of a named conflict constraint;
    /// the default `DO UPDATE` leaves them alone. An unknown constraint
    /// updates every column.
    pub fn generate_on_conflict(
        &self,
        on_conflict: Option<&OnConflict>,
        primary_key: &[String],
        constraint_columns: Option<&[String]>,
    ) -> Result<String> {
        let Some(on_conflict) = on_conflict else {
            return Ok(String::new());
        };

        let (target_sql, target_columns): (String, Vec<String>) = match &on_conflict.target {
            ConflictTarget::PrimaryKey => {
                if primary_key.is_empty() {
                    return Err(CopyError::configuration(format!(
                        "ON CONFLICT on the primary key of {}, which has none",
                        self.source
                    )));
                }
                (
                    format!("({})", quote_column_list(primary_key)),
                    primary_key.to_vec(),
                )
            }
            ConflictTarget::Columns(columns) => {
                (format!("({})", quote_column_list(columns)), columns.clone())
            }
            ConflictTarget::Constraint(name) => (
                format!("ON CONSTRAINT {}", quote_identifier(name)),
                constraint_columns.map(<[String]>::to_vec).unwrap_or_default(),
            ),
        };

        let action = match &on_conflict.action {
            ConflictAction::DoNothing => "DO NOTHING".to_string(),
            ConflictAction::DoUpdate(columns) => {
                let update: Vec<String> = match columns {
                    Some(columns) => columns.clone(),
                    None => self
                        .column_names()
                        .into_iter()
                        .filter(|c| !target_columns.iter().any(|t| t == c))
                        .map(str::to_string)
                        .collect(),
                };
                if update.is_empty() {
                    // every column is part of the target, nothing to overwrite
                    "DO NOTHING".to_string()
                } else {
                    let sets = update
                        .iter()
                        .map(|c| {
                            let q = quote_identifier(c);
                            format!("{} = EXCLUDED.{}", q, q)
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("DO UPDATE SET {}", sets)
                }
            }
        };

        Ok(format!(" ON CONFLICT {} {}", target_sql, action))
    }

    /// Advance the sequence behind `column` to the column's current maximum
    pub fn generate_sequence_sync(&self, column: &str) -> String {
        let quoted_column = quote_identifier(column);
        format!(
            "SELECT setval(pg_get_serial_sequence({}, {}), MAX({})) FROM {} HAVING MAX({}) IS NOT NULL",
            quote_literal(&self.target.quoted()),
            quote_literal(column),
            quoted_column,
            self.target.quoted(),
            quoted_column
        )
    }
}
