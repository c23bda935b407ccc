//! Temporary deferral of self-referencing foreign keys
//!
//! Rows of one table may reference each other in any order within a copy, so
//! each self-referencing constraint on the target table is made
//! `DEFERRABLE INITIALLY DEFERRED` for the copy and put back afterwards.

use std::future::Future;

use sqlx::PgPool;
use tracing::{debug, warn};

use crate::error::{CopyError, Result};
use crate::sql::sanitize::quote_identifier;
use crate::types::TableName;

/// Deferrability of a constraint as stored in `pg_constraint`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferrability {
    NotDeferrable,
    InitiallyImmediate,
    InitiallyDeferred,
}

impl Deferrability {
    pub fn from_flags(deferrable: bool, deferred: bool) -> Self {
        match (deferrable, deferred) {
            (false, _) => Deferrability::NotDeferrable,
            (true, false) => Deferrability::InitiallyImmediate,
            (true, true) => Deferrability::InitiallyDeferred,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Deferrability::NotDeferrable => "NOT DEFERRABLE",
            Deferrability::InitiallyImmediate => "DEFERRABLE INITIALLY IMMEDIATE",
            Deferrability::InitiallyDeferred => "DEFERRABLE INITIALLY DEFERRED",
        }
    }
}

/// A self-referencing foreign key and its state before the copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfRefConstraint {
    pub name: String,
    pub original: Deferrability,
}

/// `ALTER TABLE t ALTER CONSTRAINT c <state>`
pub fn alter_constraint_sql(table: &TableName, constraint: &str, state: Deferrability) -> String {
    format!(
        "ALTER TABLE {} ALTER CONSTRAINT {} {}",
        table.quoted(),
        quote_identifier(constraint),
        state.as_sql()
    )
}

/// Defers and restores the self-referencing constraints of one target table
pub struct ConstraintDeferrer {
    pool: PgPool,
    table: TableName,
}

impl ConstraintDeferrer {
    pub fn new(pool: PgPool, table: TableName) -> Self {
        Self { pool, table }
    }

    /// Foreign keys of the table that point back at the table itself
    pub async fn self_ref_constraints(&self) -> Result<Vec<SelfRefConstraint>> {
        let rows: Vec<(String, bool, bool)> = sqlx::query_as(
            r#"
            SELECT con.conname::text, con.condeferrable, con.condeferred
            FROM pg_constraint con
            WHERE con.contype = 'f'
              AND con.conrelid = $1::regclass
              AND con.confrelid = con.conrelid
            ORDER BY con.conname
            "#,
        )
        .bind(self.table.quoted())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, deferrable, deferred)| SelfRefConstraint {
                name,
                original: Deferrability::from_flags(deferrable, deferred),
            })
            .collect())
    }

    /// Make every self-referencing constraint deferred.
    ///
    /// Returns the constraints that were changed. If one ALTER fails, those
    /// already changed are restored before the error is returned.
    pub async fn defer(&self) -> Result<Vec<SelfRefConstraint>> {
        let mut altered = Vec::new();

        for constraint in self.self_ref_constraints().await? {
            if constraint.original == Deferrability::InitiallyDeferred {
                continue;
            }
            let sql = alter_constraint_sql(
                &self.table,
                &constraint.name,
                Deferrability::InitiallyDeferred,
            );
            if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
                self.restore(&altered).await;
                return Err(CopyError::UnsupportedEngine {
                    table: self.table.to_string(),
                    constraint: constraint.name,
                    source: e,
                });
            }
            debug!(
                table = %self.table,
                constraint = %constraint.name,
                "Deferred self-referencing constraint"
            );
            altered.push(constraint);
        }

        Ok(altered)
    }

    /// Put constraints back to their original state. Failures are logged.
    pub async fn restore(&self, constraints: &[SelfRefConstraint]) {
        for constraint in constraints {
            let sql = alter_constraint_sql(&self.table, &constraint.name, constraint.original);
            match sqlx::query(&sql).execute(&self.pool).await {
                Ok(_) => debug!(
                    table = %self.table,
                    constraint = %constraint.name,
                    state = constraint.original.as_sql(),
                    "Restored constraint"
                ),
                Err(e) => warn!(
                    table = %self.table,
                    constraint = %constraint.name,
                    error = %e,
                    "Failed to restore constraint"
                ),
            }
        }
    }

    /// Run `copy` with the constraints deferred, restoring them whatever the
    /// outcome
    pub async fn with_deferred<F, T>(&self, copy: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let altered = self.defer().await?;
        let result = copy.await;
        self.restore(&altered).await;
        result
    }
}
