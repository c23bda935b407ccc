//! Error types for copy operations

use thiserror::Error;

/// Errors that can occur while planning or running a copy
#[derive(Debug, Error)]
pub enum CopyError {
    /// Problems found before any data moved. Every issue is listed, one per line.
    #[error("Configuration error:\n  {}", .0.join("\n  "))]
    Configuration(Vec<String>),

    #[error("Circular foreign keys between tables: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error(
        "Cannot make constraint {constraint} on {table} deferrable (ALTER CONSTRAINT requires PostgreSQL 9.4 or newer): {source}"
    )]
    UnsupportedEngine {
        table: String,
        constraint: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Column {column} of {table} is JSON but the written value is not valid JSON")]
    InvalidJson { table: String, column: String },

    #[error("Copy failed for table {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: Box<CopyError>,
    },

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Copy cancelled after another table failed")]
    Cancelled,

    #[error("Copy task failed: {0}")]
    Task(String),
}

impl CopyError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(vec![msg.into()])
    }

    /// Attach table context, leaving cancellations and already-wrapped errors alone
    pub fn table(table: impl Into<String>, source: CopyError) -> Self {
        match source {
            CopyError::Cancelled | CopyError::Table { .. } => source,
            other => Self::Table {
                table: table.into(),
                source: Box::new(other),
            },
        }
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CopyError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, CopyError>;
