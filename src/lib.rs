//! # pg-subset-copy
//!
//! Foreign-key ordered, snapshot-consistent copying of PostgreSQL data.
//!
//! This crate copies rows from a source database into a target database whose
//! tables already exist. Tables are copied in foreign-key order, rows can be
//! subset with filters that follow foreign keys down to dependent tables, and
//! column values can be rewritten on the way (for example to anonymize PII).
//!
//! ## Features
//!
//! - **Dependency Levels**: Tables are grouped into levels; a level starts only
//!   after every parent level has committed
//! - **Filter Propagation**: A filter on a parent table restricts its children
//!   through `IN` subqueries, including recursive closure over self-references
//! - **Column Transforms**: Pass through, replace with a constant, or transform
//!   a value, optionally focused on a field inside a JSON column
//! - **Consistent Reads**: Every table reads the same exported snapshot
//! - **Self-Referencing Tables**: Self-referencing foreign keys are deferred for
//!   the copy and restored afterwards
//! - **Conflict Handling**: Optional `ON CONFLICT DO NOTHING` / `DO UPDATE`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pg_subset_copy::{CopyConfig, DataCopier, Lens};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CopyConfig::builder("postgres://localhost/prod", "postgres://localhost/staging")
//!         .max_parallel_tables(4)
//!         .build();
//!     let copier = DataCopier::connect(config).await?;
//!     let metadata = copier.load_metadata().await?;
//!
//!     let specs = vec![
//!         // Active users, with e-mail addresses replaced
//!         metadata
//!             .table_spec("users")?
//!             .filter("active")
//!             .transform("email", |email| format!("user-{}@example.com", email.len()))
//!             .lens("profile", Lens::field("phone"), |_| "000".to_string())
//!             .remaining_source()
//!             .build()?,
//!         // Only the orders of the copied users; the users filter follows the
//!         // foreign key. A `limit` would not.
//!         metadata.table_spec("orders")?.remaining_source().build()?,
//!     ];
//!
//!     let report = copier.copy_with_metadata(&metadata, &specs).await?;
//!     println!("copied {} rows", report.total_rows_submitted());
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The copier is configured using `CopyConfig`:
//!
//! ```rust
//! use pg_subset_copy::CopyConfig;
//!
//! let config = CopyConfig::builder("postgres://localhost/src", "postgres://localhost/dst")
//!     .max_connections(10)        // Per pool; also bounds tables copied at once
//!     .default_batch_size(1000)   // Rows per fetch and per INSERT
//!     .schemas(["public"])        // Schemas read from the source catalog
//!     .skip_cyclic_tables(false)  // Fail on circular foreign keys
//!     .build();
//! ```
//!
//! The target tables must already exist with compatible columns. Already
//! committed tables are not rolled back when a later table fails.

pub mod config;
pub mod constraints;
pub mod copier;
pub mod copy;
pub mod error;
pub mod output;
pub mod schema;
pub mod snapshot;
pub mod sorter;
pub mod sql;
pub mod table;
pub mod types;
pub mod validation;

// Re-export main types for convenience
pub use config::{CopyConfig, CopyConfigBuilder};
pub use copier::{CopyPlan, CopyReport, DataCopier, plan_copy};
pub use copy::{CopyAction, TableCopyStats, TablePlan};
pub use error::{CopyError, Result};
pub use output::{Lens, OutputColumn};
pub use schema::{
    ForeignKey, LogicalForeignKey, PgMetadataProvider, SchemaMetadata, SchemaMetadataProvider,
};
pub use sorter::{TableLevels, sort_tables};
pub use table::{ConflictAction, ConflictTarget, OnConflict, TableSpec, TableSpecBuilder};
pub use types::{ColumnType, ColumnValue, SourceRow, TableName};

// Re-export SQL utilities for advanced users
pub use sql::filter::propagate_filters;
pub use sql::sanitize::quote_identifier;
pub use sql::where_clause::WhereClause;
