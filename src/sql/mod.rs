//! SQL utilities for the copy engine
//!
//! Provides quoting, WHERE clause composition, filter propagation and
//! statement generation.

pub mod dml;
pub mod filter;
pub mod sanitize;
pub mod where_clause;

pub use dml::DmlGenerator;
pub use filter::propagate_filters;
pub use sanitize::{column_tuple, quote_column_list, quote_identifier, quote_literal};
pub use where_clause::{WhereClause, and_opt};
