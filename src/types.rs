//! Core type definitions
//!
//! Table names, column types, and the connection-independent row values
//! carried from the source read to the target write.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::sql::sanitize::quote_identifier;

/// Schema used for names given without one
pub const DEFAULT_SCHEMA: &str = "public";

// ============================================================================
// Table names
// ============================================================================

/// Schema-qualified table name. Identity is the (schema, name) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parse `schema.table` or `table` (which lands in `public`).
    ///
    /// Only the first dot splits; use [`TableName::new`] for names that contain dots.
    pub fn parse(qualified: &str) -> Self {
        match qualified.split_once('.') {
            Some((schema, name)) => Self::new(schema, name),
            None => Self::new(DEFAULT_SCHEMA, qualified),
        }
    }

    /// The same table name in another schema
    pub fn in_schema(&self, schema: impl Into<String>) -> Self {
        Self::new(schema, self.name.clone())
    }

    /// `"schema"."name"`, safe to splice into SQL
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl From<&str> for TableName {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for TableName {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl Serialize for TableName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ============================================================================
// Column types
// ============================================================================

/// Broad classification of a column type, as far as copying cares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Json,
    Jsonb,
    Array,
    Scalar,
}

/// Database type of a column as rendered by `format_type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType {
    /// Type name usable in a cast, e.g. `character varying(64)` or `integer[]`
    pub sql_type: String,
    pub kind: TypeKind,
}

impl ColumnType {
    pub fn new(sql_type: impl Into<String>) -> Self {
        let sql_type = sql_type.into();
        let kind = match sql_type.as_str() {
            "json" => TypeKind::Json,
            "jsonb" => TypeKind::Jsonb,
            t if t.ends_with("[]") => TypeKind::Array,
            _ => TypeKind::Scalar,
        };
        Self { sql_type, kind }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.kind, TypeKind::Json | TypeKind::Jsonb)
    }
}

// ============================================================================
// Row values
// ============================================================================

/// A column value detached from the source connection
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    /// Text form of a value, cast back to the column type on write
    Text(String),
    /// JSON value built by the caller, serialized on write
    Json(serde_json::Value),
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

/// Column names, positions, and types shared by every row of one table copy
#[derive(Debug)]
pub struct RowLayout {
    names: Vec<String>,
    types: Vec<ColumnType>,
    index: HashMap<String, usize>,
}

impl RowLayout {
    pub fn new(columns: Vec<(String, ColumnType)>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();
        let (names, types) = columns.into_iter().unzip();
        Self {
            names,
            types,
            index,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn types(&self) -> &[ColumnType] {
        &self.types
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One source row: the text form of every column as the source rendered it
#[derive(Debug, Clone)]
pub struct SourceRow {
    layout: Arc<RowLayout>,
    texts: Vec<Option<String>>,
}

impl SourceRow {
    /// Build a row from the text form of every column, in layout order
    pub fn from_texts(layout: Arc<RowLayout>, texts: Vec<Option<String>>) -> Self {
        Self { layout, texts }
    }

    /// String form of a column; `None` for SQL NULL or an unknown column
    pub fn get(&self, column: &str) -> Option<&str> {
        self.layout
            .position(column)
            .and_then(|i| self.texts[i].as_deref())
    }

    /// Parsed JSON of a column; `None` for NULL, unknown columns and text
    /// that is not JSON
    pub fn json(&self, column: &str) -> Option<serde_json::Value> {
        self.get(column)
            .and_then(|text| serde_json::from_str(text).ok())
    }

    pub fn text_at(&self, index: usize) -> Option<&str> {
        self.texts[index].as_deref()
    }

    pub fn layout(&self) -> &Arc<RowLayout> {
        &self.layout
    }
}
