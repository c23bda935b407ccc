//! Schema metadata
//!
//! The copy engine reads tables, keys and column types through the
//! [`SchemaMetadataProvider`] seam. [`SchemaMetadata`] is the explicit,
//! read-only snapshot of that information for one copy run.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use futures::future::try_join_all;
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;
use crate::types::{ColumnType, TableName};

// ============================================================================
// Foreign keys
// ============================================================================

/// One column pair of a foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    /// Constraint name
    pub name: String,
    pub child: TableName,
    pub child_column: String,
    pub parent: TableName,
    pub parent_column: String,
    /// Position of this pair inside a composite key (1-based)
    pub position: i64,
}

impl ForeignKey {
    pub fn new(
        name: impl Into<String>,
        child: impl Into<TableName>,
        child_column: impl Into<String>,
        parent: impl Into<TableName>,
        parent_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            child: child.into(),
            child_column: child_column.into(),
            parent: parent.into(),
            parent_column: parent_column.into(),
            position: 1,
        }
    }

    pub fn at_position(mut self, position: i64) -> Self {
        self.position = position;
        self
    }
}

/// A whole (possibly composite) foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalForeignKey {
    pub name: String,
    pub child: TableName,
    pub parent: TableName,
    /// (child column, parent column) pairs in key order
    pub columns: Vec<(String, String)>,
}

impl LogicalForeignKey {
    pub fn is_self_ref(&self) -> bool {
        self.child == self.parent
    }

    pub fn child_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(c, _)| c.as_str()).collect()
    }

    pub fn parent_columns(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, p)| p.as_str()).collect()
    }
}

/// Group column pairs sharing a constraint name and table pair
pub fn group_foreign_keys(keys: &[ForeignKey]) -> Vec<LogicalForeignKey> {
    let mut grouped: BTreeMap<(TableName, String, TableName), Vec<&ForeignKey>> = BTreeMap::new();
    for fk in keys {
        grouped
            .entry((fk.child.clone(), fk.name.clone(), fk.parent.clone()))
            .or_default()
            .push(fk);
    }

    grouped
        .into_iter()
        .map(|((child, name, parent), mut pairs)| {
            pairs.sort_by_key(|fk| fk.position);
            LogicalForeignKey {
                name,
                child,
                parent,
                columns: pairs
                    .into_iter()
                    .map(|fk| (fk.child_column.clone(), fk.parent_column.clone()))
                    .collect(),
            }
        })
        .collect()
}

// ============================================================================
// Provider
// ============================================================================

/// Source of schema metadata
#[async_trait]
pub trait SchemaMetadataProvider: Send + Sync {
    async fn all_tables(&self) -> Result<Vec<TableName>>;

    /// One entry per column pair
    async fn all_foreign_keys(&self) -> Result<Vec<ForeignKey>>;

    /// Primary key columns per table, in key order
    async fn all_primary_keys(&self) -> Result<HashMap<TableName, Vec<String>>>;

    /// Columns of a table in definition order
    async fn column_types(&self, table: &TableName) -> Result<Vec<(String, ColumnType)>>;

    /// Columns whose default draws from a sequence (serial or identity)
    async fn sequence_columns(&self) -> Result<HashMap<TableName, Vec<String>>> {
        Ok(HashMap::new())
    }

    /// Columns of every primary key and unique constraint, by constraint name
    async fn key_constraints(&self) -> Result<HashMap<TableName, BTreeMap<String, Vec<String>>>> {
        Ok(HashMap::new())
    }
}

/// Metadata read from the PostgreSQL catalog
pub struct PgMetadataProvider {
    pool: PgPool,
    schemas: Vec<String>,
}

impl PgMetadataProvider {
    pub fn new(pool: PgPool, schemas: Vec<String>) -> Self {
        Self { pool, schemas }
    }
}

#[async_trait]
impl SchemaMetadataProvider for PgMetadataProvider {
    async fn all_tables(&self) -> Result<Vec<TableName>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT n.nspname::text, c.relname::text
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p')
              AND NOT c.relispartition
              AND n.nspname = ANY($1)
            ORDER BY 1, 2
            "#,
        )
        .bind(self.schemas.clone())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(schema, name)| TableName::new(schema, name))
            .collect())
    }

    async fn all_foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let rows: Vec<(String, String, String, String, String, String, String, i64)> =
            sqlx::query_as(
                r#"
                SELECT con.conname::text,
                       cn.nspname::text, cc.relname::text, ca.attname::text,
                       pn.nspname::text, pc.relname::text, pa.attname::text,
                       k.ord::int8
                FROM pg_constraint con
                JOIN pg_class cc ON cc.oid = con.conrelid
                JOIN pg_namespace cn ON cn.oid = cc.relnamespace
                JOIN pg_class pc ON pc.oid = con.confrelid
                JOIN pg_namespace pn ON pn.oid = pc.relnamespace
                CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
                    WITH ORDINALITY AS k(child_attnum, parent_attnum, ord)
                JOIN pg_attribute ca ON ca.attrelid = con.conrelid AND ca.attnum = k.child_attnum
                JOIN pg_attribute pa ON pa.attrelid = con.confrelid AND pa.attnum = k.parent_attnum
                WHERE con.contype = 'f'
                  AND cn.nspname = ANY($1)
                ORDER BY 2, 3, 1, 8
                "#,
            )
            .bind(self.schemas.clone())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(name, c_schema, c_table, c_col, p_schema, p_table, p_col, ord)| ForeignKey {
                    name,
                    child: TableName::new(c_schema, c_table),
                    child_column: c_col,
                    parent: TableName::new(p_schema, p_table),
                    parent_column: p_col,
                    position: ord,
                },
            )
            .collect())
    }

    async fn all_primary_keys(&self) -> Result<HashMap<TableName, Vec<String>>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT n.nspname::text, c.relname::text, a.attname::text
            FROM pg_index i
            JOIN pg_class c ON c.oid = i.indrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            CROSS JOIN LATERAL unnest(i.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = i.indrelid AND a.attnum = k.attnum
            WHERE i.indisprimary
              AND n.nspname = ANY($1)
            ORDER BY 1, 2, k.ord
            "#,
        )
        .bind(self.schemas.clone())
        .fetch_all(&self.pool)
        .await?;

        let mut keys: HashMap<TableName, Vec<String>> = HashMap::new();
        for (schema, table, column) in rows {
            keys.entry(TableName::new(schema, table))
                .or_default()
                .push(column);
        }
        Ok(keys)
    }

    async fn column_types(&self, table: &TableName) -> Result<Vec<(String, ColumnType)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT a.attname::text, format_type(a.atttypid, a.atttypmod)
            FROM pg_attribute a
            WHERE a.attrelid = $1::regclass
              AND a.attnum > 0
              AND NOT a.attisdropped
            ORDER BY a.attnum
            "#,
        )
        .bind(table.quoted())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(name, ty)| (name, ColumnType::new(ty)))
            .collect())
    }

    async fn sequence_columns(&self) -> Result<HashMap<TableName, Vec<String>>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT n.nspname::text, c.relname::text, a.attname::text
            FROM pg_attribute a
            JOIN pg_class c ON c.oid = a.attrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relkind IN ('r', 'p')
              AND n.nspname = ANY($1)
              AND a.attnum > 0
              AND NOT a.attisdropped
              AND pg_get_serial_sequence(
                    quote_ident(n.nspname) || '.' || quote_ident(c.relname),
                    a.attname
                  ) IS NOT NULL
            ORDER BY 1, 2, a.attnum
            "#,
        )
        .bind(self.schemas.clone())
        .fetch_all(&self.pool)
        .await?;

        let mut columns: HashMap<TableName, Vec<String>> = HashMap::new();
        for (schema, table, column) in rows {
            columns
                .entry(TableName::new(schema, table))
                .or_default()
                .push(column);
        }
        Ok(columns)
    }

    async fn key_constraints(&self) -> Result<HashMap<TableName, BTreeMap<String, Vec<String>>>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT n.nspname::text, c.relname::text, con.conname::text, a.attname::text
            FROM pg_constraint con
            JOIN pg_class c ON c.oid = con.conrelid
            JOIN pg_namespace n ON n.oid = c.relnamespace
            CROSS JOIN LATERAL unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
            JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
            WHERE con.contype IN ('p', 'u')
              AND n.nspname = ANY($1)
            ORDER BY 1, 2, 3, k.ord
            "#,
        )
        .bind(self.schemas.clone())
        .fetch_all(&self.pool)
        .await?;

        let mut constraints: HashMap<TableName, BTreeMap<String, Vec<String>>> = HashMap::new();
        for (schema, table, name, column) in rows {
            constraints
                .entry(TableName::new(schema, table))
                .or_default()
                .entry(name)
                .or_default()
                .push(column);
        }
        Ok(constraints)
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Read-only metadata for one copy run
#[derive(Debug, Clone, Default)]
pub struct SchemaMetadata {
    tables: BTreeSet<TableName>,
    foreign_keys: Vec<LogicalForeignKey>,
    primary_keys: HashMap<TableName, Vec<String>>,
    columns: HashMap<TableName, Vec<(String, ColumnType)>>,
    sequences: HashMap<TableName, Vec<String>>,
    constraints: HashMap<TableName, BTreeMap<String, Vec<String>>>,
}

impl SchemaMetadata {
    /// Fetch everything once from a provider
    pub async fn load(provider: &dyn SchemaMetadataProvider) -> Result<Self> {
        let tables = provider.all_tables().await?;
        let foreign_keys = provider.all_foreign_keys().await?;
        let primary_keys = provider.all_primary_keys().await?;
        let sequences = provider.sequence_columns().await?;
        let constraints = provider.key_constraints().await?;

        let column_types =
            try_join_all(tables.iter().map(|table| provider.column_types(table))).await?;
        let columns: HashMap<TableName, Vec<(String, ColumnType)>> =
            tables.iter().cloned().zip(column_types).collect();

        debug!(
            tables = tables.len(),
            foreign_keys = foreign_keys.len(),
            "Loaded schema metadata"
        );

        Ok(Self::new(tables, &foreign_keys, primary_keys, columns)
            .with_sequences(sequences)
            .with_constraints(constraints))
    }

    pub fn new(
        tables: impl IntoIterator<Item = TableName>,
        foreign_keys: &[ForeignKey],
        primary_keys: HashMap<TableName, Vec<String>>,
        columns: HashMap<TableName, Vec<(String, ColumnType)>>,
    ) -> Self {
        Self {
            tables: tables.into_iter().collect(),
            foreign_keys: group_foreign_keys(foreign_keys),
            primary_keys,
            columns,
            sequences: HashMap::new(),
            constraints: HashMap::new(),
        }
    }

    pub fn with_sequences(mut self, sequences: HashMap<TableName, Vec<String>>) -> Self {
        self.sequences = sequences;
        self
    }

    pub fn with_constraints(
        mut self,
        constraints: HashMap<TableName, BTreeMap<String, Vec<String>>>,
    ) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableName> {
        self.tables.iter()
    }

    pub fn contains(&self, table: &TableName) -> bool {
        self.tables.contains(table)
    }

    pub fn foreign_keys(&self) -> &[LogicalForeignKey] {
        &self.foreign_keys
    }

    /// Foreign keys declared on `table`
    pub fn foreign_keys_of<'a>(
        &'a self,
        table: &'a TableName,
    ) -> impl Iterator<Item = &'a LogicalForeignKey> + 'a {
        self.foreign_keys.iter().filter(move |fk| &fk.child == table)
    }

    pub fn primary_key(&self, table: &TableName) -> &[String] {
        self.primary_keys
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Child-side columns of every foreign key declared on `table`
    pub fn foreign_key_columns(&self, table: &TableName) -> BTreeSet<String> {
        self.foreign_keys_of(table)
            .flat_map(|fk| fk.columns.iter().map(|(c, _)| c.clone()))
            .collect()
    }

    pub fn columns(&self, table: &TableName) -> Option<&[(String, ColumnType)]> {
        self.columns.get(table).map(Vec::as_slice)
    }

    pub fn column_type(&self, table: &TableName, column: &str) -> Option<&ColumnType> {
        self.columns(table)?
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, ty)| ty)
    }

    pub fn sequence_columns(&self, table: &TableName) -> &[String] {
        self.sequences
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Columns of the primary key or unique constraint `name` on `table`
    pub fn constraint_columns(&self, table: &TableName, name: &str) -> Option<&[String]> {
        self.constraints
            .get(table)?
            .get(name)
            .map(Vec::as_slice)
    }
}
