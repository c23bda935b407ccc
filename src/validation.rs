//! Up-front checks of a copy request
//!
//! Every problem is collected so one error lists them all before any data
//! moves.

use std::collections::BTreeSet;

use crate::config::CopyConfig;
use crate::error::{CopyError, Result};
use crate::schema::SchemaMetadata;
use crate::table::{ConflictTarget, TableSpec};
use crate::types::TableName;

/// Check `specs` against `metadata`, returning every issue found
pub fn validate_specs(
    metadata: &SchemaMetadata,
    specs: &[TableSpec],
    config: &CopyConfig,
) -> Result<()> {
    let issues = collect_issues(metadata, specs, config.require_full_coverage);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(CopyError::Configuration(issues))
    }
}

fn collect_issues(
    metadata: &SchemaMetadata,
    specs: &[TableSpec],
    require_full_coverage: bool,
) -> Vec<String> {
    let mut issues = Vec::new();
    let mut seen: BTreeSet<&TableName> = BTreeSet::new();

    for spec in specs {
        let table = &spec.table;
        if !seen.insert(table) {
            issues.push(format!("Table {} has more than one copy spec", table));
            continue;
        }
        let Some(known) = metadata.columns(table) else {
            issues.push(format!("Unknown table {}", table));
            continue;
        };

        let columns = spec.effective_columns(metadata);
        if columns.is_empty() {
            issues.push(format!("No columns listed for {}", table));
        }

        let mut listed: BTreeSet<&str> = BTreeSet::new();
        for column in &columns {
            let name = column.name();
            if !known.iter().any(|(k, _)| k == name) {
                issues.push(format!("Unknown column {}.{}", table, name));
            }
            if !listed.insert(name) {
                issues.push(format!("Column {}.{} is listed more than once", table, name));
            }
        }

        if spec.batch_size == Some(0) {
            issues.push(format!("Batch size for {} must be positive", table));
        }

        if let Some(on_conflict) = &spec.on_conflict {
            if matches!(on_conflict.target, ConflictTarget::PrimaryKey)
                && metadata.primary_key(table).is_empty()
            {
                issues.push(format!(
                    "ON CONFLICT uses the primary key of {}, which has none",
                    table
                ));
            }
        }

        if require_full_coverage {
            for (name, _) in known {
                if !listed.contains(name.as_str()) {
                    issues.push(format!("Column {}.{} is not copied", table, name));
                }
            }
        }
    }

    if require_full_coverage {
        for table in metadata.tables() {
            if !seen.contains(table) {
                issues.push(format!("Table {} has no copy spec", table));
            }
        }
    }

    issues
}
