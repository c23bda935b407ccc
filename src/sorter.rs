//! Foreign-key dependency levels
//!
//! Level 0 holds tables that reference no other requested table. Every other
//! table sits one level above its deepest parent. Self-references and
//! references to tables outside the request are ignored. Tables in a cycle
//! get no level.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::warn;

use crate::schema::LogicalForeignKey;
use crate::types::TableName;

/// Result of leveling a set of tables
#[derive(Debug, Clone, Default, Serialize)]
pub struct TableLevels {
    levels: BTreeMap<TableName, usize>,
    groups: Vec<Vec<TableName>>,
    unresolved: Vec<TableName>,
}

impl TableLevels {
    pub fn level(&self, table: &TableName) -> Option<usize> {
        self.levels.get(table).copied()
    }

    /// Tables grouped by ascending level, alphabetical within a level
    pub fn groups(&self) -> &[Vec<TableName>] {
        &self.groups
    }

    /// Every leveled table, level by level
    pub fn ordered(&self) -> impl Iterator<Item = &TableName> {
        self.groups.iter().flatten()
    }

    /// Tables caught in a foreign-key cycle, alphabetical
    pub fn unresolved(&self) -> &[TableName] {
        &self.unresolved
    }
}

/// Compute dependency levels for `tables`
pub fn sort_tables<'a>(
    tables: impl IntoIterator<Item = &'a TableName>,
    foreign_keys: &[LogicalForeignKey],
) -> TableLevels {
    let requested: BTreeSet<&TableName> = tables.into_iter().collect();

    let mut depends_on: BTreeMap<&TableName, BTreeSet<&TableName>> =
        requested.iter().map(|t| (*t, BTreeSet::new())).collect();
    for fk in foreign_keys {
        if fk.is_self_ref() || !requested.contains(&fk.parent) {
            continue;
        }
        if let Some(parents) = depends_on.get_mut(&fk.child) {
            parents.insert(&fk.parent);
        }
    }

    let mut levels: BTreeMap<TableName, usize> = BTreeMap::new();
    loop {
        let mut progressed = false;
        for (table, parents) in &depends_on {
            if levels.contains_key(*table) {
                continue;
            }
            let parent_levels: Option<Vec<usize>> =
                parents.iter().map(|p| levels.get(*p).copied()).collect();
            if let Some(parent_levels) = parent_levels {
                let level = parent_levels.into_iter().max().map_or(0, |m| m + 1);
                levels.insert((*table).clone(), level);
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    let unresolved: Vec<TableName> = requested
        .iter()
        .filter(|t| !levels.contains_key(**t))
        .map(|t| (*t).clone())
        .collect();
    if !unresolved.is_empty() {
        warn!(
            tables = %unresolved.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            "Tables with circular foreign keys received no level"
        );
    }

    TableLevels {
        groups: group_by_level(&levels),
        levels,
        unresolved,
    }
}

fn group_by_level(levels: &BTreeMap<TableName, usize>) -> Vec<Vec<TableName>> {
    let depth = levels.values().max().map_or(0, |m| m + 1);
    let mut groups = vec![Vec::new(); depth];
    // BTreeMap iteration keeps each group alphabetical
    for (table, level) in levels {
        groups[*level].push(table.clone());
    }
    groups.retain(|g| !g.is_empty());
    groups
}
