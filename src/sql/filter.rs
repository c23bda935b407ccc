//! Filter propagation along foreign keys
//!
//! A table whose parent is filtered only receives rows that reference a
//! surviving parent row. The derived predicate is an `IN` subquery over the
//! parent's effective filter. Self-references use a recursive closure seeded
//! from root rows.

use std::collections::HashMap;

use crate::schema::LogicalForeignKey;
use crate::sql::sanitize::{column_tuple, quote_column_list, quote_identifier};
use crate::sql::where_clause::{WhereClause, and_opt};
use crate::types::TableName;

const CLOSURE_NAME: &str = "__subset_closure";
const CHILD_ALIAS: &str = "__subset_child";

/// Derive the foreign-key predicates for `tables`, which must be in level order.
///
/// The result holds only the derived part; callers AND it with the table's
/// explicit filter. Tables with nothing derived are absent.
pub fn propagate_filters<'a, F>(
    tables: impl IntoIterator<Item = &'a TableName>,
    foreign_keys: &[LogicalForeignKey],
    explicit: F,
) -> HashMap<TableName, WhereClause>
where
    F: Fn(&TableName) -> Option<WhereClause>,
{
    let mut propagated: HashMap<TableName, WhereClause> = HashMap::new();

    for table in tables {
        let own_keys: Vec<&LogicalForeignKey> = foreign_keys
            .iter()
            .filter(|fk| &fk.child == table)
            .collect();

        let mut fragments: Vec<String> = Vec::new();

        for fk in own_keys.iter().filter(|fk| !fk.is_self_ref()) {
            let parent_effective =
                and_opt(explicit(&fk.parent).as_ref(), propagated.get(&fk.parent));
            if let Some(parent_effective) = parent_effective {
                fragments.push(parent_subquery(fk, &parent_effective));
            }
        }

        for fk in own_keys.iter().filter(|fk| fk.is_self_ref()) {
            let accumulated = WhereClause::from_fragments(fragments.iter().cloned());
            let base = and_opt(explicit(table).as_ref(), accumulated.as_ref());
            // nothing filtered means every row qualifies, no closure needed
            if let Some(base) = base {
                fragments.push(self_ref_closure(fk, &base));
            }
        }

        if let Some(clause) = WhereClause::from_fragments(fragments) {
            propagated.insert(table.clone(), clause);
        }
    }

    propagated
}

/// `(child cols) IN (SELECT parent cols FROM parent WHERE filter)`
fn parent_subquery(fk: &LogicalForeignKey, parent_filter: &WhereClause) -> String {
    format!(
        "{} IN (SELECT {} FROM {} WHERE {})",
        column_tuple(&fk.child_columns()),
        quote_column_list(&fk.parent_columns()),
        fk.parent.quoted(),
        parent_filter.render()
    )
}

/// Rows reachable from a root (all self-key columns NULL) through rows that
/// each satisfy `base`
fn self_ref_closure(fk: &LogicalForeignKey, base: &WhereClause) -> String {
    let table = fk.child.quoted();
    let closure = quote_identifier(CLOSURE_NAME);
    let child = quote_identifier(CHILD_ALIAS);
    let parent_cols = fk.parent_columns();
    let parent_list = quote_column_list(&parent_cols);
    let base = base.render();

    let roots = fk
        .child_columns()
        .iter()
        .map(|c| format!("{} IS NULL", quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ");

    let child_parent_list = parent_cols
        .iter()
        .map(|p| format!("{}.{}", child, quote_identifier(p)))
        .collect::<Vec<_>>()
        .join(", ");

    let join_on = fk
        .columns
        .iter()
        .map(|(c, p)| {
            format!(
                "{}.{} = {}.{}",
                child,
                quote_identifier(c),
                closure,
                quote_identifier(p)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "{tuple} IN (WITH RECURSIVE {closure} ({parent_list}) AS (\
         SELECT {parent_list} FROM {table} WHERE ({roots}) AND {base} \
         UNION \
         SELECT {child_parent_list} FROM (SELECT * FROM {table} WHERE {base}) AS {child} \
         JOIN {closure} ON {join_on}\
         ) SELECT {parent_list} FROM {closure})",
        tuple = column_tuple(&parent_cols),
    )
}
