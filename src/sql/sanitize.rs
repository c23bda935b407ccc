//! SQL Quoting Utilities
//!
//! Every identifier and literal the engine generates goes through these helpers.
//! Caller-supplied predicate text is never touched.

/// Quote a SQL identifier to make it safe for use in queries
///
/// # Example
/// ```
/// use pg_subset_copy::sql::quote_identifier;
///
/// let quoted = quote_identifier("my_table");
/// assert_eq!(quoted, "\"my_table\"");
/// ```
pub fn quote_identifier(identifier: &str) -> String {
    // Escape any double quotes in the identifier by doubling them
    let escaped = identifier.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

/// Quote a string literal
///
/// ```
/// use pg_subset_copy::sql::quote_literal;
///
/// assert_eq!(quote_literal("it's"), "'it''s'");
/// ```
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quote and comma-join a column list
pub fn quote_column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|c| quote_identifier(c.as_ref()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a column list as a row-comparison operand: bare for one column,
/// parenthesized tuple for several
pub fn column_tuple<S: AsRef<str>>(columns: &[S]) -> String {
    match columns {
        [single] => quote_identifier(single.as_ref()),
        _ => format!("({})", quote_column_list(columns)),
    }
}
