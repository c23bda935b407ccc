//! Caller-supplied and generated WHERE fragments
//!
//! Fragments are trusted SQL: they are never parsed, only parenthesized and
//! joined with AND.

use std::fmt;

/// One or more boolean SQL fragments, combined with AND when rendered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhereClause {
    Single(String),
    Multiple(String, Vec<String>),
}

impl WhereClause {
    pub fn new(sql: impl Into<String>) -> Self {
        WhereClause::Single(sql.into())
    }

    /// Build from any number of fragments; `None` when there are none
    pub fn from_fragments<I, S>(fragments: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut iter = fragments.into_iter().map(Into::into);
        let first = iter.next()?;
        let rest: Vec<String> = iter.collect();
        Some(if rest.is_empty() {
            WhereClause::Single(first)
        } else {
            WhereClause::Multiple(first, rest)
        })
    }

    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        let (first, rest): (&String, &[String]) = match self {
            WhereClause::Single(sql) => (sql, &[]),
            WhereClause::Multiple(sql, more) => (sql, more.as_slice()),
        };
        std::iter::once(first.as_str()).chain(rest.iter().map(String::as_str))
    }

    /// Conjunction of both clauses, flattening their fragments
    pub fn and(&self, other: &WhereClause) -> WhereClause {
        let fragments: Vec<&str> = self.fragments().chain(other.fragments()).collect();
        // at least two fragments are present
        WhereClause::Multiple(
            fragments[0].to_string(),
            fragments[1..].iter().map(|s| s.to_string()).collect(),
        )
    }

    /// Every fragment parenthesized and joined with AND
    pub fn render(&self) -> String {
        self.fragments()
            .map(|f| format!("({})", f))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

/// AND of two optional clauses
pub fn and_opt(a: Option<&WhereClause>, b: Option<&WhereClause>) -> Option<WhereClause> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.and(b)),
        (Some(c), None) | (None, Some(c)) => Some(c.clone()),
        (None, None) => None,
    }
}

impl fmt::Display for WhereClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for WhereClause {
    fn from(value: &str) -> Self {
        WhereClause::new(value)
    }
}

impl From<String> for WhereClause {
    fn from(value: String) -> Self {
        WhereClause::new(value)
    }
}
