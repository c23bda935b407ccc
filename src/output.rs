//! Per-column output model
//!
//! An [`OutputColumn`] says what the target receives for one column: the
//! source value untouched, a constant, or a transform of the source text.
//! A [`Lens`] narrows a transform to a spot inside a JSON value.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::types::{ColumnValue, SourceRow};

/// Null-aware transform: receives the whole source row and the focused value
pub type TransformFn = Arc<dyn Fn(&SourceRow, Option<&str>) -> Option<String> + Send + Sync>;

// ============================================================================
// Lens
// ============================================================================

/// Where inside a column value a transform applies
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Lens {
    /// The raw column string, no JSON parsing
    #[default]
    Direct,
    /// One field of a JSON object, then `inner`
    Field(String, Box<Lens>),
    /// Every element of a JSON array, then `inner`
    ArrayElements(Box<Lens>),
}

impl Lens {
    /// A JSON object field, transformed as a whole
    pub fn field(name: impl Into<String>) -> Self {
        Lens::Field(name.into(), Box::new(Lens::Direct))
    }

    /// A JSON object field, navigated further by `inner`
    pub fn field_then(name: impl Into<String>, inner: Lens) -> Self {
        Lens::Field(name.into(), Box::new(inner))
    }

    /// Every element of a JSON array, navigated further by `inner`
    pub fn array_elements(inner: Lens) -> Self {
        Lens::ArrayElements(Box::new(inner))
    }

    /// Apply `f` at every point this lens focuses on.
    ///
    /// Non-direct lenses parse `input` as JSON; input that does not parse is
    /// returned unchanged with a warning.
    pub fn modify_opt(
        &self,
        input: Option<&str>,
        f: &dyn Fn(Option<&str>) -> Option<String>,
    ) -> Option<String> {
        if let Lens::Direct = self {
            return f(input);
        }
        let raw = input?;
        match serde_json::from_str::<Value>(raw) {
            Ok(mut value) => {
                self.modify_json(&mut value, f);
                Some(value.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Value is not valid JSON, passing it through unchanged");
                Some(raw.to_string())
            }
        }
    }

    fn modify_json(&self, value: &mut Value, f: &dyn Fn(Option<&str>) -> Option<String>) {
        match self {
            Lens::Direct => {
                let was_string = value.is_string();
                let input = match &*value {
                    Value::Null => None,
                    Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                };
                *value = match f(input.as_deref()) {
                    None => Value::Null,
                    Some(s) if was_string => Value::String(s),
                    Some(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
                };
            }
            Lens::Field(name, inner) => match value {
                Value::Object(map) => {
                    if let Some(child) = map.get_mut(name) {
                        inner.modify_json(child, f);
                    }
                }
                Value::Null => {}
                other => warn!(
                    field = %name,
                    found = json_kind(other),
                    "Field lens applied to a non-object, leaving value unchanged"
                ),
            },
            Lens::ArrayElements(inner) => match value {
                Value::Array(items) => {
                    for item in items.iter_mut() {
                        inner.modify_json(item, f);
                    }
                }
                Value::Null => {}
                other => warn!(
                    found = json_kind(other),
                    "Array lens applied to a non-array, leaving value unchanged"
                ),
            },
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// OutputColumn
// ============================================================================

/// What the target receives for one column
#[derive(Clone)]
pub enum OutputColumn {
    /// Original value and type, unchanged; JSON is never re-serialized
    Source(String),
    /// The same constant for every row
    Fixed { name: String, value: ColumnValue },
    /// `transform` applied through `lens` to the source text
    Transformed {
        name: String,
        lens: Lens,
        transform: TransformFn,
        /// Whether SQL NULL reaches `transform`; otherwise NULL passes through
        null_aware: bool,
    },
}

impl OutputColumn {
    pub fn source(name: impl Into<String>) -> Self {
        OutputColumn::Source(name.into())
    }

    /// Constant text value, `None` for NULL
    pub fn fixed<S: Into<String>>(name: impl Into<String>, value: Option<S>) -> Self {
        OutputColumn::Fixed {
            name: name.into(),
            value: value.map_or(ColumnValue::Null, |v| ColumnValue::Text(v.into())),
        }
    }

    /// Constant JSON value
    pub fn fixed_json(name: impl Into<String>, value: Value) -> Self {
        OutputColumn::Fixed {
            name: name.into(),
            value: ColumnValue::Json(value),
        }
    }

    /// Transform non-null values; NULL passes through
    pub fn transformed<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::transformed_with_row(name, move |_, s| f(s))
    }

    /// Transform non-null values with access to the whole source row
    pub fn transformed_with_row<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&SourceRow, &str) -> String + Send + Sync + 'static,
    {
        OutputColumn::Transformed {
            name: name.into(),
            lens: Lens::Direct,
            transform: Arc::new(move |row: &SourceRow, s: Option<&str>| s.map(|s| f(row, s))),
            null_aware: false,
        }
    }

    /// Transform every value, NULL included
    pub fn transformed_nullable<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&SourceRow, Option<&str>) -> Option<String> + Send + Sync + 'static,
    {
        OutputColumn::Transformed {
            name: name.into(),
            lens: Lens::Direct,
            transform: Arc::new(f),
            null_aware: true,
        }
    }

    /// Focus a transform through `lens`. Other variants are returned as-is.
    pub fn with_lens(self, lens: Lens) -> Self {
        match self {
            OutputColumn::Transformed {
                name,
                transform,
                null_aware,
                ..
            } => OutputColumn::Transformed {
                name,
                lens,
                transform,
                null_aware,
            },
            other => other,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OutputColumn::Source(name) => name,
            OutputColumn::Fixed { name, .. } => name,
            OutputColumn::Transformed { name, .. } => name,
        }
    }

    /// Output value for the column at `index` of `row`
    pub fn transform(&self, row: &SourceRow, index: usize) -> ColumnValue {
        match self {
            OutputColumn::Source(_) => match row.text_at(index) {
                Some(text) => ColumnValue::Text(text.to_string()),
                None => ColumnValue::Null,
            },
            OutputColumn::Fixed { value, .. } => value.clone(),
            OutputColumn::Transformed {
                lens,
                transform,
                null_aware,
                ..
            } => {
                let input = row.text_at(index);
                if input.is_none() && !null_aware {
                    return ColumnValue::Null;
                }
                let f = |s: Option<&str>| transform(row, s);
                match lens.modify_opt(input, &f) {
                    Some(s) => ColumnValue::Text(s),
                    None => ColumnValue::Null,
                }
            }
        }
    }
}

impl fmt::Debug for OutputColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputColumn::Source(name) => f.debug_tuple("Source").field(name).finish(),
            OutputColumn::Fixed { name, value } => f
                .debug_struct("Fixed")
                .field("name", name)
                .field("value", value)
                .finish(),
            OutputColumn::Transformed {
                name,
                lens,
                null_aware,
                ..
            } => f
                .debug_struct("Transformed")
                .field("name", name)
                .field("lens", lens)
                .field("null_aware", null_aware)
                .finish_non_exhaustive(),
        }
    }
}
