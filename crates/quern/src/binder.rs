//! Named-placeholder parameter binding.
//!
//! Rewrites `:name` placeholders into the backend's positional form and
//! collects the matching values in scan order. Deliberately regex-based, not
//! a SQL parser: a placeholder is a `:name` at the start of the statement or
//! after whitespace, a quote, or common punctuation. `::` casts are left
//! alone. Binding is total-or-nothing: the first unresolved name aborts
//! before any network call.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::LazyLock;
use uuid::Uuid;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    // Group 1: the boundary character (kept in the output), group 2: the name.
    Regex::new(r#"(^|[\s,=<>(+\-*/'"]):([A-Za-z_][A-Za-z0-9_]*)"#)
        .expect("placeholder regex is valid")
});

/// A value supplied by the caller for a named placeholder.
///
/// The driver infers the backend type from the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Text / varchar.
    Text(String),
    /// 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Timezone-aware timestamp.
    Timestamp(DateTime<Utc>),
    /// UUID.
    Uuid(Uuid),
    /// SQL NULL.
    Null,
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Caller-supplied name -> value map.
pub type Params = HashMap<String, ParamValue>;

/// Positional placeholder syntax of the target backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1`, `$2`, ... (PostgreSQL wire protocol).
    Numbered,
    /// `?` (Cassandra native protocol).
    Question,
}

/// A statement rewritten for positional binding.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// The rewritten statement text.
    pub sql: String,
    /// Placeholder names in scan order, one entry per occurrence.
    pub names: Vec<String>,
    /// Values in scan order, one entry per occurrence.
    pub values: Vec<ParamValue>,
}

/// Bind `params` into `query`, rewriting placeholders for `style`.
///
/// Each occurrence of a name consumes one positional slot, so a name used
/// twice appears twice in `values`.
pub fn bind(
    query: &str,
    params: &Params,
    style: PlaceholderStyle,
) -> Result<BoundStatement, EngineError> {
    let mut sql = String::with_capacity(query.len());
    let mut names = Vec::new();
    let mut values = Vec::new();
    let mut last = 0usize;

    for caps in PLACEHOLDER.captures_iter(query) {
        let Some(name_match) = caps.get(2) else { continue };
        let name = name_match.as_str();
        let value = params
            .get(name)
            .ok_or_else(|| EngineError::parameter_not_found(name))?;

        // Everything up to and including the boundary char, minus the colon.
        sql.push_str(&query[last..name_match.start() - 1]);
        match style {
            PlaceholderStyle::Numbered => {
                let _ = write!(sql, "${}", values.len() + 1);
            }
            PlaceholderStyle::Question => sql.push('?'),
        }
        names.push(name.to_string());
        values.push(value.clone());
        last = name_match.end();
    }
    sql.push_str(&query[last..]);

    Ok(BoundStatement { sql, names, values })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, ParamValue)]) -> Params {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn binds_in_scan_order_numbered() {
        let bound = bind(
            "UPDATE t SET x = :x WHERE id = :id",
            &params(&[("x", ParamValue::Int(1)), ("id", ParamValue::from("5"))]),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(bound.sql, "UPDATE t SET x = $1 WHERE id = $2");
        assert_eq!(bound.names, vec!["x", "id"]);
        assert_eq!(bound.values, vec![ParamValue::Int(1), ParamValue::from("5")]);
    }

    #[test]
    fn binds_question_style() {
        let bound = bind(
            "SELECT * FROM t WHERE a = :a AND b > :b",
            &params(&[("a", ParamValue::from("x")), ("b", ParamValue::Int(3))]),
            PlaceholderStyle::Question,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = ? AND b > ?");
    }

    #[test]
    fn repeated_name_consumes_one_slot_per_occurrence() {
        let bound = bind(
            "SELECT * FROM t WHERE a = :v OR b = :v",
            &params(&[("v", ParamValue::Int(7))]),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE a = $1 OR b = $2");
        assert_eq!(bound.values.len(), 2);
    }

    #[test]
    fn missing_parameter_fails_naming_it() {
        let err = bind(
            "SELECT * FROM t WHERE id = :missingParam",
            &Params::new(),
            PlaceholderStyle::Numbered,
        )
        .unwrap_err();
        match err {
            EngineError::ParameterNotFound { name } => assert_eq!(name, "missingParam"),
            other => panic!("expected ParameterNotFound, got {other:?}"),
        }
    }

    #[test]
    fn binding_is_total_or_nothing() {
        // First name resolves, second does not: the whole bind fails.
        let err = bind(
            "SELECT :a, :b",
            &params(&[("a", ParamValue::Int(1))]),
            PlaceholderStyle::Numbered,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ParameterNotFound { .. }));
    }

    #[test]
    fn double_colon_cast_is_not_a_placeholder() {
        let bound = bind(
            "SELECT id::text FROM t WHERE id = :id",
            &params(&[("id", ParamValue::Int(1))]),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT id::text FROM t WHERE id = $1");
        assert_eq!(bound.values.len(), 1);
    }

    #[test]
    fn quote_preceded_placeholder_binds() {
        let bound = bind(
            "SELECT ':tag'",
            &params(&[("tag", ParamValue::from("x"))]),
            PlaceholderStyle::Numbered,
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT '$1'");
    }

    #[test]
    fn statement_without_placeholders_passes_through() {
        let bound = bind("SELECT 1", &Params::new(), PlaceholderStyle::Numbered).unwrap();
        assert_eq!(bound.sql, "SELECT 1");
        assert!(bound.values.is_empty());
    }
}
