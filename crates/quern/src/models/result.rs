//! Backend-agnostic tabular results and cell formatting.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Fixed render pattern for timestamp cells. Always applied in GMT,
/// independent of the process timezone.
pub const TIMESTAMP_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

/// Tabular result of one query execution.
///
/// Ordered column names plus string-formatted rows. Constructed once per
/// execution and immutable afterward. `actual_size_before_limit` records how
/// many rows the backend produced before any row-limit truncation, so a
/// caller can detect and report truncation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    actual_size_before_limit: usize,
}

impl ResultTable {
    /// Build a table by draining a finite, non-restartable row sequence.
    ///
    /// `limit_records <= 0` means unbounded. With a positive limit, at most
    /// that many rows are materialized, but the full sequence is still
    /// consumed so the pre-truncation count stays accurate.
    pub fn from_rows(
        columns: Vec<String>,
        rows: impl IntoIterator<Item = Vec<String>>,
        limit_records: i64,
    ) -> Self {
        let limit = usize::try_from(limit_records).ok().filter(|_| limit_records > 0);
        let mut materialized = Vec::new();
        let mut total = 0usize;
        for row in rows {
            total += 1;
            if limit.map_or(true, |max| materialized.len() < max) {
                materialized.push(row);
            }
        }
        Self { columns, rows: materialized, actual_size_before_limit: total }
    }

    /// An empty table with the given columns.
    pub fn empty(columns: Vec<String>) -> Self {
        Self { columns, rows: Vec::new(), actual_size_before_limit: 0 }
    }

    /// Ordered column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Materialized rows, in backend order.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows actually materialized.
    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Number of rows the backend produced before truncation.
    pub fn actual_size_before_limit(&self) -> usize {
        self.actual_size_before_limit
    }

    /// Whether a row limit cut off part of the result.
    pub fn is_truncated(&self) -> bool {
        self.actual_size_before_limit > self.rows.len()
    }
}

/// Render a timezone-aware timestamp in the fixed GMT pattern.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.format(TIMESTAMP_PATTERN).to_string()
}

/// Render a timezone-naive timestamp, taken to already be GMT.
pub fn format_naive_timestamp(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_PATTERN).to_string()
}

/// Render a 64-bit float cell as a truncated integral string.
///
/// Known quirk, kept on purpose: columns declared as 64-bit floats have
/// historically been displayed with the fractional part dropped (`42.9` ->
/// `"42"`). This is a compatibility choice, not a general float formatter;
/// 32-bit floats render naturally.
pub fn format_double(value: f64) -> String {
    if value.is_finite() {
        (value.trunc() as i64).to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(n: usize) -> Vec<String> {
        vec![n.to_string()]
    }

    #[test]
    fn limit_truncates_but_counts_everything() {
        let table =
            ResultTable::from_rows(vec!["n".into()], (0..7).map(row), 3);
        assert_eq!(table.size(), 3);
        assert_eq!(table.actual_size_before_limit(), 7);
        assert!(table.is_truncated());
        assert_eq!(table.rows()[2], vec!["2".to_string()]);
    }

    #[test]
    fn zero_or_negative_limit_means_unbounded() {
        for limit in [0, -1] {
            let table = ResultTable::from_rows(vec!["n".into()], (0..5).map(row), limit);
            assert_eq!(table.size(), 5);
            assert_eq!(table.actual_size_before_limit(), 5);
            assert!(!table.is_truncated());
        }
    }

    #[test]
    fn limit_larger_than_result_is_not_truncation() {
        let table = ResultTable::from_rows(vec!["n".into()], (0..2).map(row), 10);
        assert_eq!(table.size(), 2);
        assert!(!table.is_truncated());
    }

    #[test]
    fn timestamp_formatting_is_fixed_gmt_and_idempotent() {
        let value = Utc.with_ymd_and_hms(2024, 3, 5, 17, 4, 9).unwrap();
        let first = format_timestamp(value);
        let second = format_timestamp(value);
        assert_eq!(first, "2024-03-05 17:04:09");
        assert_eq!(first, second);
    }

    #[test]
    fn double_renders_truncated_integral() {
        assert_eq!(format_double(42.9), "42");
        assert_eq!(format_double(-3.7), "-3");
        assert_eq!(format_double(0.0), "0");
        assert_eq!(format_double(f64::NAN), "NaN");
    }
}
