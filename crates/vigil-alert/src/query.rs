//! Request/response shapes exchanged with the external query engine, plus
//! the numeric coercion applied to every cell the engine hands back.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Aggregate function applied to a measure (or to rows, for `count`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    #[default]
    Count,
    Sum,
    Avg,
    Min,
    Max,
    #[serde(alias = "distinct_count", alias = "count_distinct")]
    Distinct,
}

impl std::fmt::Display for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Aggregator::Count => "count",
            Aggregator::Sum => "sum",
            Aggregator::Avg => "avg",
            Aggregator::Min => "min",
            Aggregator::Max => "max",
            Aggregator::Distinct => "distinct",
        };
        f.write_str(s)
    }
}

/// Field name -> constraint. Ordered so that serialized requests and the
/// `filters` token render deterministically.
pub type Filter = BTreeMap<String, FilterValue>;

/// One constraint in a [`Filter`].
///
/// Deserialization tries the variants in order: an object made only of
/// `gte`/`gt`/`lt`/`lte` keys is a range, an array is a membership list,
/// anything else is an equality value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Range(RangeBounds),
    List(Vec<Value>),
    Scalar(Value),
}

impl FilterValue {
    /// Human readable rendering used by the `filters_values` tokens.
    pub fn display(&self) -> String {
        match self {
            FilterValue::Scalar(v) => display_value(v),
            FilterValue::List(items) => items
                .iter()
                .map(display_value)
                .collect::<Vec<_>>()
                .join(", "),
            FilterValue::Range(r) => r.display(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeBounds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
}

impl RangeBounds {
    pub fn is_unbounded(&self) -> bool {
        self.gte.is_none() && self.gt.is_none() && self.lt.is_none() && self.lte.is_none()
    }

    fn display(&self) -> String {
        let lower = match (&self.gte, &self.gt) {
            (Some(v), _) => format!("[{}", display_value(v)),
            (None, Some(v)) => format!("({}", display_value(v)),
            (None, None) => "(…".to_string(),
        };
        let upper = match (&self.lte, &self.lt) {
            (Some(v), _) => format!("{}]", display_value(v)),
            (None, Some(v)) => format!("{})", display_value(v)),
            (None, None) => "…)".to_string(),
        };
        format!("{lower}, {upper}")
    }
}

/// Flat aggregation request (`aggregate(source, agg, measure?, where?, legend?, x?, groupBy?)`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRequest {
    pub source: String,
    pub agg: Aggregator,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measure: Option<String>,
    #[serde(rename = "where", skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: Filter,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(rename = "groupBy", skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
}

impl AggregateRequest {
    pub fn new(source: &str, agg: Aggregator) -> Self {
        Self {
            source: source.to_string(),
            agg,
            measure: None,
            filter: Filter::new(),
            legend: None,
            x: None,
            group_by: Vec::new(),
        }
    }
}

/// Cross-tab request (`pivot(source, rows[], cols[], valueField?, aggregator, where?)`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PivotRequest {
    pub source: String,
    pub rows: Vec<String>,
    pub cols: Vec<String>,
    #[serde(rename = "valueField", skip_serializing_if = "Option::is_none")]
    pub value_field: Option<String>,
    pub aggregator: Aggregator,
    #[serde(rename = "where", skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: Filter,
}

/// Tabular result returned by both engine calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Single KPI cell of a flat aggregation: the `value` column when
    /// present, else the first numeric cell of the first row. Absent or
    /// unparseable yields `0.0`.
    pub fn scalar_value(&self) -> f64 {
        let Some(row) = self.rows.first() else {
            return 0.0;
        };
        if let Some(cell) = self.column_index("value").and_then(|i| row.get(i)) {
            return coerce_number(cell);
        }
        row.iter().find_map(parse_number).unwrap_or(0.0)
    }

    /// Trailing cell of the first row, which is where a pivot with no
    /// column dimensions puts its grand total.
    pub fn trailing_value(&self) -> f64 {
        self.rows
            .first()
            .and_then(|row| row.last())
            .map(coerce_number)
            .unwrap_or(0.0)
    }
}

/// Strict numeric parse. Native numbers pass through; strings are parsed as
/// decimals after stripping thousands separators. Anything else, and any
/// non-finite result, is `None`.
pub fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric_str(s),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn parse_numeric_str(s: &str) -> Option<f64> {
    let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    match Decimal::from_str(&cleaned) {
        Ok(d) => d.to_f64(),
        // scientific notation and out-of-range magnitudes
        Err(_) => Decimal::from_scientific(&cleaned)
            .ok()
            .and_then(|d| d.to_f64())
            .or_else(|| cleaned.parse::<f64>().ok()),
    }
}

/// Lenient numeric coercion: [`parse_number`], or `0.0`.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use vigil_alert::query::coerce_number;
///
/// assert_eq!(coerce_number(&json!(42.5)), 42.5);
/// assert_eq!(coerce_number(&json!("1,234.5")), 1234.5);
/// assert_eq!(coerce_number(&json!(null)), 0.0);
/// assert_eq!(coerce_number(&json!("n/a")), 0.0);
/// ```
pub fn coerce_number(value: &Value) -> f64 {
    parse_number(value).unwrap_or(0.0)
}

/// Renders a JSON cell as plain text (strings unquoted).
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
