use crate::query::parse_number;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Comparison applied between a KPI and its configured bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    Equal,
    Between,
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "<" | "lt" | "less_than" => Ok(Self::LessThan),
            "<=" | "lte" | "less_equal" => Ok(Self::LessEqual),
            ">" | "gt" | "greater_than" => Ok(Self::GreaterThan),
            ">=" | "gte" | "greater_equal" => Ok(Self::GreaterEqual),
            "=" | "==" | "eq" | "equal" => Ok(Self::Equal),
            "between" => Ok(Self::Between),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.to_string()
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LessThan => write!(f, "<"),
            Self::LessEqual => write!(f, "<="),
            Self::GreaterThan => write!(f, ">"),
            Self::GreaterEqual => write!(f, ">="),
            Self::Equal => write!(f, "="),
            Self::Between => write!(f, "between"),
        }
    }
}

/// Parsed threshold bound. `Between` is normalized so `low <= high`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    Single(f64),
    Between { low: f64, high: f64 },
}

impl Bound {
    /// Parses the configured `value` for `op`. `between` needs a two-element
    /// array (either order); every other operator needs one number. Anything
    /// non-numeric yields `None`.
    pub fn parse(op: CompareOp, value: Option<&Value>) -> Option<Bound> {
        let value = value?;
        match op {
            CompareOp::Between => {
                let items = value.as_array()?;
                if items.len() != 2 {
                    return None;
                }
                let a = parse_number(&items[0])?;
                let b = parse_number(&items[1])?;
                Some(Bound::Between {
                    low: a.min(b),
                    high: a.max(b),
                })
            }
            _ => parse_number(value).map(Bound::Single),
        }
    }
}

impl CompareOp {
    /// Applies the operator. Operator/bound shape mismatches and non-finite
    /// KPIs never match.
    pub fn check(&self, value: f64, bound: &Bound) -> bool {
        if !value.is_finite() {
            return false;
        }
        match (self, bound) {
            (Self::LessThan, Bound::Single(t)) => value < *t,
            (Self::LessEqual, Bound::Single(t)) => value <= *t,
            (Self::GreaterThan, Bound::Single(t)) => value > *t,
            (Self::GreaterEqual, Bound::Single(t)) => value >= *t,
            (Self::Equal, Bound::Single(t)) => value == *t,
            (Self::Between, Bound::Between { low, high }) => value >= *low && value <= *high,
            _ => false,
        }
    }
}

/// An operator with its (possibly missing) bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Threshold {
    pub op: CompareOp,
    pub bound: Option<Bound>,
}

impl Threshold {
    pub fn new(op: CompareOp, value: Option<&Value>) -> Self {
        Self {
            op,
            bound: Bound::parse(op, value),
        }
    }

    /// A missing bound is fail-safe: nothing matches.
    pub fn matches(&self, value: f64) -> bool {
        self.bound.is_some_and(|b| self.op.check(value, &b))
    }

    pub fn single(&self) -> Option<f64> {
        match self.bound {
            Some(Bound::Single(v)) => Some(v),
            _ => None,
        }
    }

    pub fn low_high(&self) -> Option<(f64, f64)> {
        match self.bound {
            Some(Bound::Between { low, high }) => Some((low, high)),
            _ => None,
        }
    }
}

/// `evaluate(op, kpi, bound)` on a raw configured bound.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use vigil_alert::compare::{evaluate, CompareOp};
///
/// assert!(evaluate(CompareOp::GreaterEqual, 1500.0, &json!(1000)));
/// assert!(evaluate(CompareOp::Between, 5.0, &json!([10, 1])));
/// assert!(!evaluate(CompareOp::LessThan, 5.0, &json!("abc")));
/// ```
pub fn evaluate(op: CompareOp, kpi: f64, bound: &Value) -> bool {
    Threshold::new(op, Some(bound)).matches(kpi)
}
