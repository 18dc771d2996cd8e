//! X-Pick: turns a dimension selection mode into a filter window and/or a
//! resolved display value.

use crate::error::{ResolveError, Result};
use crate::query::{display_value, AggregateRequest, Aggregator, Filter, FilterValue, RangeBounds};
use crate::QueryEngine;
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How the x dimension of a threshold condition is narrowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum XPick {
    /// Pin the dimension to the condition's own `xValue`, if any.
    #[default]
    Value,
    /// Caller supplied display value; the filter is left alone.
    Custom { value: Value },
    Range {
        #[serde(default)]
        from: Option<Value>,
        #[serde(default)]
        to: Option<Value>,
        #[serde(default, rename = "inclusiveTo")]
        inclusive_to: bool,
    },
    Token { token: DateToken },
    Special { pick: SpecialPick },
}

impl XPick {
    pub fn mode_name(&self) -> &'static str {
        match self {
            XPick::Value => "value",
            XPick::Custom { .. } => "custom",
            XPick::Range { .. } => "range",
            XPick::Token { .. } => "token",
            XPick::Special { .. } => "special",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateToken {
    Today,
    Yesterday,
    ThisMonth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialPick {
    Min,
    Max,
    First,
    Last,
}

impl SpecialPick {
    /// `first` shares the min path, `last` the max path.
    fn aggregator(self) -> Aggregator {
        match self {
            SpecialPick::Min | SpecialPick::First => Aggregator::Min,
            SpecialPick::Max | SpecialPick::Last => Aggregator::Max,
        }
    }
}

/// Result of resolving an [`XPick`].
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct XPickResolution {
    pub filter: Filter,
    pub value: Option<String>,
    pub pretty: Option<String>,
}

impl XPickResolution {
    fn unchanged(filter: &Filter) -> Self {
        Self {
            filter: filter.clone(),
            value: None,
            pretty: None,
        }
    }

    fn with_value(filter: Filter, value: String) -> Self {
        let pretty = pretty_x_value(&value);
        Self {
            filter,
            value: Some(value),
            pretty: Some(pretty),
        }
    }
}

/// Inputs of one resolution.
#[derive(Debug, Clone, Copy)]
pub struct XPickInput<'a> {
    pub source: &'a str,
    pub filter: &'a Filter,
    pub x_field: Option<&'a str>,
    pub x_value: Option<&'a Value>,
    pub pick: &'a XPick,
}

/// Resolves `input.pick` relative to `today`. Errors are returned to the
/// caller; see [`resolve_xpick`] for the degrading wrapper.
pub async fn try_resolve(
    engine: &dyn QueryEngine,
    input: XPickInput<'_>,
    today: NaiveDate,
) -> Result<XPickResolution> {
    let field = input.x_field.filter(|f| !f.is_empty());
    match input.pick {
        XPick::Value => match (field, input.x_value) {
            (Some(field), Some(v)) if !v.is_null() => {
                let mut filter = input.filter.clone();
                filter.insert(field.to_string(), FilterValue::Scalar(v.clone()));
                Ok(XPickResolution::with_value(filter, display_value(v)))
            }
            _ => Ok(XPickResolution::unchanged(input.filter)),
        },
        XPick::Custom { value } => Ok(XPickResolution::with_value(
            input.filter.clone(),
            display_value(value),
        )),
        XPick::Range {
            from,
            to,
            inclusive_to,
        } => {
            let field = field.ok_or(ResolveError::MissingDimension("range"))?;
            let bounds = RangeBounds {
                gte: from.clone().filter(|v| !v.is_null()),
                lt: to.clone().filter(|v| !v.is_null() && !inclusive_to),
                lte: to.clone().filter(|v| !v.is_null() && *inclusive_to),
                ..Default::default()
            };
            let mut filter = input.filter.clone();
            if !bounds.is_unbounded() {
                filter.insert(field.to_string(), FilterValue::Range(bounds));
            }
            Ok(XPickResolution::unchanged(&filter))
        }
        XPick::Token { token } => {
            let field = field.ok_or(ResolveError::MissingDimension("token"))?;
            let (bounds, value) = token_window(*token, today)?;
            let mut filter = input.filter.clone();
            filter.insert(field.to_string(), FilterValue::Range(bounds));
            Ok(XPickResolution::with_value(filter, value))
        }
        XPick::Special { pick } => {
            let field = field.ok_or(ResolveError::MissingDimension("special"))?;
            let mut req = AggregateRequest::new(input.source, pick.aggregator());
            req.measure = Some(field.to_string());
            req.filter = input.filter.clone();
            let result = engine
                .aggregate(&req)
                .await
                .map_err(|e| ResolveError::query(input.source, e))?;
            let cell = result
                .rows
                .first()
                .and_then(|row| {
                    result
                        .column_index("value")
                        .and_then(|i| row.get(i))
                        .filter(|v| !v.is_null())
                        .or_else(|| row.iter().find(|v| !v.is_null()))
                })
                .cloned()
                .ok_or_else(|| ResolveError::EmptyResult(input.source.to_string()))?;
            let mut filter = input.filter.clone();
            filter.insert(field.to_string(), FilterValue::Scalar(cell.clone()));
            Ok(XPickResolution::with_value(filter, display_value(&cell)))
        }
    }
}

/// Never-failing X-Pick resolution: any error degrades to the unmodified
/// filter with no resolved value.
pub async fn resolve_xpick(
    engine: &dyn QueryEngine,
    input: XPickInput<'_>,
    today: NaiveDate,
) -> XPickResolution {
    match try_resolve(engine, input, today).await {
        Ok(resolution) => resolution,
        Err(e) => {
            tracing::warn!(
                source = input.source,
                mode = input.pick.mode_name(),
                error = %e,
                "X-Pick resolution failed, using unmodified filter"
            );
            XPickResolution::unchanged(input.filter)
        }
    }
}

/// Date window for a relative token.
///
/// `today` is cumulative as of now: only an exclusive upper bound of
/// tomorrow, no lower bound. `yesterday` and `this_month` are half-open
/// windows.
pub fn token_window(token: DateToken, today: NaiveDate) -> Result<(RangeBounds, String)> {
    let out_of_range = || ResolveError::EmptyResult(format!("date window for {today}"));
    let day = |d: NaiveDate| Value::String(d.format("%Y-%m-%d").to_string());
    match token {
        DateToken::Today => {
            let tomorrow = today.succ_opt().ok_or_else(out_of_range)?;
            Ok((
                RangeBounds {
                    lt: Some(day(tomorrow)),
                    ..Default::default()
                },
                today.format("%Y-%m-%d").to_string(),
            ))
        }
        DateToken::Yesterday => {
            let yesterday = today.pred_opt().ok_or_else(out_of_range)?;
            Ok((
                RangeBounds {
                    gte: Some(day(yesterday)),
                    lt: Some(day(today)),
                    ..Default::default()
                },
                yesterday.format("%Y-%m-%d").to_string(),
            ))
        }
        DateToken::ThisMonth => {
            let first = today.with_day(1).ok_or_else(out_of_range)?;
            let next = first
                .checked_add_months(Months::new(1))
                .ok_or_else(out_of_range)?;
            Ok((
                RangeBounds {
                    gte: Some(day(first)),
                    lt: Some(day(next)),
                    ..Default::default()
                },
                first.format("%Y-%m").to_string(),
            ))
        }
    }
}

/// Human form of a resolved x value: `2024-03-05` -> `Mar 5, 2024`,
/// `2024-03` -> `March 2024`. Anything unrecognised is returned as is.
pub fn pretty_x_value(raw: &str) -> String {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return d.format("%b %-d, %Y").to_string();
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return dt.format("%b %-d, %Y %H:%M").to_string();
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
        if raw.len() == 7 {
            return d.format("%B %Y").to_string();
        }
    }
    raw.to_string()
}
