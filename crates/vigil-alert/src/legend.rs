//! Legend grouping: one KPI per category instead of one global KPI.
//!
//! With two or more legend fields the first is the parent category and the
//! remaining ones form a child label (`"north / retail"`), summed under the
//! parent. The threshold is applied per parent card.

use crate::compare::Threshold;
use crate::config::CalcMode;
use crate::error::{ResolveError, Result};
use crate::kpi::KpiQuery;
use crate::query::{
    coerce_number, display_value, AggregateRequest, Aggregator, Filter, PivotRequest, QueryResult,
};
use crate::QueryEngine;
use serde::Serialize;
use std::collections::HashMap;

pub const CHILD_SEPARATOR: &str = " / ";
pub const BLANK_LABEL: &str = "(blank)";

/// Grouping is active when fields are configured and none of them is
/// already pinned by the filter.
pub fn legend_active(fields: &[String], filter: &Filter) -> bool {
    !fields.is_empty() && fields.iter().all(|f| !filter.contains_key(f))
}

/// One aggregated row: labels in legend-field order plus its value.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRow {
    pub labels: Vec<String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendChild {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendCard {
    pub category: String,
    pub value: f64,
    pub matched: bool,
    pub children: Vec<LegendChild>,
}

/// Which category the rule reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LegendSelection {
    /// At least one card passed: the highest matching category, with the
    /// KPI being the sum over all matching cards.
    Matched { category: String, kpi: f64 },
    /// Nothing passed; the globally largest category is shown but the rule
    /// does not fire.
    NoMatchFallback { category: String, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendBreakdown {
    pub fields: Vec<String>,
    /// Ordered by descending value.
    pub cards: Vec<LegendCard>,
    pub selection: LegendSelection,
}

impl LegendBreakdown {
    pub fn fired(&self) -> bool {
        matches!(self.selection, LegendSelection::Matched { .. })
    }

    pub fn best_category(&self) -> &str {
        match &self.selection {
            LegendSelection::Matched { category, .. } => category,
            LegendSelection::NoMatchFallback { category, .. } => category,
        }
    }

    pub fn kpi(&self) -> f64 {
        match self.selection {
            LegendSelection::Matched { kpi, .. } => kpi,
            LegendSelection::NoMatchFallback { value, .. } => value,
        }
    }
}

/// Reads `(labels, value)` pairs out of a grouped result. Fields are located
/// by column name, falling back to position; the value is the `value`
/// column, else the last cell.
pub fn parse_rows(result: &QueryResult, fields: &[String]) -> Vec<GroupRow> {
    let value_idx = result.column_index("value");
    result
        .rows
        .iter()
        .filter(|row| !row.is_empty())
        .map(|row| {
            let labels = fields
                .iter()
                .enumerate()
                .map(|(pos, field)| {
                    let idx = result.column_index(field).unwrap_or(pos);
                    let label = row.get(idx).map(display_value).unwrap_or_default();
                    if label.trim().is_empty() {
                        BLANK_LABEL.to_string()
                    } else {
                        label
                    }
                })
                .collect();
            let value = value_idx
                .and_then(|i| row.get(i))
                .or_else(|| row.last())
                .map(coerce_number)
                .unwrap_or(0.0);
            GroupRow { labels, value }
        })
        .collect()
}

/// Builds cards and the selection from already aggregated rows. `None` when
/// there are no rows.
pub fn build_breakdown(
    fields: &[String],
    rows: &[GroupRow],
    threshold: &Threshold,
) -> Option<LegendBreakdown> {
    if rows.is_empty() {
        return None;
    }

    let mut order: Vec<String> = Vec::new();
    let mut parents: HashMap<String, (f64, Vec<LegendChild>)> = HashMap::new();
    for row in rows {
        let parent = row
            .labels
            .first()
            .cloned()
            .unwrap_or_else(|| BLANK_LABEL.to_string());
        let entry = parents.entry(parent.clone()).or_insert_with(|| {
            order.push(parent.clone());
            (0.0, Vec::new())
        });
        entry.0 += row.value;
        if fields.len() >= 2 {
            let label = row.labels[1..].join(CHILD_SEPARATOR);
            match entry.1.iter_mut().find(|c| c.label == label) {
                Some(child) => child.value += row.value,
                None => entry.1.push(LegendChild {
                    label,
                    value: row.value,
                }),
            }
        }
    }

    let mut cards: Vec<LegendCard> = order
        .into_iter()
        .filter_map(|category| {
            let (value, mut children) = parents.remove(&category)?;
            children.sort_by(|a, b| b.value.total_cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
            Some(LegendCard {
                matched: threshold.matches(value),
                category,
                value,
                children,
            })
        })
        .collect();
    cards.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.category.cmp(&b.category))
    });

    let matched_kpi: f64 = cards.iter().filter(|c| c.matched).map(|c| c.value).sum();
    let selection = match cards.iter().find(|c| c.matched) {
        Some(best) => LegendSelection::Matched {
            category: best.category.clone(),
            kpi: matched_kpi,
        },
        None => {
            let top = &cards[0];
            LegendSelection::NoMatchFallback {
                category: top.category.clone(),
                value: top.value,
            }
        }
    };

    Some(LegendBreakdown {
        fields: fields.to_vec(),
        cards,
        selection,
    })
}

async fn grouped_rows(
    engine: &dyn QueryEngine,
    q: &KpiQuery,
    fields: &[String],
    mode: CalcMode,
) -> Result<Vec<GroupRow>> {
    let measure = match q.aggregator {
        Aggregator::Count => None,
        _ => q.measure.clone(),
    };
    let result = match mode {
        CalcMode::Query => {
            let mut req = AggregateRequest::new(&q.source, q.aggregator);
            req.measure = measure;
            req.filter = q.filter.clone();
            req.legend = fields.first().cloned();
            req.group_by = fields.to_vec();
            engine.aggregate(&req).await
        }
        CalcMode::Pivot => {
            let req = PivotRequest {
                source: q.source.clone(),
                rows: fields.to_vec(),
                cols: Vec::new(),
                value_field: measure,
                aggregator: q.aggregator,
                filter: q.filter.clone(),
            };
            engine.pivot(&req).await
        }
    }
    .map_err(|e| ResolveError::query(&q.source, e))?;

    let rows = parse_rows(&result, fields);
    if rows.is_empty() {
        return Err(ResolveError::EmptyResult(q.source.clone()));
    }
    Ok(rows)
}

/// Aggregates per category (configured strategy, then the alternate one)
/// and builds the breakdown. An error means the caller should use the
/// single-value KPI path instead.
pub async fn resolve_legend(
    engine: &dyn QueryEngine,
    q: &KpiQuery,
    fields: &[String],
    threshold: &Threshold,
) -> Result<LegendBreakdown> {
    let alternate = match q.mode {
        CalcMode::Query => CalcMode::Pivot,
        CalcMode::Pivot => CalcMode::Query,
    };
    let rows = match grouped_rows(engine, q, fields, q.mode).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::warn!(
                source = %q.source,
                fields = ?fields,
                error = %e,
                "Legend aggregation failed, trying alternate strategy"
            );
            grouped_rows(engine, q, fields, alternate).await?
        }
    };
    let breakdown = build_breakdown(fields, &rows, threshold)
        .ok_or_else(|| ResolveError::EmptyResult(q.source.clone()))?;
    if let LegendSelection::NoMatchFallback { category, value } = &breakdown.selection {
        tracing::info!(
            source = %q.source,
            category = %category,
            value,
            "No legend category matched, showing top category"
        );
    }
    Ok(breakdown)
}
