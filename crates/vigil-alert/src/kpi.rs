//! KPI resolution via flat aggregation or pivot, falling back between the two.

use crate::config::CalcMode;
use crate::error::{ResolveError, Result};
use crate::query::{coerce_number, AggregateRequest, Aggregator, Filter, PivotRequest};
use crate::QueryEngine;

/// Everything needed to compute one KPI value.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiQuery {
    pub source: String,
    pub aggregator: Aggregator,
    pub measure: Option<String>,
    pub filter: Filter,
    pub x_field: Option<String>,
    pub mode: CalcMode,
}

impl KpiQuery {
    fn measure_for_agg(&self) -> Option<String> {
        // count ignores the measure
        match self.aggregator {
            Aggregator::Count => None,
            _ => self.measure.clone(),
        }
    }
}

/// Flat aggregation strategy.
pub async fn query_kpi(engine: &dyn QueryEngine, q: &KpiQuery) -> Result<f64> {
    let mut req = AggregateRequest::new(&q.source, q.aggregator);
    req.measure = q.measure_for_agg();
    req.filter = q.filter.clone();
    let result = engine
        .aggregate(&req)
        .await
        .map_err(|e| ResolveError::query(&q.source, e))?;
    Ok(result.scalar_value())
}

/// Pivot strategy: a windowed total over the x dimension when one is set,
/// else (or if that fails) a bare pivot with no dimensions.
pub async fn pivot_kpi(engine: &dyn QueryEngine, q: &KpiQuery) -> Result<f64> {
    if let Some(x_field) = q.x_field.as_deref().filter(|f| !f.is_empty()) {
        match windowed_pivot_total(engine, q, x_field).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                tracing::warn!(
                    source = %q.source,
                    x_field,
                    error = %e,
                    "Windowed pivot total failed, falling back to plain pivot"
                );
            }
        }
    }
    plain_pivot(engine, q).await
}

fn pivot_request(q: &KpiQuery, rows: Vec<String>) -> PivotRequest {
    PivotRequest {
        source: q.source.clone(),
        rows,
        cols: Vec::new(),
        value_field: q.measure_for_agg(),
        aggregator: q.aggregator,
        filter: q.filter.clone(),
    }
}

async fn plain_pivot(engine: &dyn QueryEngine, q: &KpiQuery) -> Result<f64> {
    let result = engine
        .pivot(&pivot_request(q, Vec::new()))
        .await
        .map_err(|e| ResolveError::query(&q.source, e))?;
    Ok(result.trailing_value())
}

/// Pivots with the x dimension as the only row and folds the per-row totals.
async fn windowed_pivot_total(engine: &dyn QueryEngine, q: &KpiQuery, x_field: &str) -> Result<f64> {
    let result = engine
        .pivot(&pivot_request(q, vec![x_field.to_string()]))
        .await
        .map_err(|e| ResolveError::query(&q.source, e))?;
    let totals: Vec<f64> = result
        .rows
        .iter()
        .filter_map(|row| row.last())
        .map(coerce_number)
        .collect();
    combine_totals(q.aggregator, &totals)
}

/// Folds per-row totals into one value. Averages and distinct counts are
/// not decomposable across rows.
pub fn combine_totals(agg: Aggregator, totals: &[f64]) -> Result<f64> {
    if totals.is_empty() {
        return Ok(0.0);
    }
    match agg {
        Aggregator::Sum | Aggregator::Count => Ok(totals.iter().sum()),
        Aggregator::Min => Ok(totals.iter().copied().fold(f64::INFINITY, f64::min)),
        Aggregator::Max => Ok(totals.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        Aggregator::Avg | Aggregator::Distinct => Err(ResolveError::NotCombinable(agg)),
    }
}

async fn run_strategy(engine: &dyn QueryEngine, q: &KpiQuery, mode: CalcMode) -> Result<f64> {
    match mode {
        CalcMode::Query => query_kpi(engine, q).await,
        CalcMode::Pivot => pivot_kpi(engine, q).await,
    }
}

/// Never-failing KPI resolution: the configured strategy, then the other
/// one, then `0.0`. Always finite.
pub async fn resolve_kpi(engine: &dyn QueryEngine, q: &KpiQuery) -> f64 {
    let alternate = match q.mode {
        CalcMode::Query => CalcMode::Pivot,
        CalcMode::Pivot => CalcMode::Query,
    };
    let value = match run_strategy(engine, q, q.mode).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                source = %q.source,
                mode = ?q.mode,
                error = %e,
                "KPI strategy failed, trying alternate"
            );
            match run_strategy(engine, q, alternate).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        source = %q.source,
                        error = %e,
                        "Both KPI strategies failed, using 0"
                    );
                    0.0
                }
            }
        }
    };
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
