//! Alert evaluation for dashboard data.
//!
//! A rule's [`config::RuleConfig`] names one or more trigger conditions. The
//! [`trigger::TriggerEvaluator`] resolves the X-Pick window, computes the KPI
//! (flat aggregation or pivot, see [`kpi`]), optionally fans out per legend
//! category (see [`legend`]) and applies the threshold.
//!
//! All numeric data comes from an external [`QueryEngine`].

pub mod compare;
pub mod config;
pub mod error;
pub mod kpi;
pub mod legend;
pub mod query;
pub mod trigger;
pub mod xpick;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use query::{AggregateRequest, PivotRequest, QueryResult};

/// The query engine that turns aggregation requests into tabular results
/// over an arbitrary relational source.
///
/// Implementations own their timeouts; errors are reported through
/// [`anyhow::Error`] and handled by the resolvers' fallbacks.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// `aggregate(source, agg, measure?, where?, legend?, x?, groupBy?)`.
    async fn aggregate(&self, req: &AggregateRequest) -> anyhow::Result<QueryResult>;

    /// `pivot(source, rows[], cols[], valueField?, aggregator, where?)`.
    async fn pivot(&self, req: &PivotRequest) -> anyhow::Result<QueryResult>;
}
