//! Decides whether a rule fires on this tick.

use crate::config::{RuleConfig, Schedule, ThresholdCondition, TimeCondition, Trigger};
use crate::kpi::{resolve_kpi, KpiQuery};
use crate::legend::{legend_active, resolve_legend, LegendBreakdown};
use crate::xpick::{resolve_xpick, XPickInput, XPickResolution};
use crate::QueryEngine;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use std::sync::Arc;

/// Outcome of one threshold condition. Exactly one of no-fire, a single
/// KPI, or a per-category breakdown.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ThresholdOutcome {
    NotFired {
        kpi: f64,
        breakdown: Option<LegendBreakdown>,
    },
    Fired {
        kpi: f64,
    },
    FiredPerCategory(LegendBreakdown),
}

impl ThresholdOutcome {
    pub fn fired(&self) -> bool {
        !matches!(self, ThresholdOutcome::NotFired { .. })
    }

    pub fn kpi(&self) -> f64 {
        match self {
            ThresholdOutcome::NotFired { kpi, .. } | ThresholdOutcome::Fired { kpi } => *kpi,
            ThresholdOutcome::FiredPerCategory(b) => b.kpi(),
        }
    }

    pub fn breakdown(&self) -> Option<&LegendBreakdown> {
        match self {
            ThresholdOutcome::NotFired { breakdown, .. } => breakdown.as_ref(),
            ThresholdOutcome::Fired { .. } => None,
            ThresholdOutcome::FiredPerCategory(b) => Some(b),
        }
    }
}

/// A threshold condition together with the context it was evaluated in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdEvaluation {
    pub condition: ThresholdCondition,
    pub xpick: XPickResolution,
    pub outcome: ThresholdOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub fired: bool,
    pub kpi: Option<f64>,
    /// Time side of a grouped trigger, when configured.
    pub time_ok: Option<bool>,
    /// Threshold that fired, or the last one evaluated.
    pub threshold: Option<ThresholdEvaluation>,
}

impl Evaluation {
    pub fn breakdown(&self) -> Option<&LegendBreakdown> {
        self.threshold.as_ref().and_then(|t| t.outcome.breakdown())
    }
}

/// `force` short-circuits to true (manual "run now"). A disabled condition
/// is vacuously true.
pub fn time_condition_met(cond: &TimeCondition, now: NaiveDateTime, force: bool) -> bool {
    if force || !cond.enabled {
        return true;
    }
    if now.hour() != cond.hour || now.minute() != cond.minute {
        return false;
    }
    match &cond.schedule {
        Schedule::Daily => true,
        Schedule::Weekly { days } => days.contains(&now.weekday().num_days_from_monday()),
        Schedule::Monthly { days } => days.contains(&now.day()),
    }
}

/// Evaluates rule configurations against a [`QueryEngine`].
#[derive(Clone)]
pub struct TriggerEvaluator {
    engine: Arc<dyn QueryEngine>,
}

impl TriggerEvaluator {
    pub fn new(engine: Arc<dyn QueryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &dyn QueryEngine {
        self.engine.as_ref()
    }

    /// Resolves X-Pick, then either the legend breakdown or the single KPI,
    /// and applies the threshold. Never fails; resolution errors have
    /// already taken their fallbacks.
    pub async fn evaluate_threshold(
        &self,
        cond: &ThresholdCondition,
        today: NaiveDate,
    ) -> ThresholdEvaluation {
        let engine = self.engine.as_ref();
        let xpick = resolve_xpick(
            engine,
            XPickInput {
                source: &cond.source,
                filter: &cond.filters,
                x_field: cond.x_field.as_deref(),
                x_value: cond.x_value.as_ref(),
                pick: &cond.x_pick,
            },
            today,
        )
        .await;

        let threshold = cond.threshold();
        let query = KpiQuery {
            source: cond.source.clone(),
            aggregator: cond.aggregator,
            measure: cond.measure.clone(),
            filter: xpick.filter.clone(),
            x_field: cond.x_field.clone(),
            mode: cond.calc_mode,
        };

        if legend_active(&cond.legend, &xpick.filter) {
            match resolve_legend(engine, &query, &cond.legend, &threshold).await {
                Ok(breakdown) => {
                    let outcome = if breakdown.fired() {
                        ThresholdOutcome::FiredPerCategory(breakdown)
                    } else {
                        ThresholdOutcome::NotFired {
                            kpi: breakdown.kpi(),
                            breakdown: Some(breakdown),
                        }
                    };
                    return ThresholdEvaluation {
                        condition: cond.clone(),
                        xpick,
                        outcome,
                    };
                }
                Err(e) => {
                    tracing::warn!(
                        source = %cond.source,
                        error = %e,
                        "Legend grouping failed, using single KPI"
                    );
                }
            }
        }

        let kpi = resolve_kpi(engine, &query).await;
        let outcome = if threshold.matches(kpi) {
            ThresholdOutcome::Fired { kpi }
        } else {
            ThresholdOutcome::NotFired {
                kpi,
                breakdown: None,
            }
        };
        ThresholdEvaluation {
            condition: cond.clone(),
            xpick,
            outcome,
        }
    }

    /// Grouped trigger when present (both sides always evaluated, absent
    /// side vacuously true), else the legacy list where the first true
    /// trigger wins.
    pub async fn evaluate(&self, config: &RuleConfig, now: NaiveDateTime, force: bool) -> Evaluation {
        let today = now.date();

        if let Some(group) = &config.triggers_group {
            let time_ok = group
                .time
                .as_ref()
                .map(|t| time_condition_met(t, now, force));
            let threshold = match &group.threshold {
                Some(cond) => Some(self.evaluate_threshold(cond, today).await),
                None => None,
            };
            let thr_ok = threshold.as_ref().map_or(true, |t| t.outcome.fired());
            let fired = group.logic.combine(time_ok.unwrap_or(true), thr_ok);
            return Evaluation {
                fired,
                kpi: threshold.as_ref().map(|t| t.outcome.kpi()),
                time_ok,
                threshold,
            };
        }

        let mut last_threshold = None;
        for trigger in &config.triggers {
            match trigger {
                // the scheduler only invokes us on the trigger's own cadence,
                // so a legacy time trigger fires whether or not it is enabled
                Trigger::Time(_) => {
                    return Evaluation {
                        fired: true,
                        kpi: None,
                        time_ok: None,
                        threshold: None,
                    };
                }
                Trigger::Threshold(cond) => {
                    let eval = self.evaluate_threshold(cond, today).await;
                    if eval.outcome.fired() {
                        return Evaluation {
                            fired: true,
                            kpi: Some(eval.outcome.kpi()),
                            time_ok: None,
                            threshold: Some(eval),
                        };
                    }
                    last_threshold = Some(eval);
                }
            }
        }

        Evaluation {
            fired: false,
            kpi: last_threshold.as_ref().map(|t| t.outcome.kpi()),
            time_ok: None,
            threshold: last_threshold,
        }
    }
}
