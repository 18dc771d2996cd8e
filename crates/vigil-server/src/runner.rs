//! The evaluation pipeline: trigger evaluation, composition, delivery and
//! run bookkeeping for one rule.

use chrono::{Local, NaiveDateTime, Utc};
use prometheus::{opts, IntCounterVec, Registry};
use serde::Serialize;
use std::sync::Arc;
use vigil_alert::config::{Action, RuleConfig};
use vigil_alert::trigger::{Evaluation, TriggerEvaluator};
use vigil_alert::QueryEngine;
use vigil_common::types::{RunOrigin, RunStatus};
use vigil_notify::template::{format_kpi, TokenMap};
use vigil_notify::utils::{truncate_string, MAX_BODY_LENGTH};
use vigil_notify::Notifier;
use vigil_storage::{AlertRuleRow, AlertStore};

use crate::compose::{ComposedMessage, Composer};
use crate::render::{ShotOptions, WidgetRenderer};

pub const NO_TRIGGER_FIRED: &str = "No trigger fired";

/// Failures of the pipeline itself, as opposed to delivery failures which
/// are reported in the run message.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Run: invalid rule configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Run: storage error: {0:#}")]
    Store(anyhow::Error),

    #[error("Run: rule {0} not found")]
    RuleNotFound(String),
}

/// `(ok, message)` of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub ok: bool,
    pub message: String,
}

impl RunOutcome {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }
}

/// Side-effect free evaluation result shown while authoring a rule.
#[derive(Debug, Clone, Serialize)]
pub struct Preview {
    pub fired: bool,
    pub kpi: Option<f64>,
    pub html: String,
    pub sms: Option<String>,
    pub context: TokenMap,
    pub evaluation: Evaluation,
}

#[derive(Clone)]
pub struct RunnerMetrics {
    registry: Registry,
    evaluations: IntCounterVec,
}

impl RunnerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let evaluations = IntCounterVec::new(
            opts!("vigil_evaluations_total", "rule evaluations by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(evaluations.clone()))?;
        Ok(Self {
            registry,
            evaluations,
        })
    }

    fn record(&self, outcome: &str) {
        self.evaluations.with_label_values(&[outcome]).inc();
    }

    /// Count for `fired`, `not_fired` or `error`.
    pub fn evaluations(&self, outcome: &str) -> u64 {
        self.evaluations.with_label_values(&[outcome]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

pub struct AlertRunner {
    store: Arc<AlertStore>,
    evaluator: TriggerEvaluator,
    composer: Composer,
    notifier: Arc<dyn Notifier>,
    metrics: RunnerMetrics,
}

impl AlertRunner {
    pub fn new(
        store: Arc<AlertStore>,
        engine: Arc<dyn QueryEngine>,
        renderer: Option<Arc<dyn WidgetRenderer>>,
        shot: ShotOptions,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            evaluator: TriggerEvaluator::new(engine.clone()),
            composer: Composer::new(engine, renderer, shot),
            notifier,
            metrics: RunnerMetrics::new()?,
        })
    }

    pub fn metrics(&self) -> &RunnerMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    /// Evaluates and renders without sending or recording anything. The
    /// time condition is treated as met so the preview does not depend on
    /// the wall clock.
    pub async fn evaluate(&self, config: &RuleConfig) -> Preview {
        self.evaluate_at(config, Local::now().naive_local()).await
    }

    pub async fn evaluate_at(&self, config: &RuleConfig, now: NaiveDateTime) -> Preview {
        let evaluation = self.evaluator.evaluate(config, now, true).await;
        let composed = self.composer.compose(config, &evaluation).await;
        let sms = config.actions.iter().find_map(|a| match a {
            Action::Sms { message, .. } => Some(composed.sms(message)),
            Action::Email { .. } => None,
        });
        Preview {
            fired: evaluation.fired,
            kpi: evaluation.kpi,
            html: composed.html,
            sms,
            context: composed.tokens,
            evaluation,
        }
    }

    /// Loads the rule and runs it.
    pub async fn run_by_id(
        &self,
        rule_id: &str,
        force: bool,
        origin: RunOrigin,
    ) -> Result<RunOutcome, RunError> {
        let rule = self
            .store
            .get_rule(rule_id)
            .await
            .map_err(RunError::Store)?
            .ok_or_else(|| RunError::RuleNotFound(rule_id.to_string()))?;
        self.run(&rule, force, origin).await
    }

    /// Runs the full pipeline for `rule`, recording an `alert_runs` row and
    /// the rule's last-run fields.
    ///
    /// `force` treats the time condition as met. Pipeline errors are
    /// returned to manual callers; scheduled runs log them and report
    /// `ok = false` instead.
    pub async fn run(
        &self,
        rule: &AlertRuleRow,
        force: bool,
        origin: RunOrigin,
    ) -> Result<RunOutcome, RunError> {
        let run = self
            .store
            .insert_run(&rule.id, origin)
            .await
            .map_err(RunError::Store)?;

        let result = self.execute(rule, force).await;
        let outcome = match &result {
            Ok(outcome) => outcome.clone(),
            Err(e) => {
                self.metrics.record("error");
                RunOutcome {
                    ok: false,
                    message: e.to_string(),
                }
            }
        };
        let status = if outcome.ok {
            RunStatus::Ok
        } else {
            RunStatus::Failed
        };
        let message = truncate_string(&outcome.message, MAX_BODY_LENGTH);

        if let Err(e) = self.store.finalize_run(&run.id, status, &message).await {
            tracing::warn!(rule_id = %rule.id, run_id = %run.id, error = %e, "Failed to finalize run");
        }
        if let Err(e) = self.store.set_last_run(&rule.id, Utc::now(), &message).await {
            tracing::warn!(rule_id = %rule.id, error = %e, "Failed to record last run");
        }

        match result {
            Ok(outcome) => {
                tracing::info!(rule_id = %rule.id, %origin, ok = outcome.ok, message = %outcome.message, "Rule run finished");
                Ok(outcome)
            }
            Err(e) if origin == RunOrigin::Manual => Err(e),
            Err(e) => {
                tracing::error!(rule_id = %rule.id, error = %e, "Scheduled rule run failed");
                Ok(outcome)
            }
        }
    }

    async fn execute(&self, rule: &AlertRuleRow, force: bool) -> Result<RunOutcome, RunError> {
        let config = RuleConfig::from_json(&rule.config_json)?;
        let evaluation = self
            .evaluator
            .evaluate(&config, Local::now().naive_local(), force)
            .await;

        if !evaluation.fired {
            self.metrics.record("not_fired");
            return Ok(RunOutcome::ok(NO_TRIGGER_FIRED));
        }
        self.metrics.record("fired");

        let composed = self.composer.compose(&config, &evaluation).await;
        let summary = self.dispatch(rule, &config, &composed).await;

        let head = match evaluation.kpi {
            Some(kpi) => format!("Fired (kpi {})", format_kpi(kpi)),
            None => "Fired".to_string(),
        };
        Ok(match summary {
            None => RunOutcome::ok(format!("{head}; no actions configured")),
            Some((ok, parts)) => RunOutcome {
                ok,
                message: format!("{head}: {}", parts.join("; ")),
            },
        })
    }

    /// Sends every action; one failing action never stops the others.
    /// `None` when the rule has no actions.
    async fn dispatch(
        &self,
        rule: &AlertRuleRow,
        config: &RuleConfig,
        composed: &ComposedMessage,
    ) -> Option<(bool, Vec<String>)> {
        if config.actions.is_empty() {
            return None;
        }
        let mut all_ok = true;
        let mut parts = Vec::with_capacity(config.actions.len());
        for action in &config.actions {
            let (channel, recipients, outcome) = match action {
                Action::Email { to, subject } => {
                    let template = if subject.trim().is_empty() {
                        rule.name.as_str()
                    } else {
                        subject.as_str()
                    };
                    let subject = composed.subject(template);
                    let outcome = self
                        .notifier
                        .send_email(&subject, to, &composed.html, &composed.images)
                        .await;
                    ("email", to.len(), outcome)
                }
                Action::Sms { to, message } => {
                    let text = composed.sms(message);
                    let outcome = self.notifier.send_sms(to, &text).await;
                    ("sms", to.len(), outcome)
                }
            };
            match outcome.error {
                None if outcome.ok => parts.push(format!("{channel} sent to {recipients} recipient(s)")),
                error => {
                    all_ok = false;
                    let error = error.unwrap_or_else(|| "unknown error".to_string());
                    tracing::warn!(rule_id = %rule.id, channel, error = %error, "Action failed");
                    parts.push(format!("{channel} failed: {error}"));
                }
            }
        }
        Some((all_ok, parts))
    }
}
