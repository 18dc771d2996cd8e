//! Keeps one cron job per schedulable, enabled rule.

use anyhow::Result;
use chrono::{DateTime, Local};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;
use vigil_alert::config::RuleConfig;
use vigil_common::types::RunOrigin;
use vigil_storage::AlertRuleRow;

use crate::runner::AlertRunner;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    /// Jobs registered after the pass.
    pub total: usize,
}

/// Changes needed to move from the registered jobs to the desired ones.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub add: Vec<(String, String)>,
    pub update: Vec<(String, String)>,
    pub remove: Vec<String>,
}

/// rule id -> cron for every rule that should have a job. Rules whose
/// configuration does not parse or has no trigger are left out.
pub fn desired_jobs(rules: &[AlertRuleRow], default_cron: &str) -> BTreeMap<String, String> {
    let mut jobs = BTreeMap::new();
    for rule in rules.iter().filter(|r| r.enabled) {
        let config = match RuleConfig::from_json(&rule.config_json) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(rule_id = %rule.id, error = %e, "Skipping rule with invalid configuration");
                continue;
            }
        };
        if !config.is_schedulable() {
            continue;
        }
        let cron = config.explicit_cron().unwrap_or(default_cron).trim().to_string();
        jobs.insert(rule.id.clone(), cron);
    }
    jobs
}

/// Jobs whose cron is unchanged are left alone.
pub fn plan(current: &HashMap<String, String>, desired: &BTreeMap<String, String>) -> Plan {
    let mut plan = Plan::default();
    for (rule_id, cron) in desired {
        match current.get(rule_id) {
            None => plan.add.push((rule_id.clone(), cron.clone())),
            Some(existing) if existing != cron => plan.update.push((rule_id.clone(), cron.clone())),
            Some(_) => {}
        }
    }
    let mut remove: Vec<String> = current
        .keys()
        .filter(|id| !desired.contains_key(*id))
        .cloned()
        .collect();
    remove.sort();
    plan.remove = remove;
    plan
}

struct RegisteredJob {
    job_id: Uuid,
    cron: String,
}

/// Wraps a [`JobScheduler`]. Each job re-reads its rule when it fires and
/// skips the tick if the previous run of the same rule is still going, so
/// missed ticks coalesce instead of piling up.
pub struct AlertScheduler {
    scheduler: JobScheduler,
    runner: Arc<AlertRunner>,
    default_cron: String,
    jobs: Mutex<HashMap<String, RegisteredJob>>,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AlertScheduler {
    pub async fn new(runner: Arc<AlertRunner>, default_cron: &str) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            runner,
            default_cron: default_cron.to_string(),
            jobs: Mutex::new(HashMap::new()),
            in_flight: Arc::new(DashMap::new()),
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.scheduler.start().await?;
        tracing::info!(default_cron = %self.default_cron, "Alert scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown().await?;
        Ok(())
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Next scheduled tick for a rule's job, in server local time.
    pub async fn next_run(&self, rule_id: &str) -> Result<Option<DateTime<Local>>> {
        let Some(job_id) = self.jobs.lock().await.get(rule_id).map(|j| j.job_id) else {
            return Ok(None);
        };
        let mut scheduler = self.scheduler.clone();
        let next = scheduler.next_tick_for_job(job_id).await?;
        Ok(next.map(|t| t.with_timezone(&Local)))
    }

    fn build_job(&self, rule_id: &str, cron: &str) -> Result<Job> {
        let runner = self.runner.clone();
        let in_flight = self.in_flight.clone();
        let rule_id = rule_id.to_string();
        // local time, matching the clock the time conditions are checked against
        let job = Job::new_async_tz(cron, Local, move |_uuid, mut _l| {
            let runner = runner.clone();
            let in_flight = in_flight.clone();
            let rule_id = rule_id.clone();
            Box::pin(async move {
                let lock = in_flight.entry(rule_id.clone()).or_default().clone();
                let Ok(_guard) = lock.try_lock() else {
                    tracing::debug!(rule_id = %rule_id, "Previous run still in progress, skipping tick");
                    return;
                };
                run_scheduled(&runner, &rule_id).await;
            })
        })?;
        Ok(job)
    }

    /// Brings the registered jobs in line with the enabled rules in the
    /// store.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let rules = self.runner.store().list_enabled_rules().await?;
        let desired = desired_jobs(&rules, &self.default_cron);

        let mut jobs = self.jobs.lock().await;
        let current: HashMap<String, String> = jobs
            .iter()
            .map(|(id, job)| (id.clone(), job.cron.clone()))
            .collect();
        let plan = plan(&current, &desired);
        let mut report = ReconcileReport::default();

        for rule_id in &plan.remove {
            if let Some(job) = jobs.remove(rule_id) {
                self.scheduler.remove(&job.job_id).await?;
                self.in_flight.remove(rule_id);
                report.removed += 1;
            }
        }

        for (rule_id, cron, is_update) in plan
            .update
            .iter()
            .map(|(id, cron)| (id, cron, true))
            .chain(plan.add.iter().map(|(id, cron)| (id, cron, false)))
        {
            let job = match self.build_job(rule_id, cron) {
                Ok(job) => job,
                Err(e) => {
                    tracing::warn!(rule_id = %rule_id, cron = %cron, error = %e, "Invalid cron expression, rule not scheduled");
                    continue;
                }
            };
            if let Some(old) = jobs.remove(rule_id) {
                self.scheduler.remove(&old.job_id).await?;
            }
            let job_id = self.scheduler.add(job).await?;
            jobs.insert(
                rule_id.clone(),
                RegisteredJob {
                    job_id,
                    cron: cron.clone(),
                },
            );
            if is_update {
                report.updated += 1;
            } else {
                report.added += 1;
            }
        }

        report.total = jobs.len();
        if report.added + report.updated + report.removed > 0 {
            tracing::info!(
                added = report.added,
                updated = report.updated,
                removed = report.removed,
                total = report.total,
                "Reconciled alert jobs"
            );
        }
        Ok(report)
    }
}

async fn run_scheduled(runner: &AlertRunner, rule_id: &str) {
    let rule = match runner.store().get_rule(rule_id).await {
        Ok(Some(rule)) if rule.enabled => rule,
        Ok(_) => {
            tracing::debug!(rule_id = %rule_id, "Rule missing or disabled, skipping tick");
            return;
        }
        Err(e) => {
            tracing::error!(rule_id = %rule_id, error = %e, "Failed to load rule");
            return;
        }
    };
    if let Err(e) = runner.run(&rule, false, RunOrigin::Scheduled).await {
        tracing::error!(rule_id = %rule_id, error = %e, "Scheduled run could not be recorded");
    }
}
