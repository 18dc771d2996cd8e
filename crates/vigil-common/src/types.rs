use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a rule is for: an `alert` reacts to a condition, a `notification`
/// is a scheduled digest that usually only carries a time trigger.
///
/// # Examples
///
/// ```
/// use vigil_common::types::RuleKind;
///
/// let kind: RuleKind = "notification".parse().unwrap();
/// assert_eq!(kind, RuleKind::Notification);
/// assert_eq!(kind.to_string(), "notification");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    #[default]
    Alert,
    Notification,
}

impl std::fmt::Display for RuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleKind::Alert => write!(f, "alert"),
            RuleKind::Notification => write!(f, "notification"),
        }
    }
}

impl std::str::FromStr for RuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alert" => Ok(RuleKind::Alert),
            "notification" => Ok(RuleKind::Notification),
            _ => Err(format!("unknown rule kind: {s}")),
        }
    }
}

/// Lifecycle of one `alert_runs` row. A run is inserted as `Running` and
/// finalized exactly once as `Ok` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Ok,
    Failed,
}

impl RunStatus {
    pub fn is_final(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Ok => write!(f, "ok"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(RunStatus::Running),
            "ok" => Ok(RunStatus::Ok),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("unknown run status: {s}")),
        }
    }
}

/// Who started a run. Manual runs bypass the time condition and surface
/// pipeline failures to the caller; scheduled runs swallow them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOrigin {
    Scheduled,
    Manual,
}

impl std::fmt::Display for RunOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOrigin::Scheduled => write!(f, "scheduled"),
            RunOrigin::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for RunOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(RunOrigin::Scheduled),
            "manual" => Ok(RunOrigin::Manual),
            _ => Err(format!("unknown run origin: {s}")),
        }
    }
}

/// One invocation of the pipeline for a rule (the `alert_runs` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRun {
    pub id: String,
    pub rule_id: String,
    pub origin: RunOrigin,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub message: String,
}
