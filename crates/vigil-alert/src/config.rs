//! Typed form of the rule configuration blob persisted on each alert rule.
//!
//! ```json
//! {
//!   "datasourceId": "ds-1",
//!   "triggersGroup": {
//!     "time": { "hour": 9, "minute": 0, "schedule": { "kind": "weekly", "days": [0, 2] } },
//!     "threshold": { "source": "sales", "aggregator": "sum", "measure": "amount",
//!                    "operator": ">=", "value": 1000 },
//!     "logic": "AND"
//!   },
//!   "actions": [{ "type": "email", "to": ["ops@example.com"], "subject": "Sales {{kpi_fmt}}" }],
//!   "render": { "mode": "kpi" },
//!   "template": "<p>Sales reached {{kpi_fmt}}</p>"
//! }
//! ```

use crate::compare::{CompareOp, Threshold};
use crate::query::{Aggregator, Filter};
use crate::xpick::XPick;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    #[serde(default)]
    pub datasource_id: Option<String>,
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    #[serde(default)]
    pub triggers_group: Option<GroupedTrigger>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default)]
    pub render: RenderSpec,
    #[serde(default)]
    pub template: Option<String>,
    /// Per-category card body used when legend grouping fans out.
    #[serde(default)]
    pub card_template: Option<String>,
}

impl RuleConfig {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// First explicit cron expression on any trigger, grouped trigger first.
    pub fn explicit_cron(&self) -> Option<&str> {
        let grouped = self.triggers_group.as_ref().and_then(|g| {
            g.time
                .as_ref()
                .and_then(|t| t.cron.as_deref())
                .or_else(|| g.threshold.as_ref().and_then(|t| t.cron.as_deref()))
        });
        grouped
            .or_else(|| self.triggers.iter().find_map(Trigger::cron))
            .filter(|c| !c.trim().is_empty())
    }

    /// Whether the scheduler has anything to evaluate for this rule.
    pub fn is_schedulable(&self) -> bool {
        let grouped = self
            .triggers_group
            .as_ref()
            .is_some_and(|g| g.time.is_some() || g.threshold.is_some());
        grouped || !self.triggers.is_empty()
    }

    /// The threshold condition previews and token rendering are based on.
    pub fn primary_threshold(&self) -> Option<&ThresholdCondition> {
        self.triggers_group
            .as_ref()
            .and_then(|g| g.threshold.as_ref())
            .or_else(|| {
                self.triggers.iter().find_map(|t| match t {
                    Trigger::Threshold(c) => Some(c),
                    Trigger::Time(_) => None,
                })
            })
    }
}

/// Legacy, independently evaluated trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Time(TimeCondition),
    Threshold(ThresholdCondition),
}

impl Trigger {
    fn cron(&self) -> Option<&str> {
        match self {
            Trigger::Time(t) => t.cron.as_deref(),
            Trigger::Threshold(t) => t.cron.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeCondition {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub hour: u32,
    pub minute: u32,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub cron: Option<String>,
}

/// Day filter on top of the hour:minute match.
///
/// Weekly days are `0` (Monday) through `6` (Sunday); monthly days are
/// `1..=31`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    #[default]
    Daily,
    Weekly {
        #[serde(default)]
        days: Vec<u32>,
    },
    Monthly {
        #[serde(default)]
        days: Vec<u32>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CalcMode {
    #[default]
    Query,
    Pivot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdCondition {
    pub source: String,
    #[serde(default)]
    pub aggregator: Aggregator,
    #[serde(default)]
    pub measure: Option<String>,
    #[serde(default)]
    pub filters: Filter,
    #[serde(default)]
    pub x_field: Option<String>,
    #[serde(default)]
    pub x_value: Option<Value>,
    #[serde(default)]
    pub x_pick: XPick,
    #[serde(default, deserialize_with = "one_or_many")]
    pub legend: Vec<String>,
    pub operator: CompareOp,
    /// Single number, or `[low, high]` for `between`.
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub calc_mode: CalcMode,
    #[serde(default)]
    pub cron: Option<String>,
}

impl ThresholdCondition {
    pub fn threshold(&self) -> Threshold {
        Threshold::new(self.operator, self.value.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Logic {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
}

impl Logic {
    pub fn combine(self, left: bool, right: bool) -> bool {
        match self {
            Logic::And => left && right,
            Logic::Or => left || right,
        }
    }
}

/// Time and threshold joined by AND/OR. An absent side counts as true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GroupedTrigger {
    #[serde(default)]
    pub time: Option<TimeCondition>,
    #[serde(default)]
    pub threshold: Option<ThresholdCondition>,
    #[serde(default)]
    pub logic: Logic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    Email {
        #[serde(deserialize_with = "recipient_list")]
        to: Vec<String>,
        #[serde(default)]
        subject: String,
    },
    Sms {
        #[serde(deserialize_with = "recipient_list")]
        to: Vec<String>,
        #[serde(default)]
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    #[default]
    Kpi,
    Table,
    Chart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSpec {
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default)]
    pub query_spec: Option<QuerySpec>,
    #[serde(default)]
    pub widget_ref: Option<WidgetRef>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Sub-query rendered as a table (or KPI preview) in the message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    pub source: String,
    #[serde(default)]
    pub aggregator: Aggregator,
    #[serde(default)]
    pub measure: Option<String>,
    #[serde(default, deserialize_with = "one_or_many")]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub filters: Filter,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetRef {
    pub widget_id: String,
    #[serde(default)]
    pub dashboard_id: Option<String>,
    #[serde(default)]
    pub public_id: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<OneOrMany>::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(OneOrMany::One(s)) if s.trim().is_empty() => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v.into_iter().filter(|s| !s.trim().is_empty()).collect(),
    })
}

/// Accepts `"a@x.com, b@x.com"` as well as `["a@x.com", "b@x.com"]`.
fn recipient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = OneOrMany::deserialize(deserializer)?;
    let items = match raw {
        OneOrMany::One(s) => s.split([',', ';']).map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}
