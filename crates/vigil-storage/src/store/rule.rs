use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use vigil_common::types::RuleKind;

use crate::entities::alert_rule::{self, Column, Entity};
use crate::store::AlertStore;

/// One row of `alert_rules`. `config_json` is the rule configuration blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleRow {
    pub id: String,
    pub name: String,
    pub kind: RuleKind,
    pub enabled: bool,
    pub dashboard_id: Option<String>,
    pub widget_id: Option<String>,
    pub config_json: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by rule editing; `None` leaves a column as is.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertRuleUpdate {
    pub name: Option<String>,
    pub kind: Option<RuleKind>,
    pub enabled: Option<bool>,
    pub config_json: Option<String>,
}

fn to_row(m: alert_rule::Model) -> AlertRuleRow {
    let kind = m.kind.parse().unwrap_or_else(|e: String| {
        tracing::warn!(rule_id = %m.id, error = %e, "Unknown rule kind, treating as alert");
        RuleKind::Alert
    });
    AlertRuleRow {
        id: m.id,
        name: m.name,
        kind,
        enabled: m.enabled,
        dashboard_id: m.dashboard_id,
        widget_id: m.widget_id,
        config_json: m.config_json,
        last_run_at: m.last_run_at.map(|t| t.with_timezone(&Utc)),
        last_status: m.last_status,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl AlertStore {
    pub async fn insert_rule(&self, row: &AlertRuleRow) -> Result<AlertRuleRow> {
        let now = Utc::now().fixed_offset();
        let am = alert_rule::ActiveModel {
            id: Set(row.id.clone()),
            name: Set(row.name.clone()),
            kind: Set(row.kind.to_string()),
            enabled: Set(row.enabled),
            dashboard_id: Set(row.dashboard_id.clone()),
            widget_id: Set(row.widget_id.clone()),
            config_json: Set(row.config_json.clone()),
            last_run_at: Set(None),
            last_status: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_row(model))
    }

    pub async fn get_rule(&self, id: &str) -> Result<Option<AlertRuleRow>> {
        let model = Entity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(to_row))
    }

    pub async fn list_rules(
        &self,
        enabled: Option<bool>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRuleRow>> {
        let mut q = Entity::find();
        if let Some(en) = enabled {
            q = q.filter(Column::Enabled.eq(en));
        }
        let rows = q
            .order_by(Column::CreatedAt, Order::Desc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    /// Every enabled rule, oldest first. Input to scheduler reconciliation.
    pub async fn list_enabled_rules(&self) -> Result<Vec<AlertRuleRow>> {
        let rows = Entity::find()
            .filter(Column::Enabled.eq(true))
            .order_by(Column::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_row).collect())
    }

    pub async fn update_rule(
        &self,
        id: &str,
        update: &AlertRuleUpdate,
    ) -> Result<Option<AlertRuleRow>> {
        let Some(m) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(None);
        };
        let mut am: alert_rule::ActiveModel = m.into();
        if let Some(name) = &update.name {
            am.name = Set(name.clone());
        }
        if let Some(kind) = update.kind {
            am.kind = Set(kind.to_string());
        }
        if let Some(enabled) = update.enabled {
            am.enabled = Set(enabled);
        }
        if let Some(config_json) = &update.config_json {
            am.config_json = Set(config_json.clone());
        }
        am.updated_at = Set(Utc::now().fixed_offset());
        let updated = am.update(self.db()).await?;
        Ok(Some(to_row(updated)))
    }

    pub async fn delete_rule(&self, id: &str) -> Result<bool> {
        let res = Entity::delete_by_id(id).exec(self.db()).await?;
        Ok(res.rows_affected > 0)
    }

    /// Records the outcome of the latest run. Leaves `updated_at` alone:
    /// running a rule is not editing it.
    pub async fn set_last_run(&self, id: &str, at: DateTime<Utc>, status: &str) -> Result<bool> {
        let Some(m) = Entity::find_by_id(id).one(self.db()).await? else {
            return Ok(false);
        };
        let mut am: alert_rule::ActiveModel = m.into();
        am.last_run_at = Set(Some(at.fixed_offset()));
        am.last_status = Set(Some(status.to_string()));
        am.update(self.db()).await?;
        Ok(true)
    }
}
