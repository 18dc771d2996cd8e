use anyhow::Result;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};
use vigil_common::types::{AlertRun, RunOrigin, RunStatus};

use crate::entities::alert_run::{self, Column, Entity};
use crate::store::AlertStore;

fn to_run(m: alert_run::Model) -> AlertRun {
    AlertRun {
        origin: m.origin.parse().unwrap_or(RunOrigin::Scheduled),
        status: m.status.parse().unwrap_or(RunStatus::Failed),
        id: m.id,
        rule_id: m.rule_id,
        started_at: m.started_at.with_timezone(&Utc),
        finished_at: m.finished_at.map(|t| t.with_timezone(&Utc)),
        message: m.message,
    }
}

impl AlertStore {
    /// Appends a `running` record before any evaluation work starts, so an
    /// invocation that dies halfway still leaves a trace.
    pub async fn insert_run(&self, rule_id: &str, origin: RunOrigin) -> Result<AlertRun> {
        let am = alert_run::ActiveModel {
            id: Set(vigil_common::id::next_id()),
            rule_id: Set(rule_id.to_string()),
            origin: Set(origin.to_string()),
            started_at: Set(Utc::now().fixed_offset()),
            finished_at: Set(None),
            status: Set(RunStatus::Running.to_string()),
            message: Set(String::new()),
        };
        let model = am.insert(self.db()).await?;
        Ok(to_run(model))
    }

    /// Sets the final status and message. A run is finalized once; later
    /// calls are rejected.
    pub async fn finalize_run(&self, id: &str, status: RunStatus, message: &str) -> Result<AlertRun> {
        if !status.is_final() {
            anyhow::bail!("run {id} cannot be finalized as {status}");
        }
        let Some(m) = Entity::find_by_id(id).one(self.db()).await? else {
            anyhow::bail!("run {id} not found");
        };
        if m.status != RunStatus::Running.to_string() {
            anyhow::bail!("run {id} is already finalized as {}", m.status);
        }
        let mut am: alert_run::ActiveModel = m.into();
        am.finished_at = Set(Some(Utc::now().fixed_offset()));
        am.status = Set(status.to_string());
        am.message = Set(message.to_string());
        let updated = am.update(self.db()).await?;
        Ok(to_run(updated))
    }

    pub async fn get_run(&self, id: &str) -> Result<Option<AlertRun>> {
        Ok(Entity::find_by_id(id).one(self.db()).await?.map(to_run))
    }

    /// Most recent runs of a rule, newest first.
    pub async fn list_runs(&self, rule_id: &str, limit: usize) -> Result<Vec<AlertRun>> {
        let rows = Entity::find()
            .filter(Column::RuleId.eq(rule_id))
            .order_by(Column::StartedAt, Order::Desc)
            .order_by(Column::Id, Order::Desc)
            .limit(limit as u64)
            .all(self.db())
            .await?;
        Ok(rows.into_iter().map(to_run).collect())
    }
}
