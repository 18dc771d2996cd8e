use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.get_connection().execute_unprepared(UP_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL DEFAULT 'alert',
    enabled INTEGER NOT NULL DEFAULT 1,
    dashboard_id TEXT,
    widget_id TEXT,
    config_json TEXT NOT NULL DEFAULT '{}',
    last_run_at TEXT,
    last_status TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_enabled ON alert_rules(enabled);

CREATE TABLE IF NOT EXISTS alert_runs (
    id TEXT PRIMARY KEY NOT NULL,
    rule_id TEXT NOT NULL,
    origin TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    status TEXT NOT NULL,
    message TEXT NOT NULL DEFAULT ''
);
CREATE INDEX IF NOT EXISTS idx_alert_runs_rule_started ON alert_runs(rule_id, started_at DESC);

CREATE TABLE IF NOT EXISTS email_config (
    id TEXT PRIMARY KEY NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL DEFAULT 587,
    username TEXT,
    password_enc TEXT,
    use_tls INTEGER NOT NULL DEFAULT 1,
    from_address TEXT NOT NULL,
    from_name TEXT,
    brand_name TEXT NOT NULL DEFAULT '',
    logo TEXT,
    base_template TEXT,
    footer_text TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sms_config (
    id TEXT PRIMARY KEY NOT NULL,
    gateway_url TEXT NOT NULL,
    api_key_enc TEXT NOT NULL DEFAULT '',
    sender TEXT,
    updated_at TEXT NOT NULL
);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS sms_config;
DROP TABLE IF EXISTS email_config;
DROP TABLE IF EXISTS alert_runs;
DROP TABLE IF EXISTS alert_rules;
";
