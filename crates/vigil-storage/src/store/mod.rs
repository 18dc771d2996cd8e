use anyhow::{Context, Result};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};
use std::path::Path;

use crate::crypto::SecretEncryptor;

pub mod rule;
pub mod run;
pub mod transport;

pub use rule::{AlertRuleRow, AlertRuleUpdate};
pub use transport::{EmailConfigRow, SmsConfigRow};

/// Rules, run history and transport settings, backed by SeaORM.
pub struct AlertStore {
    pub(crate) db: DatabaseConnection,
    pub(crate) secrets: SecretEncryptor,
}

impl AlertStore {
    /// Connects to `db_url` and runs pending migrations.
    ///
    /// SQLite example: `sqlite:///var/lib/vigil/vigil.db?mode=rwc`.
    /// `data_dir` holds the secret encryption key whatever the database is.
    pub async fn connect(db_url: &str, data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
        let db = Database::connect(db_url)
            .await
            .with_context(|| format!("connecting to {db_url}"))?;

        if db_url.starts_with("sqlite:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }
        Migrator::up(&db, None).await.context("running migrations")?;

        let secrets = SecretEncryptor::load_or_create(data_dir)?;
        tracing::info!(db_url = %db_url, "Initialized alert store");

        Ok(Self { db, secrets })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}
