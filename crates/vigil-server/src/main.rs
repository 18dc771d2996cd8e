use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration};
use tracing_subscriber::EnvFilter;
use vigil_alert::config::RuleConfig;
use vigil_common::types::RunOrigin;
use vigil_notify::dispatcher::Dispatcher;
use vigil_storage::{AlertRuleRow, AlertStore};

use vigil_server::config::{SeedFile, ServerConfig};
use vigil_server::query_client::HttpQueryEngine;
use vigil_server::render::{HttpWidgetRenderer, ShotOptions, WidgetRenderer};
use vigil_server::runner::AlertRunner;
use vigil_server::scheduler::AlertScheduler;
use vigil_server::settings::StoreSettings;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  vigil-server [config.toml]                          Start the scheduler");
    eprintln!("  vigil-server run <config.toml> <rule_id>            Run one rule now (time condition forced)");
    eprintln!("  vigil-server preview <config.toml> <rule.json>      Evaluate a rule configuration without sending");
    eprintln!("  vigil-server seed <config.toml> <seed.json>         Load rules and transport settings from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|e| anyhow::anyhow!("Failed to install default CryptoProvider: {e:?}"))?;

    vigil_common::id::init(1, 1);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vigil=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let arg = |i: usize, what: &str| {
        args.get(i).map(String::as_str).ok_or_else(|| {
            print_usage();
            anyhow::anyhow!("missing argument <{what}>")
        })
    };

    match args.get(1).map(|s| s.as_str()) {
        Some("run") => run_once(arg(2, "config.toml")?, arg(3, "rule_id")?).await,
        Some("preview") => run_preview(arg(2, "config.toml")?, arg(3, "rule.json")?).await,
        Some("seed") => run_seed(arg(2, "config.toml")?, arg(3, "seed.json")?).await,
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<Arc<AlertStore>> {
    let db_url = config.database.connection_url();
    let store = AlertStore::connect(&db_url, Path::new(&config.database.data_dir)).await?;
    Ok(Arc::new(store))
}

async fn build_runner(config: &ServerConfig) -> Result<Arc<AlertRunner>> {
    let store = open_store(config).await?;
    let engine = Arc::new(HttpQueryEngine::new(&config.query_engine)?);
    let renderer: Option<Arc<dyn WidgetRenderer>> = if config.renderer.enabled {
        Some(Arc::new(HttpWidgetRenderer::new(&config.renderer)?))
    } else {
        None
    };
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(StoreSettings::new(store.clone())))?);
    let runner = AlertRunner::new(
        store,
        engine,
        renderer,
        ShotOptions::from(&config.renderer),
        dispatcher,
    )?;
    Ok(Arc::new(runner))
}

#[allow(clippy::print_stdout)]
async fn run_once(config_path: &str, rule_id: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let runner = build_runner(&config).await?;
    let outcome = runner.run_by_id(rule_id, true, RunOrigin::Manual).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if !outcome.ok {
        anyhow::bail!("rule {rule_id} run failed: {}", outcome.message);
    }
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn run_preview(config_path: &str, rule_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let raw = std::fs::read_to_string(rule_path)
        .map_err(|e| anyhow::anyhow!("Failed to read rule file '{}': {}", rule_path, e))?;
    let rule_config = RuleConfig::from_json(&raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse rule file '{}': {}", rule_path, e))?;
    let runner = build_runner(&config).await?;
    let preview = runner.evaluate(&rule_config).await;
    println!("{}", serde_json::to_string_pretty(&preview)?);
    Ok(())
}

/// Inserts seed rules (skipping names that already exist) and replaces the
/// transport settings when the seed carries them.
async fn run_seed(config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let store = open_store(&config).await?;

    let seed_content = std::fs::read_to_string(seed_path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{}': {}", seed_path, e))?;
    let seed: SeedFile = serde_json::from_str(&seed_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{}': {}", seed_path, e))?;

    let existing = store.list_rules(None, 10000, 0).await?;
    let existing_names: std::collections::HashSet<String> =
        existing.iter().map(|r| r.name.clone()).collect();

    let mut created = 0u32;
    let mut skipped = 0u32;
    for r in &seed.rules {
        if existing_names.contains(&r.name) {
            tracing::warn!(name = %r.name, "Alert rule already exists, skipping");
            skipped += 1;
            continue;
        }
        let config_json = r.config.to_string();
        if let Err(e) = RuleConfig::from_json(&config_json) {
            tracing::error!(name = %r.name, error = %e, "Invalid rule configuration, skipping");
            skipped += 1;
            continue;
        }
        let row = AlertRuleRow {
            id: vigil_common::id::next_id(),
            name: r.name.clone(),
            kind: r.kind,
            enabled: r.enabled,
            dashboard_id: r.dashboard_id.clone(),
            widget_id: r.widget_id.clone(),
            config_json,
            last_run_at: None,
            last_status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        match store.insert_rule(&row).await {
            Ok(inserted) => {
                tracing::info!(name = %r.name, id = %inserted.id, "Alert rule created");
                created += 1;
            }
            Err(e) => tracing::error!(name = %r.name, error = %e, "Failed to create alert rule"),
        }
    }

    if let Some(email) = &seed.email {
        store.upsert_email_config(email).await?;
    }
    if let Some(sms) = &seed.sms {
        store.upsert_sms_config(sms).await?;
    }

    tracing::info!(created, skipped, "seed completed");
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)
        .with_context(|| format!("loading {config_path}"))?;
    let runner = build_runner(&config).await?;

    if !config.scheduler.enabled {
        tracing::info!("Alert scheduler disabled, nothing to do");
        return Ok(());
    }

    let mut scheduler = AlertScheduler::new(runner.clone(), &config.scheduler.default_cron).await?;
    let report = scheduler.reconcile().await?;
    tracing::info!(jobs = report.total, "Initial reconciliation done");
    scheduler.start().await?;

    let reconcile_every = Duration::from_secs(config.scheduler.reconcile_interval_secs.max(1));
    {
        let reconcile_loop = async {
            let mut tick = interval(reconcile_every);
            // the first tick completes immediately and we just reconciled
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = scheduler.reconcile().await {
                    tracing::error!(error = %e, "Reconciliation failed");
                }
            }
        };

        tokio::select! {
            _ = reconcile_loop => {}
            _ = signal::ctrl_c() => {
                tracing::info!("Shutting down gracefully");
            }
        }
    }

    scheduler.shutdown().await?;
    tracing::info!(
        fired = runner.metrics().evaluations("fired"),
        not_fired = runner.metrics().evaluations("not_fired"),
        errors = runner.metrics().evaluations("error"),
        "Server stopped"
    );
    Ok(())
}
