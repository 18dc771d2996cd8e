#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, OnceLock};
use tempfile::TempDir;
use vigil_alert::query::{AggregateRequest, PivotRequest, QueryResult};
use vigil_alert::QueryEngine;
use vigil_common::types::RuleKind;
use vigil_notify::{InlineImage, Notifier, SendOutcome};
use vigil_server::render::ShotOptions;
use vigil_server::runner::AlertRunner;
use vigil_storage::{AlertRuleRow, AlertStore};

/// Query engine with a settable total. Grouped requests get one row per
/// region from `regions`.
pub struct FakeEngine {
    total: Mutex<f64>,
    regions: Vec<(&'static str, f64)>,
    pub calls: Mutex<Vec<AggregateRequest>>,
}

impl FakeEngine {
    pub fn new(total: f64) -> Self {
        Self {
            total: Mutex::new(total),
            regions: vec![("west", 800.0), ("east", 1200.0)],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_total(&self, total: f64) {
        *self.total.lock().unwrap() = total;
    }
}

#[async_trait]
impl QueryEngine for FakeEngine {
    async fn aggregate(&self, req: &AggregateRequest) -> Result<QueryResult> {
        self.calls.lock().unwrap().push(req.clone());
        if req.group_by.is_empty() {
            return Ok(QueryResult {
                columns: vec!["value".into()],
                rows: vec![vec![json!(*self.total.lock().unwrap())]],
            });
        }
        Ok(QueryResult {
            columns: vec![req.group_by[0].clone(), "value".into()],
            rows: self
                .regions
                .iter()
                .map(|(name, v)| vec![json!(name), json!(v)])
                .collect(),
        })
    }

    async fn pivot(&self, _req: &PivotRequest) -> Result<QueryResult> {
        anyhow::bail!("pivot not supported by the fake engine")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Email {
        subject: String,
        recipients: Vec<String>,
        html: String,
    },
    Sms {
        recipients: Vec<String>,
        message: String,
    },
}

/// Captures every message instead of sending it.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_email(
        &self,
        subject: &str,
        recipients: &[String],
        html: &str,
        _inline_images: &[InlineImage],
    ) -> SendOutcome {
        self.sent.lock().unwrap().push(Sent::Email {
            subject: subject.to_string(),
            recipients: recipients.to_vec(),
            html: html.to_string(),
        });
        SendOutcome::success()
    }

    async fn send_sms(&self, recipients: &[String], message: &str) -> SendOutcome {
        self.sent.lock().unwrap().push(Sent::Sms {
            recipients: recipients.to_vec(),
            message: message.to_string(),
        });
        SendOutcome::success()
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub store: Arc<AlertStore>,
    pub engine: Arc<FakeEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub runner: Arc<AlertRunner>,
}

fn ensure_rustls_provider() {
    static RUSTLS_PROVIDER_INIT: OnceLock<()> = OnceLock::new();
    RUSTLS_PROVIDER_INIT.get_or_init(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn shot() -> ShotOptions {
    ShotOptions {
        width: 800,
        height: 400,
        theme: "light".into(),
    }
}

pub async fn open_store(temp_dir: &TempDir) -> Result<Arc<AlertStore>> {
    let url = format!("sqlite://{}/vigil.db?mode=rwc", temp_dir.path().display());
    Ok(Arc::new(AlertStore::connect(&url, temp_dir.path()).await?))
}

fn ensure_id_generator() {
    static ID_INIT: OnceLock<()> = OnceLock::new();
    ID_INIT.get_or_init(|| vigil_common::id::init(1, 1));
}

pub async fn build_test_context() -> Result<TestContext> {
    ensure_id_generator();
    ensure_rustls_provider();

    let temp_dir = tempfile::tempdir()?;
    let store = open_store(&temp_dir).await?;
    let engine = Arc::new(FakeEngine::new(1500.0));
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = Arc::new(AlertRunner::new(
        store.clone(),
        engine.clone(),
        None,
        shot(),
        notifier.clone(),
    )?);

    Ok(TestContext {
        temp_dir,
        store,
        engine,
        notifier,
        runner,
    })
}

pub fn sales_threshold(value: Value) -> Value {
    json!({
        "source": "sales",
        "aggregator": "sum",
        "measure": "amount",
        "operator": ">=",
        "value": value
    })
}

pub fn email_action() -> Value {
    json!({ "type": "email", "to": "ops@example.com", "subject": "{{source}} at {{kpi_fmt}}" })
}

pub async fn insert_rule(ctx: &TestContext, id: &str, config: Value) -> Result<AlertRuleRow> {
    let now = Utc::now();
    ctx.store
        .insert_rule(&AlertRuleRow {
            id: id.to_string(),
            name: format!("rule {id}"),
            kind: RuleKind::Alert,
            enabled: true,
            dashboard_id: None,
            widget_id: None,
            config_json: config.to_string(),
            last_run_at: None,
            last_status: None,
            created_at: now,
            updated_at: now,
        })
        .await
}
