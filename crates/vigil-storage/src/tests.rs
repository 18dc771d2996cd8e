use crate::crypto::SecretEncryptor;
use crate::{AlertRuleRow, AlertRuleUpdate, AlertStore, EmailConfigRow, SmsConfigRow};
use chrono::Utc;
use tempfile::TempDir;
use vigil_common::types::{RuleKind, RunOrigin, RunStatus};

async fn setup() -> (TempDir, AlertStore) {
    vigil_common::id::init(1, 1);
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite://{}/vigil.db?mode=rwc", dir.path().display());
    let store = AlertStore::connect(&url, dir.path()).await.unwrap();
    (dir, store)
}

fn rule(name: &str, enabled: bool) -> AlertRuleRow {
    let now = Utc::now();
    AlertRuleRow {
        id: vigil_common::id::next_id(),
        name: name.to_string(),
        kind: RuleKind::Alert,
        enabled,
        dashboard_id: Some("dash-1".into()),
        widget_id: None,
        config_json: r#"{"triggers":[]}"#.to_string(),
        last_run_at: None,
        last_status: None,
        created_at: now,
        updated_at: now,
    }
}

#[test]
fn secrets_round_trip_and_use_fresh_nonces() {
    let dir = TempDir::new().unwrap();
    let enc = SecretEncryptor::load_or_create(dir.path()).unwrap();
    let a = enc.encrypt("hunter2").unwrap();
    let b = enc.encrypt("hunter2").unwrap();
    assert_ne!(a, b);
    assert_eq!(enc.decrypt(&a).unwrap(), "hunter2");

    // same key file, same plaintext
    let reloaded = SecretEncryptor::load_or_create(dir.path()).unwrap();
    assert_eq!(reloaded.decrypt(&b).unwrap(), "hunter2");

    assert!(enc.decrypt("dG9vIHNob3J0").is_err());
    assert_eq!(enc.encrypt_opt(Some("")).unwrap(), None);
}

#[test]
fn rejects_key_of_wrong_length() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("token.key"), b"short").unwrap();
    assert!(SecretEncryptor::load_or_create(dir.path()).is_err());
}

#[tokio::test]
async fn rule_crud() {
    let (_dir, store) = setup().await;
    let inserted = store.insert_rule(&rule("daily sales", true)).await.unwrap();
    store.insert_rule(&rule("paused", false)).await.unwrap();

    let fetched = store.get_rule(&inserted.id).await.unwrap().unwrap();
    assert_eq!(fetched.name, "daily sales");
    assert_eq!(fetched.dashboard_id.as_deref(), Some("dash-1"));
    assert!(fetched.last_run_at.is_none());

    assert_eq!(store.list_rules(None, 10, 0).await.unwrap().len(), 2);
    let enabled = store.list_enabled_rules().await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].id, inserted.id);

    let updated = store
        .update_rule(
            &inserted.id,
            &AlertRuleUpdate {
                enabled: Some(false),
                kind: Some(RuleKind::Notification),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert!(!updated.enabled);
    assert_eq!(updated.kind, RuleKind::Notification);
    assert_eq!(updated.name, "daily sales");
    assert!(store.list_enabled_rules().await.unwrap().is_empty());

    assert!(store
        .update_rule("missing", &AlertRuleUpdate::default())
        .await
        .unwrap()
        .is_none());
    assert!(store.delete_rule(&inserted.id).await.unwrap());
    assert!(!store.delete_rule(&inserted.id).await.unwrap());
}

#[tokio::test]
async fn duplicate_rule_names_are_rejected() {
    let (_dir, store) = setup().await;
    store.insert_rule(&rule("same", true)).await.unwrap();
    assert!(store.insert_rule(&rule("same", true)).await.is_err());
}

#[tokio::test]
async fn last_run_fields() {
    let (_dir, store) = setup().await;
    let r = store.insert_rule(&rule("r", true)).await.unwrap();
    let at = Utc::now();
    assert!(store.set_last_run(&r.id, at, "No trigger fired").await.unwrap());
    let r = store.get_rule(&r.id).await.unwrap().unwrap();
    assert_eq!(r.last_status.as_deref(), Some("No trigger fired"));
    assert_eq!(r.last_run_at.map(|t| t.timestamp()), Some(at.timestamp()));
    assert!(!store.set_last_run("missing", at, "x").await.unwrap());
}

#[tokio::test]
async fn runs_are_created_running_and_finalized_once() {
    let (_dir, store) = setup().await;
    let run = store.insert_run("rule-1", RunOrigin::Manual).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert!(run.finished_at.is_none());

    assert!(store.finalize_run(&run.id, RunStatus::Running, "").await.is_err());
    let done = store.finalize_run(&run.id, RunStatus::Ok, "Sent email").await.unwrap();
    assert_eq!(done.status, RunStatus::Ok);
    assert_eq!(done.origin, RunOrigin::Manual);
    assert!(done.finished_at.is_some());
    assert!(store.finalize_run(&run.id, RunStatus::Failed, "late").await.is_err());

    let stored = store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(stored.message, "Sent email");
}

#[tokio::test]
async fn list_runs_is_scoped_and_limited() {
    let (_dir, store) = setup().await;
    for _ in 0..3 {
        store.insert_run("a", RunOrigin::Scheduled).await.unwrap();
    }
    store.insert_run("b", RunOrigin::Scheduled).await.unwrap();
    assert_eq!(store.list_runs("a", 10).await.unwrap().len(), 3);
    assert_eq!(store.list_runs("a", 2).await.unwrap().len(), 2);
    assert_eq!(store.list_runs("b", 10).await.unwrap().len(), 1);
    assert!(store.list_runs("c", 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn email_config_is_encrypted_at_rest() {
    let (_dir, store) = setup().await;
    assert!(store.get_email_config().await.unwrap().is_none());

    let cfg = EmailConfigRow {
        host: "smtp.example.com".into(),
        port: 587,
        username: Some("alerts".into()),
        password: Some("s3cret".into()),
        use_tls: true,
        from_address: "alerts@example.com".into(),
        brand_name: "Acme".into(),
        ..Default::default()
    };
    store.upsert_email_config(&cfg).await.unwrap();
    assert_eq!(store.get_email_config().await.unwrap(), Some(cfg.clone()));

    let raw = store.raw_email_password().await.unwrap().unwrap();
    assert!(!raw.contains("s3cret"));

    let changed = EmailConfigRow {
        port: 465,
        password: None,
        ..cfg
    };
    store.upsert_email_config(&changed).await.unwrap();
    let loaded = store.get_email_config().await.unwrap().unwrap();
    assert_eq!(loaded.port, 465);
    assert!(loaded.password.is_none());
}

#[tokio::test]
async fn sms_config_upsert() {
    let (_dir, store) = setup().await;
    assert!(store.get_sms_config().await.unwrap().is_none());
    let cfg = SmsConfigRow {
        gateway_url: "https://sms.example.com/send".into(),
        api_key: "key-123".into(),
        sender: Some("ACME".into()),
    };
    store.upsert_sms_config(&cfg).await.unwrap();
    store.upsert_sms_config(&cfg).await.unwrap();
    assert_eq!(store.get_sms_config().await.unwrap(), Some(cfg));
}
