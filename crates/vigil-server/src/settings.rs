use async_trait::async_trait;
use std::sync::Arc;
use vigil_notify::{EmailSettings, SettingsProvider, SmsSettings};
use vigil_storage::{AlertStore, EmailConfigRow, SmsConfigRow};

/// Reads transport settings from the `email_config` / `sms_config` rows on
/// every send, so edits apply without a restart.
pub struct StoreSettings {
    store: Arc<AlertStore>,
}

impl StoreSettings {
    pub fn new(store: Arc<AlertStore>) -> Self {
        Self { store }
    }
}

fn email_settings(row: EmailConfigRow) -> EmailSettings {
    EmailSettings {
        host: row.host,
        port: row.port,
        username: row.username,
        password: row.password,
        use_tls: row.use_tls,
        from_address: row.from_address,
        from_name: row.from_name,
        brand_name: row.brand_name,
        logo: row.logo,
        base_template: row.base_template,
        footer_text: row.footer_text,
    }
}

fn sms_settings(row: SmsConfigRow) -> SmsSettings {
    SmsSettings {
        gateway_url: row.gateway_url,
        api_key: row.api_key,
        sender: row.sender,
    }
}

#[async_trait]
impl SettingsProvider for StoreSettings {
    async fn email_settings(&self) -> anyhow::Result<Option<EmailSettings>> {
        Ok(self.store.get_email_config().await?.map(email_settings))
    }

    async fn sms_settings(&self) -> anyhow::Result<Option<SmsSettings>> {
        Ok(self.store.get_sms_config().await?.map(sms_settings))
    }
}
