use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use serde::{Deserialize, Serialize};

use crate::entities::{email_config, sms_config};
use crate::store::AlertStore;

/// Both transport tables hold at most one row, keyed by this id.
const SINGLETON_ID: &str = "default";

/// Decrypted `email_config` row.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfigRow {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: Option<String>,
    pub brand_name: String,
    pub logo: Option<String>,
    pub base_template: Option<String>,
    pub footer_text: Option<String>,
}

impl std::fmt::Debug for EmailConfigRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfigRow")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from_address", &self.from_address)
            .finish_non_exhaustive()
    }
}

/// Decrypted `sms_config` row.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfigRow {
    pub gateway_url: String,
    pub api_key: String,
    pub sender: Option<String>,
}

impl std::fmt::Debug for SmsConfigRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsConfigRow")
            .field("gateway_url", &self.gateway_url)
            .field("api_key", &"***")
            .field("sender", &self.sender)
            .finish()
    }
}

impl AlertStore {
    pub async fn get_email_config(&self) -> Result<Option<EmailConfigRow>> {
        let Some(m) = email_config::Entity::find_by_id(SINGLETON_ID)
            .one(self.db())
            .await?
        else {
            return Ok(None);
        };
        let password = m
            .password_enc
            .as_deref()
            .map(|enc| self.secrets.decrypt(enc))
            .transpose()
            .context("decrypting SMTP password")?;
        Ok(Some(EmailConfigRow {
            host: m.host,
            port: u16::try_from(m.port).with_context(|| format!("invalid SMTP port {}", m.port))?,
            username: m.username,
            password,
            use_tls: m.use_tls,
            from_address: m.from_address,
            from_name: m.from_name,
            brand_name: m.brand_name,
            logo: m.logo,
            base_template: m.base_template,
            footer_text: m.footer_text,
        }))
    }

    /// Inserts or replaces the email settings, encrypting the password.
    pub async fn upsert_email_config(&self, cfg: &EmailConfigRow) -> Result<()> {
        let existing = email_config::Entity::find_by_id(SINGLETON_ID)
            .one(self.db())
            .await?;
        let am = email_config::ActiveModel {
            id: Set(SINGLETON_ID.to_string()),
            host: Set(cfg.host.clone()),
            port: Set(i32::from(cfg.port)),
            username: Set(cfg.username.clone()),
            password_enc: Set(self.secrets.encrypt_opt(cfg.password.as_deref())?),
            use_tls: Set(cfg.use_tls),
            from_address: Set(cfg.from_address.clone()),
            from_name: Set(cfg.from_name.clone()),
            brand_name: Set(cfg.brand_name.clone()),
            logo: Set(cfg.logo.clone()),
            base_template: Set(cfg.base_template.clone()),
            footer_text: Set(cfg.footer_text.clone()),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        if existing.is_some() {
            am.update(self.db()).await?;
        } else {
            am.insert(self.db()).await?;
        }
        tracing::info!(host = %cfg.host, port = cfg.port, "Saved email configuration");
        Ok(())
    }

    pub async fn get_sms_config(&self) -> Result<Option<SmsConfigRow>> {
        let Some(m) = sms_config::Entity::find_by_id(SINGLETON_ID)
            .one(self.db())
            .await?
        else {
            return Ok(None);
        };
        let api_key = if m.api_key_enc.is_empty() {
            String::new()
        } else {
            self.secrets
                .decrypt(&m.api_key_enc)
                .context("decrypting SMS api key")?
        };
        Ok(Some(SmsConfigRow {
            gateway_url: m.gateway_url,
            api_key,
            sender: m.sender,
        }))
    }

    pub async fn upsert_sms_config(&self, cfg: &SmsConfigRow) -> Result<()> {
        let existing = sms_config::Entity::find_by_id(SINGLETON_ID)
            .one(self.db())
            .await?;
        let am = sms_config::ActiveModel {
            id: Set(SINGLETON_ID.to_string()),
            gateway_url: Set(cfg.gateway_url.clone()),
            api_key_enc: Set(self
                .secrets
                .encrypt_opt(Some(&cfg.api_key))?
                .unwrap_or_default()),
            sender: Set(cfg.sender.clone()),
            updated_at: Set(Utc::now().fixed_offset()),
        };
        if existing.is_some() {
            am.update(self.db()).await?;
        } else {
            am.insert(self.db()).await?;
        }
        tracing::info!(gateway_url = %cfg.gateway_url, "Saved SMS configuration");
        Ok(())
    }

    /// Raw ciphertext of the stored SMTP password, for checking encryption
    /// at rest.
    #[cfg(test)]
    pub(crate) async fn raw_email_password(&self) -> Result<Option<String>> {
        Ok(email_config::Entity::find_by_id(SINGLETON_ID)
            .one(self.db())
            .await?
            .and_then(|m| m.password_enc))
    }
}
