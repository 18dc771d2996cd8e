//! Message composition and delivery over email (SMTP) and SMS (HTTP gateway).
//!
//! [`template`] fills the token vocabulary into user templates and lays out
//! per-category cards; [`dispatcher::Dispatcher`] loads transport settings
//! through a [`SettingsProvider`], sends, and reports a [`SendOutcome`]
//! instead of failing.

pub mod bulk;
pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod template;
pub mod utils;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// `(ok, error)` result of one send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub ok: bool,
    pub error: Option<String>,
}

impl SendOutcome {
    pub fn success() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

/// Delivery state of one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Success => write!(f, "success"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Per-recipient delivery result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientResult {
    pub recipient: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

impl RecipientResult {
    pub fn success(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            status: DeliveryStatus::Success,
            error: None,
        }
    }

    pub fn failed(recipient: &str, error: impl Into<String>) -> Self {
        Self {
            recipient: recipient.to_string(),
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeliveryStatus::Success
    }
}

/// Image attached inline and referenced from HTML as `cid:<content_id>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub content_id: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Decrypted SMTP settings and email branding.
#[derive(Clone, Default)]
pub struct EmailSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub from_address: String,
    pub from_name: Option<String>,
    pub brand_name: String,
    /// URL or `data:` URI.
    pub logo: Option<String>,
    pub base_template: Option<String>,
    pub footer_text: Option<String>,
}

impl EmailSettings {
    pub fn is_usable(&self) -> bool {
        !self.host.trim().is_empty() && !self.from_address.trim().is_empty()
    }
}

impl std::fmt::Debug for EmailSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("use_tls", &self.use_tls)
            .field("from_address", &self.from_address)
            .field("brand_name", &self.brand_name)
            .finish_non_exhaustive()
    }
}

/// Decrypted SMS gateway settings.
#[derive(Clone, Default)]
pub struct SmsSettings {
    pub gateway_url: String,
    pub api_key: String,
    pub sender: Option<String>,
}

impl SmsSettings {
    pub fn is_usable(&self) -> bool {
        !self.gateway_url.trim().is_empty() && !self.api_key.trim().is_empty()
    }
}

impl std::fmt::Debug for SmsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmsSettings")
            .field("gateway_url", &self.gateway_url)
            .field("api_key", &"***")
            .field("sender", &self.sender)
            .finish()
    }
}

/// Read-only source of transport settings (the credential store).
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// `None` when no email configuration row exists.
    async fn email_settings(&self) -> anyhow::Result<Option<EmailSettings>>;

    /// `None` when no SMS configuration row exists.
    async fn sms_settings(&self) -> anyhow::Result<Option<SmsSettings>>;
}

/// Delivery seam used by the pipeline runner.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Wraps `html` in the branded base template and sends one message to
    /// all recipients.
    async fn send_email(
        &self,
        subject: &str,
        recipients: &[String],
        html: &str,
        inline_images: &[InlineImage],
    ) -> SendOutcome;

    /// Sends `message` to each recipient in turn.
    async fn send_sms(&self, recipients: &[String], message: &str) -> SendOutcome;
}
