use crate::bulk::{BulkJobs, BulkReport};
use crate::channels::email::EmailChannel;
use crate::channels::sms::SmsChannel;
use crate::error::{NotifyError, Result};
use crate::template::{wrap_email, Branding};
use crate::utils::decode_data_uri;
use crate::{
    EmailSettings, InlineImage, Notifier, RecipientResult, SendOutcome, SettingsProvider,
    SmsSettings,
};
use async_trait::async_trait;
use prometheus::{opts, IntCounterVec, Registry};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const LOGO_CONTENT_ID: &str = "brand-logo";

/// Delivery attempt counters, one series per `{channel, outcome}`.
#[derive(Clone)]
pub struct DispatchMetrics {
    registry: Registry,
    attempts: IntCounterVec,
}

impl DispatchMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let attempts = IntCounterVec::new(
            opts!(
                "vigil_dispatch_attempts_total",
                "notification send attempts by channel and outcome"
            ),
            &["channel", "outcome"],
        )?;
        registry.register(Box::new(attempts.clone()))?;
        Ok(Self { registry, attempts })
    }

    fn record(&self, channel: &str, outcome: &SendOutcome) {
        let label = if outcome.ok { "success" } else { "failure" };
        self.attempts.with_label_values(&[channel, label]).inc();
    }

    pub fn attempts(&self, channel: &str, outcome: &str) -> u64 {
        self.attempts.with_label_values(&[channel, outcome]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Email/SMS dispatcher. Settings are loaded per call, so edits to the
/// stored configuration take effect on the next send.
pub struct Dispatcher {
    settings: Arc<dyn SettingsProvider>,
    http: reqwest::Client,
    metrics: DispatchMetrics,
    // (logo source, decoded image); refetched only when the source changes
    logo_cache: Mutex<Option<(String, InlineImage)>>,
    bulk: BulkJobs,
}

impl Dispatcher {
    pub fn new(settings: Arc<dyn SettingsProvider>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            settings,
            http,
            metrics: DispatchMetrics::new()?,
            logo_cache: Mutex::new(None),
            bulk: BulkJobs::new(),
        })
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    pub fn bulk_jobs(&self) -> &BulkJobs {
        &self.bulk
    }

    async fn load_email_settings(&self) -> Result<EmailSettings> {
        self.settings
            .email_settings()
            .await
            .map_err(NotifyError::Settings)?
            .filter(EmailSettings::is_usable)
            .ok_or(NotifyError::NotConfigured("Email"))
    }

    async fn load_sms_settings(&self) -> Result<SmsSettings> {
        self.settings
            .sms_settings()
            .await
            .map_err(NotifyError::Settings)?
            .filter(SmsSettings::is_usable)
            .ok_or(NotifyError::NotConfigured("SMS"))
    }

    /// The branding logo as an inline image, fetched once per logo source.
    async fn logo_image(&self, source: &str) -> Result<InlineImage> {
        let mut cache = self.logo_cache.lock().await;
        if let Some((cached_source, image)) = cache.as_ref() {
            if cached_source == source {
                return Ok(image.clone());
            }
        }

        let (content_type, bytes) = match decode_data_uri(source) {
            Some(decoded) => decoded,
            None => {
                let resp = self.http.get(source).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(NotifyError::ApiError {
                        service: "logo".to_string(),
                        status: status.as_u16(),
                        body: String::new(),
                    });
                }
                let content_type = resp
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("image/png")
                    .to_string();
                (content_type, resp.bytes().await?.to_vec())
            }
        };
        let image = InlineImage {
            content_id: LOGO_CONTENT_ID.to_string(),
            content_type,
            bytes,
        };
        *cache = Some((source.to_string(), image.clone()));
        Ok(image)
    }

    async fn try_send_email(
        &self,
        subject: &str,
        recipients: &[String],
        html: &str,
        inline_images: &[InlineImage],
    ) -> Result<()> {
        let settings = self.load_email_settings().await?;
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let mut images = inline_images.to_vec();
        let mut logo_src = None;
        if let Some(source) = settings.logo.as_deref().filter(|s| !s.trim().is_empty()) {
            match self.logo_image(source).await {
                Ok(logo) => {
                    images.push(logo);
                    logo_src = Some(format!("cid:{LOGO_CONTENT_ID}"));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load email logo, sending without it");
                }
            }
        }

        let branding = Branding {
            brand_name: settings.brand_name.clone(),
            logo_src,
            footer_text: settings.footer_text.clone(),
            base_template: settings.base_template.clone(),
        };
        let wrapped = wrap_email(&branding, html);

        let channel = EmailChannel::new(&settings)?;
        channel.send(subject, recipients, &wrapped, &images).await
    }

    async fn try_send_sms(&self, recipients: &[String], message: &str) -> Result<()> {
        let settings = self.load_sms_settings().await?;
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        let channel = SmsChannel::new(self.http.clone(), &settings);
        let results = channel.send_all(recipients, message).await;
        let failures: Vec<&RecipientResult> = results.iter().filter(|r| !r.is_success()).collect();
        match failures.first() {
            None => Ok(()),
            Some(first) => Err(NotifyError::PartialFailure {
                failed: failures.len(),
                total: results.len(),
                first_error: first.error.clone().unwrap_or_default(),
            }),
        }
    }

    /// Sends `html` to each recipient separately, tracking progress under
    /// `job_id`. One recipient failing never stops the rest.
    pub async fn send_email_bulk(
        &self,
        job_id: &str,
        subject: &str,
        recipients: &[String],
        html: &str,
        inline_images: &[InlineImage],
    ) -> BulkReport {
        self.bulk.start(job_id, recipients.len());
        for recipient in recipients {
            let outcome = self
                .send_email(subject, std::slice::from_ref(recipient), html, inline_images)
                .await;
            self.bulk.record(job_id, recipient_result(recipient, outcome));
        }
        self.finish_bulk(job_id, recipients.len())
    }

    /// SMS counterpart of [`Dispatcher::send_email_bulk`].
    pub async fn send_sms_bulk(&self, job_id: &str, recipients: &[String], message: &str) -> BulkReport {
        self.bulk.start(job_id, recipients.len());
        for recipient in recipients {
            let outcome = self.send_sms(std::slice::from_ref(recipient), message).await;
            self.bulk.record(job_id, recipient_result(recipient, outcome));
        }
        self.finish_bulk(job_id, recipients.len())
    }

    fn finish_bulk(&self, job_id: &str, total: usize) -> BulkReport {
        let report = self.bulk.finish(job_id).unwrap_or(BulkReport {
            total,
            done: true,
            ..Default::default()
        });
        tracing::info!(
            job_id,
            total = report.total,
            success = report.success,
            failed = report.failed,
            "Bulk send finished"
        );
        report
    }
}

fn recipient_result(recipient: &str, outcome: SendOutcome) -> RecipientResult {
    match outcome.error {
        None if outcome.ok => RecipientResult::success(recipient),
        error => RecipientResult::failed(recipient, error.unwrap_or_default()),
    }
}

#[async_trait]
impl Notifier for Dispatcher {
    async fn send_email(
        &self,
        subject: &str,
        recipients: &[String],
        html: &str,
        inline_images: &[InlineImage],
    ) -> SendOutcome {
        let outcome = match self.try_send_email(subject, recipients, html, inline_images).await {
            Ok(()) => SendOutcome::success(),
            Err(e) => {
                tracing::warn!(recipients = recipients.len(), error = %e, "Email dispatch failed");
                SendOutcome::failure(e.to_string())
            }
        };
        self.metrics.record("email", &outcome);
        outcome
    }

    async fn send_sms(&self, recipients: &[String], message: &str) -> SendOutcome {
        let outcome = match self.try_send_sms(recipients, message).await {
            Ok(()) => SendOutcome::success(),
            Err(e) => {
                tracing::warn!(recipients = recipients.len(), error = %e, "SMS dispatch failed");
                SendOutcome::failure(e.to_string())
            }
        };
        self.metrics.record("sms", &outcome);
        outcome
    }
}
