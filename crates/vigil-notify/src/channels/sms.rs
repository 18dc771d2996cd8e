use crate::error::{NotifyError, Result};
use crate::{RecipientResult, SmsSettings};
use std::time::Duration;

/// HTTP SMS gateway: one JSON POST per recipient, Bearer authenticated.
pub struct SmsChannel {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    sender: Option<String>,
}

impl SmsChannel {
    pub fn new(client: reqwest::Client, settings: &SmsSettings) -> Self {
        Self {
            client,
            gateway_url: settings.gateway_url.clone(),
            api_key: settings.api_key.clone(),
            sender: settings.sender.clone().filter(|s| !s.is_empty()),
        }
    }

    /// Sends to a single phone number, retrying up to 3 times.
    pub async fn send_one(&self, phone: &str, message: &str) -> Result<()> {
        let mut payload = serde_json::json!({
            "to": phone,
            "message": message,
        });
        if let Some(sender) = &self.sender {
            payload["from"] = serde_json::Value::String(sender.clone());
        }

        let mut last_err = None;
        for attempt in 0..3u32 {
            match self
                .client
                .post(&self.gateway_url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&payload)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    tracing::warn!(
                        attempt = attempt + 1,
                        phone = %phone,
                        status = %status,
                        "SMS gateway returned error, retrying"
                    );
                    last_err = Some(NotifyError::ApiError {
                        service: "sms".to_string(),
                        status: status.as_u16(),
                        body: crate::utils::truncate_string(&body, 200),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        phone = %phone,
                        error = %e,
                        "SMS send failed, retrying"
                    );
                    last_err = Some(e.into());
                }
            }
            if attempt < 2 {
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }

        let err = last_err.unwrap_or_else(|| NotifyError::ApiError {
            service: "sms".to_string(),
            status: 0,
            body: String::new(),
        });
        tracing::error!(phone = %phone, error = %err, "SMS failed after 3 retries");
        Err(err)
    }

    /// Sends to every recipient in order. A failure never stops the others.
    pub async fn send_all(&self, recipients: &[String], message: &str) -> Vec<RecipientResult> {
        let mut results = Vec::with_capacity(recipients.len());
        for phone in recipients {
            let result = match self.send_one(phone, message).await {
                Ok(()) => RecipientResult::success(phone),
                Err(e) => RecipientResult::failed(phone, e.to_string()),
            };
            results.push(result);
        }
        results
    }
}
