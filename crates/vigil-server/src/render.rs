//! Widget screenshots for the `CHART_IMG` token.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use vigil_alert::config::WidgetRef;
use vigil_notify::utils::truncate_string;

use crate::config::RendererConfig;

/// Output size and theme of a screenshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotOptions {
    pub width: u32,
    pub height: u32,
    pub theme: String,
}

impl From<&RendererConfig> for ShotOptions {
    fn from(config: &RendererConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            theme: config.theme.clone(),
        }
    }
}

#[async_trait]
pub trait WidgetRenderer: Send + Sync {
    /// PNG bytes of the widget, addressed through its dashboard or public
    /// share id.
    async fn render_widget_png(&self, widget: &WidgetRef, opts: &ShotOptions) -> Result<Vec<u8>>;
}

/// Calls a headless-rendering service over HTTP.
pub struct HttpWidgetRenderer {
    client: reqwest::Client,
    url: String,
}

impl HttpWidgetRenderer {
    pub fn new(config: &RendererConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.base_url.clone(),
        })
    }
}

#[async_trait]
impl WidgetRenderer for HttpWidgetRenderer {
    async fn render_widget_png(&self, widget: &WidgetRef, opts: &ShotOptions) -> Result<Vec<u8>> {
        if widget.dashboard_id.is_none() && widget.public_id.is_none() {
            anyhow::bail!("widget {} has neither a dashboard nor a public id", widget.widget_id);
        }
        let body = json!({
            "widgetId": widget.widget_id,
            "dashboardId": widget.dashboard_id,
            "publicId": widget.public_id,
            "width": opts.width,
            "height": opts.height,
            "theme": opts.theme,
        });
        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {}", self.url))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "renderer returned {}: {}",
                status.as_u16(),
                truncate_string(&text, 300)
            );
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            anyhow::bail!("renderer returned an empty image");
        }
        tracing::debug!(widget_id = %widget.widget_id, size = bytes.len(), "Rendered widget");
        Ok(bytes.to_vec())
    }
}
