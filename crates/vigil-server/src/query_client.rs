//! HTTP adapter for the external query engine.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use vigil_alert::query::{AggregateRequest, PivotRequest, QueryResult};
use vigil_alert::QueryEngine;
use vigil_notify::utils::truncate_string;

use crate::config::QueryEngineConfig;

/// Posts requests as JSON to `<base_url>/aggregate` and `<base_url>/pivot`;
/// both answer `{columns, rows}`.
pub struct HttpQueryEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpQueryEngine {
    pub fn new(config: &QueryEngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let url = format!("{}/{path}", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "query engine returned {}: {}",
                status.as_u16(),
                truncate_string(&text, 500)
            );
        }
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding response of {url}"))
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    async fn aggregate(&self, req: &AggregateRequest) -> Result<QueryResult> {
        tracing::debug!(source = %req.source, agg = %req.agg, "Aggregate query");
        self.post("aggregate", req).await
    }

    async fn pivot(&self, req: &PivotRequest) -> Result<QueryResult> {
        tracing::debug!(source = %req.source, rows = req.rows.len(), "Pivot query");
        self.post("pivot", req).await
    }
}
