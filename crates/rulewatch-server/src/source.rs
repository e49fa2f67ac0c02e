use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use rulewatch_core::config::MetricsApiConfig;
use rulewatch_core::metrics::PartialMetricRecord;
use rulewatch_core::MetricRecord;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("metric fetch for campaign {campaign_id} timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        campaign_id: String,
        timeout: Duration,
    },

    #[error("metric fetch for campaign {campaign_id} failed: {message}")]
    Fetch {
        campaign_id: String,
        message: String,
    },

    #[error("invalid metrics base URL '{0}'")]
    InvalidBaseUrl(String),

    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

// ---------------------------------------------------------------------------
// MetricSource
// ---------------------------------------------------------------------------

/// Supplies one metric record per campaign per poll.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError>;
}

/// Pick the source described by `config`: the HTTP proxy when a base URL is
/// set, synthesized values otherwise.
pub fn from_config(
    config: &MetricsApiConfig,
    timeout: Duration,
) -> Result<Arc<dyn MetricSource>, SourceError> {
    match &config.base_url {
        Some(base_url) => {
            let source =
                HttpMetricSource::new(base_url, config.bearer_token.clone(), timeout)?;
            tracing::info!(base_url = %base_url, "using HTTP metric source");
            Ok(Arc::new(source))
        }
        None => {
            tracing::info!("no metrics base URL configured; using synthesized metrics");
            Ok(Arc::new(SyntheticMetricSource))
        }
    }
}

// ---------------------------------------------------------------------------
// SyntheticMetricSource
// ---------------------------------------------------------------------------

/// Always returns synthesized in-range values.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntheticMetricSource;

#[async_trait]
impl MetricSource for SyntheticMetricSource {
    async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
        Ok(MetricRecord::synthesize(campaign_id))
    }
}

// ---------------------------------------------------------------------------
// HttpMetricSource
// ---------------------------------------------------------------------------

/// Fetches `GET {base_url}/campaigns/{id}` from the metrics proxy.
///
/// Never returns an error: transport failures, timeouts, non-success
/// statuses and non-JSON responses all yield a synthesized record instead.
pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: Url,
    bearer_token: Option<String>,
}

impl HttpMetricSource {
    pub fn new(
        base_url: &str,
        bearer_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let base_url = Url::parse(base_url)
            .ok()
            .filter(|u| !u.cannot_be_a_base())
            .ok_or_else(|| SourceError::InvalidBaseUrl(base_url.to_string()))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            bearer_token: bearer_token.filter(|t| !t.is_empty()),
        })
    }

    /// `{base_url}/campaigns/{campaign_id}` with the id percent-encoded as a
    /// single path segment.
    pub fn campaign_url(&self, campaign_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("campaigns").push(campaign_id);
        }
        url
    }

    async fn request(&self, campaign_id: &str) -> Result<MetricRecord, String> {
        let mut req = self
            .client
            .get(self.campaign_url(campaign_id))
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.bearer_token {
            req = req.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let resp = req.send().await.map_err(|e| e.to_string())?;
        let status = resp.status();
        if !status.is_success() {
            return Err(format!("request failed with status {status}"));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !content_type.contains("application/json") {
            return Err(format!("response is not JSON (content-type '{content_type}')"));
        }

        let partial: PartialMetricRecord = resp.json().await.map_err(|e| e.to_string())?;
        Ok(MetricRecord::normalize(campaign_id, partial))
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn fetch(&self, campaign_id: &str) -> Result<MetricRecord, SourceError> {
        match self.request(campaign_id).await {
            Ok(record) => Ok(record),
            Err(message) => {
                tracing::warn!(campaign_id, error = %message, "metric fetch failed; using synthesized values");
                Ok(MetricRecord::synthesize(campaign_id))
            }
        }
    }
}
