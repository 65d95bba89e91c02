//! OpenRouter provider implementation.
//!
//! Reads the key endpoint (`GET {base}/api/v1/key`), which reports the
//! key's credit limit, spend so far, and request rate limit.
//!
//! Metrics: `credits`, `requests`.

use reqwest::Client;
use serde::Deserialize;

use crate::core::http::get_json;
use crate::core::models::{QuotaKind, QuotaReading, Service};
use crate::error::ProviderError;

use super::require_credential;

/// Key endpoint path.
const KEY_PATH: &str = "/api/v1/key";

#[derive(Debug, Deserialize)]
struct KeyResponse {
    data: KeyData,
}

#[derive(Debug, Deserialize)]
struct KeyData {
    /// Credit limit; `null` for keys without a cap.
    limit: Option<f64>,
    #[serde(default)]
    usage: f64,
    limit_remaining: Option<f64>,
    rate_limit: Option<RateLimit>,
}

#[derive(Debug, Deserialize)]
struct RateLimit {
    requests: f64,
    interval: String,
}

/// Adapter for OpenRouter keys.
#[derive(Debug, Clone)]
pub struct OpenRouterAdapter {
    client: Client,
}

impl OpenRouterAdapter {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch and normalize the key's quotas.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`].
    pub async fn fetch_quotas(&self, service: &Service) -> Result<Vec<QuotaReading>, ProviderError> {
        let token = require_credential(service)?;
        let url = format!("{}{KEY_PATH}", service.effective_base_url());
        let body: KeyResponse = get_json(&self.client, "openrouter", &url, token).await?;
        Ok(normalize(&body.data))
    }
}

fn normalize(data: &KeyData) -> Vec<QuotaReading> {
    // An uncapped key reports limit 0 and remaining 0; usage is still tracked.
    let limit = data.limit.unwrap_or(0.0);
    let remaining = data
        .limit_remaining
        .unwrap_or(limit - data.usage)
        .max(0.0);
    let mut credits = QuotaReading::new("credits", limit, data.usage, remaining)
        .with_kind(QuotaKind::Credits);
    if let Some(raw_remaining) = data.limit_remaining {
        credits = credits.with_raw(limit, data.usage, raw_remaining);
    }

    let mut readings = vec![credits];
    if let Some(rate) = &data.rate_limit {
        readings.push(
            QuotaReading::new("requests", rate.requests, 0.0, rate.requests)
                .with_kind(QuotaKind::RateLimit)
                .with_replenishment(rate.requests, &rate.interval),
        );
    }
    readings
}
