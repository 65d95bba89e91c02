//! HTTP client utilities.
//!
//! Provides a shared HTTP client for all provider adapters and maps HTTP
//! outcomes onto [`ProviderError`] classes.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ProviderError, QuotadError, Result};
use crate::util::redact;

/// Transport-level timeout. The scheduler's per-service timeout is the
/// tighter bound in practice.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body excerpt kept in messages.
const BODY_EXCERPT_CHARS: usize = 200;

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("quotad/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| QuotadError::Other(anyhow::anyhow!("build http client: {e}")))
}

/// GET `url` with a bearer token and decode the JSON body.
///
/// # Errors
///
/// 401/403 map to [`ProviderError::Auth`], 429 to
/// [`ProviderError::RateLimited`], transport failures to
/// [`ProviderError::Network`], everything else (including undecodable
/// bodies) to [`ProviderError::Unknown`].
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    provider: &str,
    url: &str,
    token: &str,
) -> std::result::Result<T, ProviderError> {
    tracing::debug!(provider, url, "Fetching quotas");

    let response = client
        .get(url)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| ProviderError::Network {
            provider: provider.to_string(),
            message: redact::scrub(&transport_message(&e), Some(token)),
        })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(
            provider,
            status,
            retry_after,
            &redact::scrub(&excerpt(&body), Some(token)),
        ));
    }

    let bytes = response.bytes().await.map_err(|e| ProviderError::Network {
        provider: provider.to_string(),
        message: transport_message(&e),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ProviderError::Unknown {
        provider: provider.to_string(),
        message: format!("unexpected response body: {e}"),
    })
}

/// Map a non-success status to an error class.
#[must_use]
pub fn classify_status(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> ProviderError {
    let message = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    let provider = provider.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth { provider, message },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited {
            provider,
            retry_after,
            message,
        },
        _ => ProviderError::Unknown { provider, message },
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn transport_message(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= BODY_EXCERPT_CHARS {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(BODY_EXCERPT_CHARS).collect();
        format!("{cut}...")
    }
}
