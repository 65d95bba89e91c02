//! Moonshot provider implementation.
//!
//! Reads `GET {base}/v1/users/me/balance`.
//!
//! Metrics: `balance`, `voucher_balance`, `cash_balance`.

use reqwest::Client;
use serde::Deserialize;

use crate::core::http::get_json;
use crate::core::models::{QuotaKind, QuotaReading, Service};
use crate::error::ProviderError;

use super::require_credential;

const BALANCE_PATH: &str = "/v1/users/me/balance";

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    data: BalanceData,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    available_balance: f64,
    #[serde(default)]
    voucher_balance: f64,
    #[serde(default)]
    cash_balance: f64,
}

/// Adapter for Moonshot accounts.
#[derive(Debug, Clone)]
pub struct MoonshotAdapter {
    client: Client,
}

impl MoonshotAdapter {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch and normalize account balances.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`].
    pub async fn fetch_quotas(&self, service: &Service) -> Result<Vec<QuotaReading>, ProviderError> {
        let token = require_credential(service)?;
        let url = format!("{}{BALANCE_PATH}", service.effective_base_url());
        let body: BalanceResponse = get_json(&self.client, "moonshot", &url, token).await?;
        Ok(normalize(&body.data))
    }
}

fn normalize(data: &BalanceData) -> Vec<QuotaReading> {
    [
        ("balance", data.available_balance),
        ("voucher_balance", data.voucher_balance),
        ("cash_balance", data.cash_balance),
    ]
    .into_iter()
    .map(|(metric, value)| {
        // Cash balance goes negative when the account is in arrears.
        let reading = QuotaReading::new(metric, value.max(0.0), 0.0, value.max(0.0))
            .with_kind(QuotaKind::Credits);
        if value < 0.0 {
            reading.with_raw(value, 0.0, value)
        } else {
            reading
        }
    })
    .collect()
}
