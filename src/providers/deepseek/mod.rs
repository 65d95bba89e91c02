//! DeepSeek provider implementation.
//!
//! Reads `GET {base}/user/balance`. DeepSeek reports one balance per
//! currency with amounts as decimal strings.
//!
//! Metrics: `balance_<currency>` (lowercased, e.g. `balance_usd`).

use reqwest::Client;
use serde::Deserialize;

use crate::core::http::get_json;
use crate::core::models::{QuotaKind, QuotaReading, Service};
use crate::error::ProviderError;

use super::{lenient_number, require_credential};

const BALANCE_PATH: &str = "/user/balance";

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default)]
    balance_infos: Vec<BalanceInfo>,
}

#[derive(Debug, Deserialize)]
struct BalanceInfo {
    currency: String,
    total_balance: serde_json::Value,
}

/// Adapter for DeepSeek accounts.
#[derive(Debug, Clone)]
pub struct DeepSeekAdapter {
    client: Client,
}

impl DeepSeekAdapter {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch and normalize account balances.
    ///
    /// # Errors
    /// Returns a classified [`ProviderError`]; an unparseable balance is
    /// reported as [`ProviderError::Unknown`].
    pub async fn fetch_quotas(&self, service: &Service) -> Result<Vec<QuotaReading>, ProviderError> {
        let token = require_credential(service)?;
        let url = format!("{}{BALANCE_PATH}", service.effective_base_url());
        let body: BalanceResponse = get_json(&self.client, "deepseek", &url, token).await?;
        normalize(&body)
    }
}

fn normalize(body: &BalanceResponse) -> Result<Vec<QuotaReading>, ProviderError> {
    body.balance_infos
        .iter()
        .map(|info| {
            let total = lenient_number(&info.total_balance).ok_or_else(|| ProviderError::Unknown {
                provider: "deepseek".to_string(),
                message: format!("unparseable balance for {}: {}", info.currency, info.total_balance),
            })?;
            let metric = format!("balance_{}", info.currency.trim().to_lowercase());
            Ok(QuotaReading::new(&metric, total, 0.0, total).with_kind(QuotaKind::Credits))
        })
        .collect()
}
