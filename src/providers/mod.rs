//! Provider adapters.
//!
//! Each adapter turns a service's credentials into zero or more normalized
//! [`QuotaReading`]s or a classified [`ProviderError`]. The scheduler only
//! sees the [`QuotaSource`] trait.

pub mod deepseek;
pub mod moonshot;
pub mod openrouter;

use async_trait::async_trait;
use reqwest::Client;

use crate::core::http::{DEFAULT_TIMEOUT, build_client};
use crate::core::models::{QuotaReading, Service};
use crate::core::provider::ProviderKind;
use crate::error::{ProviderError, Result};

pub use deepseek::DeepSeekAdapter;
pub use moonshot::MoonshotAdapter;
pub use openrouter::OpenRouterAdapter;

/// Anything that can fetch quota readings for a service.
#[async_trait]
pub trait QuotaSource: Send + Sync {
    /// Fetch current readings for `service`.
    async fn fetch_quotas(
        &self,
        service: &Service,
    ) -> std::result::Result<Vec<QuotaReading>, ProviderError>;
}

/// The bundled adapters.
#[derive(Debug, Clone)]
pub enum Adapter {
    OpenRouter(OpenRouterAdapter),
    DeepSeek(DeepSeekAdapter),
    Moonshot(MoonshotAdapter),
}

#[async_trait]
impl QuotaSource for Adapter {
    async fn fetch_quotas(
        &self,
        service: &Service,
    ) -> std::result::Result<Vec<QuotaReading>, ProviderError> {
        match self {
            Self::OpenRouter(a) => a.fetch_quotas(service).await,
            Self::DeepSeek(a) => a.fetch_quotas(service).await,
            Self::Moonshot(a) => a.fetch_quotas(service).await,
        }
    }
}

/// Builds adapters keyed on [`ProviderKind`], sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct AdapterRegistry {
    client: Client,
}

impl AdapterRegistry {
    /// Registry with a default client.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new() -> Result<Self> {
        Ok(Self::with_client(build_client(DEFAULT_TIMEOUT)?))
    }

    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Adapter for a provider kind.
    #[must_use]
    pub fn adapter_for(&self, kind: ProviderKind) -> Adapter {
        let client = self.client.clone();
        match kind {
            ProviderKind::OpenRouter => Adapter::OpenRouter(OpenRouterAdapter::new(client)),
            ProviderKind::DeepSeek => Adapter::DeepSeek(DeepSeekAdapter::new(client)),
            ProviderKind::Moonshot => Adapter::Moonshot(MoonshotAdapter::new(client)),
        }
    }
}

#[async_trait]
impl QuotaSource for AdapterRegistry {
    async fn fetch_quotas(
        &self,
        service: &Service,
    ) -> std::result::Result<Vec<QuotaReading>, ProviderError> {
        self.adapter_for(service.provider).fetch_quotas(service).await
    }
}

/// The credential to present, or an auth error naming what is missing.
pub(crate) fn require_credential(service: &Service) -> std::result::Result<&str, ProviderError> {
    service.credential().ok_or_else(|| ProviderError::Auth {
        provider: service.provider.cli_name().to_string(),
        message: format!("no API key or bearer token configured for service {}", service.id),
    })
}

/// Parse a number that providers sometimes send as a string.
pub(crate) fn lenient_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registry_builds_matching_adapter() {
        let registry = AdapterRegistry::with_client(Client::new());
        assert!(matches!(
            registry.adapter_for(ProviderKind::OpenRouter),
            Adapter::OpenRouter(_)
        ));
        assert!(matches!(
            registry.adapter_for(ProviderKind::DeepSeek),
            Adapter::DeepSeek(_)
        ));
        assert!(matches!(
            registry.adapter_for(ProviderKind::Moonshot),
            Adapter::Moonshot(_)
        ));
    }

    #[test]
    fn missing_credential_is_auth_error() {
        let service = Service::new("svc", "Svc", ProviderKind::Moonshot);
        let err = require_credential(&service).unwrap_err();
        assert!(err.is_auth());
        assert_eq!(err.provider(), "moonshot");
    }

    #[test]
    fn lenient_number_accepts_strings() {
        assert_eq!(lenient_number(&json!(1.5)), Some(1.5));
        assert_eq!(lenient_number(&json!(" 110.00 ")), Some(110.0));
        assert_eq!(lenient_number(&json!("n/a")), None);
        assert_eq!(lenient_number(&json!(null)), None);
    }
}
