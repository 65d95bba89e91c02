//! Core data models.
//!
//! These types represent the canonical quota structures shared by the
//! adapters, the persistence layer, and the scheduler. All timestamps are
//! unix seconds (UTC).

use serde::{Deserialize, Serialize};

use super::provider::ProviderKind;
use crate::error::ProviderErrorKind;
use crate::util::redact;

// =============================================================================
// Service
// =============================================================================

/// A configured upstream account.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "redact::serialize_secret"
    )]
    pub api_key: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "redact::serialize_secret"
    )]
    pub bearer_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub enabled: bool,
    pub display_order: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Service {
    /// Create an enabled service with no credentials.
    #[must_use]
    pub fn new(id: &str, name: &str, provider: ProviderKind) -> Self {
        let now = crate::util::time::now_unix();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            provider,
            api_key: None,
            bearer_token: None,
            base_url: None,
            enabled: true,
            display_order: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    /// Set the base URL override.
    #[must_use]
    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = Some(url.to_string());
        self
    }

    /// Set the display order.
    #[must_use]
    pub const fn with_display_order(mut self, order: i64) -> Self {
        self.display_order = order;
        self
    }

    /// Token to present upstream: bearer token wins over API key.
    #[must_use]
    pub fn credential(&self) -> Option<&str> {
        self.bearer_token
            .as_deref()
            .or(self.api_key.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn effective_base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.provider.default_base_url())
            .trim_end_matches('/')
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_deref().map(redact::mask_secret))
            .field(
                "bearer_token",
                &self.bearer_token.as_deref().map(redact::mask_secret),
            )
            .field("base_url", &self.base_url)
            .field("enabled", &self.enabled)
            .field("display_order", &self.display_order)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Quota Kind / Replenishment
// =============================================================================

/// What a quota measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    /// Consumption against a periodic allowance.
    Usage,
    /// Prepaid balance.
    Credits,
    /// Request-rate ceiling.
    RateLimit,
}

impl QuotaKind {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usage => "usage",
            Self::Credits => "credits",
            Self::RateLimit => "rate_limit",
        }
    }

    /// Parse from database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "usage" => Some(Self::Usage),
            "credits" => Some(Self::Credits),
            "rate_limit" => Some(Self::RateLimit),
            _ => None,
        }
    }
}

/// Continuous refill for quotas that never reset at a fixed instant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Replenishment {
    /// Amount restored per period.
    pub amount: f64,
    /// Period label, e.g. `10s`, `minute`, `hour`.
    pub period: String,
}

// =============================================================================
// Quota Reading
// =============================================================================

/// A freshly fetched, not yet persisted quota observation.
///
/// Numeric fields are `f64` because providers report whatever they like;
/// [`QuotaReading::non_finite_field`] is the persistence guard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaReading {
    pub metric: String,
    pub limit: f64,
    pub used: f64,
    pub remaining: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_remaining: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<QuotaKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replenishment: Option<Replenishment>,

    /// Unix seconds; fractional values are truncated on persist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<f64>,
}

impl QuotaReading {
    /// Create a reading with normalized values only.
    #[must_use]
    pub fn new(metric: &str, limit: f64, used: f64, remaining: f64) -> Self {
        Self {
            metric: metric.to_string(),
            limit,
            used,
            remaining,
            raw_limit: None,
            raw_used: None,
            raw_remaining: None,
            kind: None,
            replenishment: None,
            reset_at: None,
        }
    }

    /// Set the quota kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: QuotaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set the provider's literal numbers when they differ from the
    /// normalized ones.
    #[must_use]
    pub const fn with_raw(mut self, limit: f64, used: f64, remaining: f64) -> Self {
        self.raw_limit = Some(limit);
        self.raw_used = Some(used);
        self.raw_remaining = Some(remaining);
        self
    }

    /// Set the reset timestamp.
    #[must_use]
    pub const fn with_reset_at(mut self, reset_at: f64) -> Self {
        self.reset_at = Some(reset_at);
        self
    }

    /// Set the replenishment rate.
    #[must_use]
    pub fn with_replenishment(mut self, amount: f64, period: &str) -> Self {
        self.replenishment = Some(Replenishment {
            amount,
            period: period.to_string(),
        });
        self
    }

    /// Name of the first numeric field that is NaN or infinite.
    #[must_use]
    pub fn non_finite_field(&self) -> Option<&'static str> {
        let fields = [
            ("limit", Some(self.limit)),
            ("used", Some(self.used)),
            ("remaining", Some(self.remaining)),
            ("raw_limit", self.raw_limit),
            ("raw_used", self.raw_used),
            ("raw_remaining", self.raw_remaining),
            ("reset_at", self.reset_at),
            (
                "replenishment_amount",
                self.replenishment.as_ref().map(|r| r.amount),
            ),
        ];
        fields
            .into_iter()
            .find(|(_, value)| value.is_some_and(|v| !v.is_finite()))
            .map(|(name, _)| name)
    }
}

// =============================================================================
// Stored Quota / History
// =============================================================================

/// The current-state row for one (service, metric) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub id: String,
    pub service_id: String,
    pub metric: String,
    pub raw_limit: f64,
    pub raw_used: f64,
    pub raw_remaining: f64,
    pub limit: f64,
    pub used: f64,
    pub remaining: f64,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<QuotaKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replenishment: Option<Replenishment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<i64>,
    /// Store-wide write sequence; the highest value per metric is current.
    pub seq: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Quota {
    /// Whether the row was zeroed because its metric disappeared upstream.
    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.limit == 0.0 && self.used == 0.0 && self.remaining == 0.0
    }
}

/// One time-series point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSample {
    pub service_id: String,
    pub metric: String,
    pub ts: i64,
    pub value: f64,
}

// =============================================================================
// Service Status
// =============================================================================

/// Per-service outcome of a refresh cycle, as handed to the broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub service: Service,
    pub quotas: Vec<Quota>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
    pub is_healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ProviderErrorKind>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auth_error: bool,
}

impl ServiceStatus {
    /// A healthy status carrying the stored quotas.
    #[must_use]
    pub const fn healthy(service: Service, quotas: Vec<Quota>, last_updated: i64) -> Self {
        Self {
            service,
            quotas,
            last_updated: Some(last_updated),
            is_healthy: true,
            error: None,
            error_kind: None,
            auth_error: false,
        }
    }

    /// A degraded status: no quotas, classified error.
    #[must_use]
    pub fn degraded(
        service: Service,
        kind: Option<ProviderErrorKind>,
        message: String,
        last_updated: i64,
    ) -> Self {
        Self {
            service,
            quotas: Vec::new(),
            last_updated: Some(last_updated),
            is_healthy: false,
            error: Some(message),
            error_kind: kind,
            auth_error: kind == Some(ProviderErrorKind::Auth),
        }
    }
}
