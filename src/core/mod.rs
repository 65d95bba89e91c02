//! Core data models, provider plumbing, and the refresh scheduler.

pub mod http;
pub mod logging;
pub mod models;
pub mod provider;
pub mod scheduler;

pub use logging::{LogFormat, LogLevel, LogSettings};
pub use models::{
    Quota, QuotaKind, QuotaReading, Replenishment, Service, ServiceStatus, UsageSample,
};
pub use provider::ProviderKind;
pub use scheduler::{Orchestrator, RefreshOutcome, SchedulerConfig, stagger_delay};
