//! Refresh scheduler.
//!
//! Drives one poll cycle across all enabled services: stagger, per-service
//! timeout, persistence on a blocking thread, per-service failure
//! isolation, and a broadcast of the resulting batch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, interval_at, sleep, timeout};

use super::models::{Service, ServiceStatus};
use crate::error::{ProviderError, QuotadError, Result};
use crate::providers::QuotaSource;
use crate::storage::{Database, QuotaStore, ResolvedConfig, ServiceStore, maintenance};
use crate::util::now_unix;

/// Default per-service fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Capacity of the status broadcast channel.
const BROADCAST_CAPACITY: usize = 16;

/// Timing knobs for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub refresh_interval: Duration,
    pub fetch_timeout: Duration,
    pub maintenance_interval: Duration,
    pub vacuum_pages: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(300),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            maintenance_interval: Duration::from_secs(6 * 60 * 60),
            vacuum_pages: maintenance::DEFAULT_VACUUM_PAGES,
        }
    }
}

impl From<&ResolvedConfig> for SchedulerConfig {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            refresh_interval: config.refresh_interval,
            fetch_timeout: config.fetch_timeout,
            maintenance_interval: config.maintenance_interval,
            vacuum_pages: config.vacuum_pages,
        }
    }
}

/// Result of a [`Orchestrator::refresh_once`] call.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The cycle ran; one status per enabled service, in poll order.
    Completed(Vec<ServiceStatus>),
    /// Another cycle was already running.
    Skipped,
}

impl RefreshOutcome {
    /// Statuses produced by the cycle; empty when skipped.
    #[must_use]
    pub fn statuses(&self) -> &[ServiceStatus] {
        match self {
            Self::Completed(statuses) => statuses,
            Self::Skipped => &[],
        }
    }

    #[must_use]
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// Clears the cycle flag when dropped, including on panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the refresh cycle state for one process.
pub struct Orchestrator {
    db: Arc<Database>,
    services: ServiceStore,
    quotas: QuotaStore,
    source: Arc<dyn QuotaSource>,
    config: SchedulerConfig,
    cycle_running: AtomicBool,
    last_cycle: Mutex<HashMap<String, ServiceStatus>>,
    updates: broadcast::Sender<Vec<ServiceStatus>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("cycle_running", &self.is_cycle_running())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    #[must_use]
    pub fn new(db: Arc<Database>, source: Arc<dyn QuotaSource>, config: SchedulerConfig) -> Self {
        let (updates, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            services: ServiceStore::new(Arc::clone(&db)),
            quotas: QuotaStore::new(Arc::clone(&db)),
            db,
            source,
            config,
            cycle_running: AtomicBool::new(false),
            last_cycle: Mutex::new(HashMap::new()),
            updates,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Whether a refresh cycle is in progress.
    #[must_use]
    pub fn is_cycle_running(&self) -> bool {
        self.cycle_running.load(Ordering::Acquire)
    }

    /// Receive every completed cycle's batch.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<ServiceStatus>> {
        self.updates.subscribe()
    }

    /// Run one refresh cycle, or skip if one is already running.
    ///
    /// # Errors
    /// Only loading the service list can fail the cycle; every per-service
    /// failure is recorded on that service's status instead.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome> {
        let Some(_guard) = CycleGuard::acquire(&self.cycle_running) else {
            tracing::info!("Refresh cycle already running, skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let started = Instant::now();
        let services = self.load_enabled().await?;
        let stagger = stagger_delay(self.config.refresh_interval, services.len());
        tracing::info!(
            services = services.len(),
            stagger_ms = u64::try_from(stagger.as_millis()).unwrap_or(u64::MAX),
            "Starting refresh cycle"
        );

        let mut statuses = Vec::with_capacity(services.len());
        for (index, service) in services.into_iter().enumerate() {
            if index > 0 && !stagger.is_zero() {
                sleep(stagger).await;
            }
            statuses.push(self.refresh_service(service).await);
        }

        {
            let mut cache = self.last_cycle.lock().unwrap_or_else(PoisonError::into_inner);
            cache.clear();
            for status in &statuses {
                cache.insert(status.service.id.clone(), status.clone());
            }
        }
        // No subscribers is not an error.
        let _ = self.updates.send(statuses.clone());

        tracing::info!(
            total = statuses.len(),
            healthy = statuses.iter().filter(|s| s.is_healthy).count(),
            duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Refresh cycle complete"
        );
        Ok(RefreshOutcome::Completed(statuses))
    }

    async fn load_enabled(&self) -> Result<Vec<Service>> {
        let store = self.services.clone();
        tokio::task::spawn_blocking(move || store.list_enabled())
            .await
            .map_err(|e| QuotadError::Other(anyhow::anyhow!("service load task failed: {e}")))?
    }

    async fn refresh_service(&self, service: Service) -> ServiceStatus {
        let fetch_timeout = self.config.fetch_timeout;
        let fetched = match timeout(fetch_timeout, self.source.fetch_quotas(&service)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: service.provider.cli_name().to_string(),
                after: fetch_timeout,
            }),
        };

        let readings = match fetched {
            Ok(readings) => readings,
            Err(err) => {
                tracing::warn!(
                    service = %service.id,
                    provider = %service.provider,
                    kind = %err.kind(),
                    error = %err,
                    "Quota fetch failed"
                );
                return ServiceStatus::degraded(service, Some(err.kind()), err.to_string(), now_unix());
            }
        };

        let quotas = self.quotas.clone();
        let service_id = service.id.clone();
        let persisted = tokio::task::spawn_blocking(move || -> Result<_> {
            if !readings.is_empty() {
                quotas.save_quotas(&service_id, &readings, now_unix())?;
            }
            let current = quotas.current_quotas(&service_id)?;
            let last_updated = quotas.latest_update(&service_id)?;
            Ok((current, last_updated))
        })
        .await
        .map_err(|e| QuotadError::Other(anyhow::anyhow!("persistence task failed: {e}")))
        .and_then(|result| result);

        match persisted {
            Ok((current, last_updated)) => {
                ServiceStatus::healthy(service, current, last_updated.unwrap_or_else(now_unix))
            }
            Err(err) => {
                tracing::error!(service = %service.id, error = %err, "Failed to persist quotas");
                ServiceStatus::degraded(service, None, err.to_string(), now_unix())
            }
        }
    }

    /// Current state without contacting any provider.
    ///
    /// Stored quotas for every enabled service, overlaid with the health of
    /// that service in the last completed cycle (healthy if it has not been
    /// polled by this process).
    ///
    /// # Errors
    /// Returns a storage error if reading the database fails.
    pub fn latest_status(&self) -> Result<Vec<ServiceStatus>> {
        let cache = self
            .last_cycle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.services
            .list_enabled()?
            .into_iter()
            .map(|service| {
                let quotas = self.quotas.current_quotas(&service.id)?;
                let last_updated = self.quotas.latest_update(&service.id)?;
                let mut status = ServiceStatus::healthy(service, quotas, 0);
                status.last_updated = last_updated;
                if let Some(previous) = cache.get(&status.service.id) {
                    status.is_healthy = previous.is_healthy;
                    status.error.clone_from(&previous.error);
                    status.error_kind = previous.error_kind;
                    status.auth_error = previous.auth_error;
                    status.last_updated = status.last_updated.or(previous.last_updated);
                }
                Ok(status)
            })
            .collect()
    }

    /// Tick refresh cycles and maintenance until `shutdown` resolves.
    ///
    /// Each refresh tick spawns a cycle unless the previous one is still
    /// running, so a slow cycle makes the next tick skip rather than queue. Maintenance ticks are skipped while a cycle
    /// runs. An in-flight cycle is aborted on shutdown.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) {
        let mut refresh = interval(self.config.refresh_interval);
        refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let first_maintenance = tokio::time::Instant::now() + self.config.maintenance_interval;
        let mut maintain = interval_at(first_maintenance, self.config.maintenance_interval);
        maintain.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<()>> = None;
        tokio::pin!(shutdown);

        tracing::info!(
            refresh_secs = self.config.refresh_interval.as_secs(),
            maintenance_secs = self.config.maintenance_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                _ = refresh.tick() => {
                    if in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
                        tracing::info!("Refresh cycle already running, skipping");
                        continue;
                    }
                    let this = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move {
                        if let Err(err) = this.refresh_once().await {
                            tracing::error!(error = %err, "Refresh cycle failed");
                        }
                    }));
                }
                _ = maintain.tick() => {
                    if self.is_cycle_running() {
                        tracing::debug!("Refresh cycle running, skipping maintenance");
                        continue;
                    }
                    let db = Arc::clone(&self.db);
                    let pages = self.config.vacuum_pages;
                    match tokio::task::spawn_blocking(move || maintenance::run_maintenance(&db, pages)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(err)) => tracing::warn!(error = %err, "Database maintenance failed"),
                        Err(err) => tracing::warn!(error = %err, "Maintenance task failed"),
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            handle.abort();
        }
        tracing::info!("Scheduler stopped");
    }
}

/// Spacing between consecutive service polls in one cycle.
#[must_use]
pub fn stagger_delay(refresh_interval: Duration, services: usize) -> Duration {
    match u32::try_from(services) {
        Ok(0) => Duration::ZERO,
        Ok(n) => refresh_interval / n,
        Err(_) => Duration::ZERO,
    }
}
