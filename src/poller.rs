// ============================================================================
// SECTION 14: POLLER
// ============================================================================
// The long-running write path.
//
//   Idle ──▶ Polling(gateway A) ──▶ Polling(console 1..n) ──▶ Idle (sleep)
//
// - Configuration is re-read at the top of every cycle and again for the sleep
// - A failing gateway is logged and skipped; the others still run
// - Each cycle runs in its own task so a panic is caught at the join point
// - No retry or backoff: the next cycle is the retry
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle as TokioJoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSource, TelemetryConfig};
use crate::gateway::{DeviceReport, GatewayClient, GatewayTarget};
use crate::readings::ReadingStore;
use crate::registry::SensorRegistry;

// ----------------------------------------------------------------------------
// 14.1 Statistics
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct PollerStats {
    cycles: AtomicU64,
    cycles_panicked: AtomicU64,
    samples_written: AtomicU64,
    samples_dropped: AtomicU64,
    gateway_failures: AtomicU64,
}

/// Point-in-time copy of the poller counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollerStatsSnapshot {
    pub cycles: u64,
    pub cycles_panicked: u64,
    pub samples_written: u64,
    pub samples_dropped: u64,
    pub gateway_failures: u64,
}

impl PollerStats {
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            cycles: self.cycles.load(AtomicOrdering::Relaxed),
            cycles_panicked: self.cycles_panicked.load(AtomicOrdering::Relaxed),
            samples_written: self.samples_written.load(AtomicOrdering::Relaxed),
            samples_dropped: self.samples_dropped.load(AtomicOrdering::Relaxed),
            gateway_failures: self.gateway_failures.load(AtomicOrdering::Relaxed),
        }
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub gateways_polled: usize,
    pub gateway_failures: usize,
    pub samples_written: usize,
    pub samples_dropped: usize,
}

// ----------------------------------------------------------------------------
// 14.2 Poller
// ----------------------------------------------------------------------------

/// Periodically pulls every enabled gateway and records what it reports.
#[derive(Clone)]
pub struct Poller {
    config: Arc<dyn ConfigSource>,
    client: Arc<dyn GatewayClient>,
    registry: Arc<SensorRegistry>,
    store: ReadingStore,
    stats: Arc<PollerStats>,
}

impl Poller {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        client: Arc<dyn GatewayClient>,
        registry: Arc<SensorRegistry>,
        store: ReadingStore,
    ) -> Self {
        Self {
            config,
            client,
            registry,
            store,
            stats: Arc::new(PollerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<PollerStats> {
        Arc::clone(&self.stats)
    }

    /// Gateways to poll under `config`, cloud first, then consoles in order.
    pub fn targets(config: &TelemetryConfig) -> Vec<GatewayTarget> {
        let mut targets = Vec::new();

        if config.ac_infinity_active() {
            let gateway = &config.gateways.ac_infinity;
            targets.push(GatewayTarget::AcInfinity {
                base_url: gateway.base_url.clone(),
                token: gateway.token.clone(),
            });
        }

        if config.ecowitt_active() {
            targets.extend(
                config
                    .gateways
                    .ecowitt
                    .devices
                    .iter()
                    .map(|address| GatewayTarget::EcoWitt { address: address.clone() }),
            );
        }

        targets
    }

    /// Run one poll cycle against a fresh configuration snapshot.
    pub async fn run_cycle(&self) -> CycleReport {
        let snapshot = self.config.snapshot();
        let mut report = CycleReport::default();

        for target in Self::targets(&snapshot) {
            report.gateways_polled += 1;
            match self.client.fetch(&target).await {
                Ok(devices) => self.record(&devices, &mut report).await,
                Err(e) => {
                    report.gateway_failures += 1;
                    self.stats.gateway_failures.fetch_add(1, AtomicOrdering::Relaxed);
                    warn!(
                        target: "isley::poller",
                        gateway = %target.label(),
                        category = e.category(),
                        recoverable = e.is_recoverable(),
                        error = %e,
                        "Gateway fetch failed, skipping until next cycle"
                    );
                }
            }
        }

        report
    }

    async fn record(&self, devices: &[DeviceReport], report: &mut CycleReport) {
        for device in devices {
            for sample in &device.samples {
                let key = device.key_for(sample);
                let written = match self.registry.resolve(&key, &sample.label, &sample.unit, None).await {
                    Ok(sensor) => self.store.append(sensor, sample.value).await.map(|_| ()),
                    Err(e) => Err(e),
                };

                match written {
                    Ok(()) => {
                        report.samples_written += 1;
                        self.stats.samples_written.fetch_add(1, AtomicOrdering::Relaxed);
                    }
                    Err(e) => {
                        report.samples_dropped += 1;
                        self.stats.samples_dropped.fetch_add(1, AtomicOrdering::Relaxed);
                        warn!(
                            target: "isley::poller",
                            key = %key,
                            recoverable = e.is_recoverable(),
                            error = %e,
                            "Dropping reading"
                        );
                    }
                }
            }
        }
    }

    /// Poll until `shutdown` flips to `true` (or its sender goes away).
    ///
    /// Shutdown stops further cycles; a cycle already in flight runs to
    /// completion.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(target: "isley::poller", "Poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let started = Instant::now();
            let cycle = self.clone();
            let outcome = tokio::spawn(async move { cycle.run_cycle().await }).await;
            self.stats.cycles.fetch_add(1, AtomicOrdering::Relaxed);

            match outcome {
                Ok(report) => debug!(
                    target: "isley::poller",
                    gateways = report.gateways_polled,
                    failures = report.gateway_failures,
                    written = report.samples_written,
                    dropped = report.samples_dropped,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Poll cycle complete"
                ),
                Err(e) if e.is_panic() => {
                    self.stats.cycles_panicked.fetch_add(1, AtomicOrdering::Relaxed);
                    error!(target: "isley::poller", error = %e, "Poll cycle panicked, continuing");
                }
                Err(e) => warn!(target: "isley::poller", error = %e, "Poll cycle cancelled"),
            }

            let interval = self.config.snapshot().polling_interval();
            if sleep_or_shutdown(interval, &mut shutdown).await {
                break;
            }
        }

        info!(target: "isley::poller", "Poller stopped");
    }

    /// Spawn [`run`](Self::run) onto the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> TokioJoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

// ----------------------------------------------------------------------------
// 14.3 Shutdown-aware Sleep
// ----------------------------------------------------------------------------

/// Sleep for `interval` unless shutdown is requested first.
///
/// Only a `true` value (or a dropped sender) ends the sleep early; other
/// sends are ignored. Returns `true` when the caller should stop.
pub(crate) async fn sleep_or_shutdown(interval: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(interval);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow_and_update() {
                    return true;
                }
            }
        }
    }
}
