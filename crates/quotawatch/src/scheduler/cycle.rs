//! The periodic update loop.
//!
//! Each cycle fetches a snapshot, diffs it against the committed baseline,
//! publishes and fans out the changes, sweeps pending confirmations and
//! finally commits the new snapshot as baseline if anything changed.
//! Errors and panics stop at the cycle boundary; the loop keeps running.

use futures::FutureExt;
use rand::Rng;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::config::LoopConfig;
use super::source::{CatalogSource, FetchError};
use crate::catalog::{CatalogError, Snapshot};
use crate::diff::diff;
use crate::notify::{
    ChannelGateway, DeliveryService, DeliveryStats, DirectGateway, DispatchReport,
    NotificationRouter,
};
use crate::store::{SnapshotStore, StoreError};

/// Errors that end a cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The fetched snapshot is unusable; the baseline is left untouched
    #[error("Inconsistent snapshot: {0}")]
    Inconsistent(#[from] CatalogError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cycle panicked: {message}")]
    Panicked { message: String },
}

/// How a completed cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No usable baseline existed; the fetched snapshot became the baseline
    Seeded,
    Unchanged,
    /// Changes were dispatched and the baseline was replaced
    Committed { events: usize },
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub correlation_id: String,
    pub outcome: CycleOutcome,
    pub dispatch: DispatchReport,
    pub sweep: DeliveryStats,
}

/// Drives fetch, diff, delivery and baseline commits on a fixed interval.
pub struct UpdateLoop<S, C, D> {
    config: LoopConfig,
    source: S,
    store: Arc<dyn SnapshotStore>,
    router: NotificationRouter,
    channels: C,
    delivery: DeliveryService<D>,
    baseline: Option<Snapshot>,
    baseline_loaded: bool,
    cycles: u64,
}

impl<S, C, D> UpdateLoop<S, C, D>
where
    S: CatalogSource,
    C: ChannelGateway,
    D: DirectGateway,
{
    pub fn new(
        config: LoopConfig,
        source: S,
        store: Arc<dyn SnapshotStore>,
        channels: C,
        delivery: DeliveryService<D>,
    ) -> Self {
        let router = config.router();
        Self {
            config,
            source,
            store,
            router,
            channels,
            delivery,
            baseline: None,
            baseline_loaded: false,
            cycles: 0,
        }
    }

    /// The committed baseline, once loaded or seeded.
    pub fn baseline(&self) -> Option<&Snapshot> {
        self.baseline.as_ref()
    }

    /// Number of cycles attempted so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn delivery(&self) -> &DeliveryService<D> {
        &self.delivery
    }

    /// Runs one guarded cycle: errors and panics are logged and reported to
    /// the ops channel, never propagated as a panic.
    pub async fn tick(&mut self) -> Result<CycleReport, CycleError> {
        let correlation_id = generate_correlation_id();
        let start = Instant::now();
        self.cycles += 1;

        let result = match AssertUnwindSafe(self.run_cycle(&correlation_id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(CycleError::Panicked {
                message: panic_message(&*panic),
            }),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => {
                info!(
                    correlation_id = %correlation_id,
                    cycle = self.cycles,
                    outcome = ?report.outcome,
                    published = report.dispatch.published,
                    delivered = report.dispatch.direct.delivered,
                    confirmed = report.sweep.delivered,
                    duration_ms = elapsed_ms,
                    "Cycle finished"
                );
                if self.config.report_cycles {
                    let text = format!("Updated! ({})", describe(report));
                    self.notify_ops(&correlation_id, &text).await;
                }
            }
            Err(e) => {
                error!(
                    correlation_id = %correlation_id,
                    cycle = self.cycles,
                    error = %e,
                    duration_ms = elapsed_ms,
                    "Cycle failed"
                );
                let text = format!("Update cycle {} failed: {}", self.cycles, e);
                self.notify_ops(&correlation_id, &text).await;
            }
        }

        result
    }

    /// Runs one cycle without the panic guard.
    pub async fn run_cycle(&mut self, correlation_id: &str) -> Result<CycleReport, CycleError> {
        let snapshot = self.fetch(correlation_id).await?;

        if let Err(e) = self.store.save_current(&snapshot) {
            warn!(correlation_id = %correlation_id, error = %e, "Failed to save current snapshot");
        }
        if let Err(e) = snapshot.check_consistency() {
            // Diffing is skipped, but pending subscribers are still swept.
            let sweep = self.delivery.confirmation_sweep().await;
            warn!(
                correlation_id = %correlation_id,
                error = %e,
                confirmed = sweep.delivered,
                "Skipping diff for inconsistent snapshot"
            );
            return Err(e.into());
        }

        self.ensure_baseline(correlation_id);
        let Some(baseline) = self.baseline.as_ref() else {
            self.store.save_baseline(&snapshot)?;
            info!(
                correlation_id = %correlation_id,
                courses = snapshot.courses().len(),
                "Seeded baseline"
            );
            self.baseline = Some(snapshot);
            return Ok(CycleReport {
                correlation_id: correlation_id.to_string(),
                outcome: CycleOutcome::Seeded,
                dispatch: DispatchReport::default(),
                sweep: DeliveryStats::default(),
            });
        };

        let outcome = diff(Some(baseline), &snapshot);
        debug!(
            correlation_id = %correlation_id,
            events = outcome.events.len(),
            "Diffed snapshot against baseline"
        );

        let dispatch = self
            .delivery
            .dispatch(&self.router, &self.channels, &outcome.events)
            .await;
        let sweep = self.delivery.confirmation_sweep().await;

        let outcome = if outcome.changed {
            self.store.save_baseline(&snapshot)?;
            self.baseline = Some(snapshot);
            CycleOutcome::Committed {
                events: outcome.events.len(),
            }
        } else {
            CycleOutcome::Unchanged
        };

        Ok(CycleReport {
            correlation_id: correlation_id.to_string(),
            outcome,
            dispatch,
            sweep,
        })
    }

    /// Runs cycles forever. Cycle starts are spaced by the configured
    /// interval; a slow cycle delays the next one instead of overlapping.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.config.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval_secs,
            fetch_timeout_secs = self.config.fetch_timeout_secs,
            "Update loop started"
        );

        loop {
            interval.tick().await;
            let _ = self.tick().await;
        }
    }

    async fn fetch(&self, correlation_id: &str) -> Result<Snapshot, FetchError> {
        let timeout = self.config.fetch_timeout();
        match tokio::time::timeout(timeout, self.source.fetch_snapshot()).await {
            Ok(Ok(snapshot)) => Ok(snapshot),
            Ok(Err(e)) => {
                warn!(
                    correlation_id = %correlation_id,
                    error = %e,
                    retryable = e.is_retryable(),
                    "Catalog fetch failed"
                );
                Err(e)
            }
            Err(_) => {
                warn!(
                    correlation_id = %correlation_id,
                    timeout_secs = timeout.as_secs_f64(),
                    "Catalog fetch timed out"
                );
                Err(FetchError::Timeout {
                    elapsed_secs: timeout.as_secs_f64(),
                })
            }
        }
    }

    /// Loads the persisted baseline on first use. A missing, unreadable or
    /// inconsistent file leaves no baseline, so the next snapshot seeds one.
    fn ensure_baseline(&mut self, correlation_id: &str) {
        if self.baseline_loaded {
            return;
        }
        self.baseline = match self.store.load_baseline() {
            Ok(Some(snapshot)) if snapshot.is_consistent() => Some(snapshot),
            Ok(Some(_)) => {
                warn!(correlation_id = %correlation_id, "Stored baseline is inconsistent, reseeding");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "Failed to load baseline, reseeding");
                None
            }
        };
        self.baseline_loaded = true;
    }

    async fn notify_ops(&self, correlation_id: &str, text: &str) {
        let Some(channel) = self.config.ops_channel() else {
            return;
        };
        if let Err(e) = self.channels.send_notice(&channel, text).await {
            warn!(
                correlation_id = %correlation_id,
                channel = %channel,
                error = %e,
                "Failed to post ops notice"
            );
        }
    }
}

impl<S, C, D> UpdateLoop<S, C, D>
where
    S: CatalogSource + 'static,
    C: ChannelGateway + 'static,
    D: DirectGateway + 'static,
{
    /// Moves the loop onto its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}

fn describe(report: &CycleReport) -> String {
    match report.outcome {
        CycleOutcome::Seeded => "baseline seeded".to_string(),
        CycleOutcome::Unchanged => "no changes".to_string(),
        CycleOutcome::Committed { events } => format!(
            "{} changes, {} messages delivered",
            events, report.dispatch.direct.delivered
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Generate a unique correlation ID for one cycle
fn generate_correlation_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    let random: u32 = rand::thread_rng().gen();
    format!("{:x}-{:08x}", timestamp & 0xFFFFFFFF, random)
}
