//! The collector loop: poll, batch, write, degrade, reconcile.
//!
//! One cycle runs on a fixed interval: reconcile the journal first so
//! historical data is never reordered after live data, poll every
//! configured probe with a shared timestamp, then deliver the batch:
//! write, reconnect-once, retry-once, and finally journal. A batch is
//! never discarded.

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::journal::Journal;
use crate::point::{Batch, Point};
use crate::sensor::{AirProbe, OneWireProbe};
use crate::sink::SinkConnection;

/// How many cycles between periodic statistics reports.
const STATS_REPORT_CYCLES: u64 = 10;

/// Counters over the collector's lifetime.
#[derive(Debug, Clone, Default)]
pub struct CollectorStats {
    /// Total cycles run, including skipped ones
    pub cycles: u64,

    /// Points confirmed written on the live path
    pub points_written: u64,

    /// Batches degraded to the journal
    pub batches_journaled: u64,

    /// Journaled batches later reconciled to the sink
    pub batches_reconciled: u64,
}

/// Orchestrates polling, batching, and delivery.
///
/// Owns the probes, the journal, and the sink connection exclusively; the
/// health listener shares nothing with it. The connection is optional so
/// the collector can start (and keep running) degraded while the sink is
/// unreachable, journaling until a later cycle reconnects.
pub struct Collector {
    config: Config,
    water: Option<OneWireProbe>,
    air: AirProbe,
    journal: Journal,
    sink: Option<SinkConnection>,
    stats: CollectorStats,
}

impl Collector {
    pub fn new(
        config: Config,
        water: Option<OneWireProbe>,
        air: AirProbe,
        journal: Journal,
        sink: Option<SinkConnection>,
    ) -> Self {
        Self {
            config,
            water,
            air,
            journal,
            sink,
            stats: CollectorStats::default(),
        }
    }

    pub fn stats(&self) -> &CollectorStats {
        &self.stats
    }

    /// Run cycles until the shutdown signal fires.
    ///
    /// The only suspension points between cycles are the interval tick and
    /// the shutdown watch, so an in-flight write always completes or fails
    /// naturally before the loop observes shutdown. Probe resources are
    /// released when the collector drops, on every exit path.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, collector stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.cycle().await;
                    if self.stats.cycles % STATS_REPORT_CYCLES == 0 {
                        info!(
                            cycles = self.stats.cycles,
                            points_written = self.stats.points_written,
                            batches_journaled = self.stats.batches_journaled,
                            batches_reconciled = self.stats.batches_reconciled,
                            "collector progress"
                        );
                    }
                }
            }
        }
    }

    /// Execute one collection cycle.
    pub async fn cycle(&mut self) {
        self.stats.cycles += 1;

        self.ensure_connection().await;
        self.reconcile_journal().await;

        let batch = self.poll_probes().await;
        if batch.is_empty() {
            warn!("no valid sensor readings, skipping this cycle");
            return;
        }

        self.deliver(batch).await;
    }

    /// Acquire a connection if the previous cycle left us degraded.
    async fn ensure_connection(&mut self) {
        if self.sink.is_some() {
            return;
        }
        match SinkConnection::connect(&self.config).await {
            Ok(conn) => {
                info!(database = conn.database(), "sink connection established");
                self.sink = Some(conn);
            }
            Err(e) => warn!(error = %e, "sink unreachable, continuing degraded"),
        }
    }

    /// Reconcile journaled batches ahead of this cycle's fresh data.
    async fn reconcile_journal(&mut self) {
        let Some(conn) = &self.sink else {
            return;
        };
        match self.journal.flush(conn).await {
            Ok(0) => {}
            Ok(reconciled) => self.stats.batches_reconciled += reconciled as u64,
            Err(e) => warn!(error = %e, "journal flush failed, will retry next cycle"),
        }
    }

    /// Poll every configured probe, sharing one cycle timestamp.
    ///
    /// A failed read is logged and skipped; it never becomes a point and
    /// never aborts the cycle.
    async fn poll_probes(&mut self) -> Batch {
        let now = Utc::now();
        let mut batch = Batch::new();

        if let Some(probe) = &self.water {
            match probe.read_temperature().await {
                Ok(value) => batch.push(Point::temperature("water", now, value)),
                Err(e) => warn!(sensor = "water", error = %e, "probe read failed"),
            }
        }

        match &mut self.air {
            AirProbe::Api(probe) => match probe.read_temperature().await {
                Ok(value) => batch.push(Point::temperature("air", now, value)),
                Err(e) => warn!(sensor = "air", error = %e, "API probe read failed"),
            },
            AirProbe::Dht(probe) => match probe.read().await {
                Ok(reading) => {
                    batch.push(Point::temperature("air", now, reading.temperature));
                    batch.push(Point::humidity("air", now, reading.humidity));
                }
                Err(e) => warn!(sensor = "air", error = %e, "DHT probe read failed"),
            },
            AirProbe::Disabled => {}
        }

        batch
    }

    /// Deliver a non-empty batch: write, reconnect-once, retry-once,
    /// journal. The batch is never discarded.
    async fn deliver(&mut self, batch: Batch) {
        match &self.sink {
            Some(conn) => match conn.write(&batch).await {
                Ok(()) => {
                    self.stats.points_written += batch.len() as u64;
                    info!(points = batch.len(), "batch written");
                    return;
                }
                Err(e) => warn!(error = %e, "write failed, reconnecting"),
            },
            None => {
                // This cycle already spent its connect attempt.
                self.journal_batch(batch).await;
                return;
            }
        }

        match SinkConnection::connect(&self.config).await {
            Ok(conn) => {
                let retried = conn.write(&batch).await;
                // Keep the fresh connection for the next cycle whatever the
                // retry outcome.
                self.sink = Some(conn);
                match retried {
                    Ok(()) => {
                        self.stats.points_written += batch.len() as u64;
                        info!(points = batch.len(), "batch written after reconnect");
                        return;
                    }
                    Err(e) => warn!(error = %e, "retry after reconnect failed"),
                }
            }
            Err(e) => {
                self.sink = None;
                warn!(error = %e, "reconnect failed");
            }
        }

        self.journal_batch(batch).await;
    }

    async fn journal_batch(&mut self, batch: Batch) {
        match self.journal.append(&batch).await {
            Ok(()) => {
                self.stats.batches_journaled += 1;
                info!(points = batch.len(), "batch journaled for later reconciliation");
            }
            // Logged but not escalated: the collector keeps running even
            // when the fallback path itself fails.
            Err(e) => error!(error = %e, "failed to journal batch"),
        }
    }
}
