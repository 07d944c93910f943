use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Instant;

use chrono::{TimeDelta, Utc};
use geosweep_core::{Account, CellId, Credentials, Position, SCAN_LEVEL};
use rand::Rng;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{
    CellOutcome, Encounter, Fort, FortKind, ScanReport, SupervisorConfig, SweepEvent,
    TerminationReason,
};
use crate::coverer::cell_center;
use crate::pause::PauseSignal;
use crate::scheduler::CoverageScheduler;

/// Performs one scan of one cell against the external service.
///
/// Called from worker threads; implementations block until the scan is done.
pub trait CellScanner: Send + Sync {
    /// Scan `cell` from `position`, logging in as `account` when one is configured.
    fn scan(
        &self,
        cell: CellId,
        position: Position,
        account: Option<&Account>,
    ) -> anyhow::Result<ScanReport>;
}

/// Fabricates plausible scan reports around a fixed position.
#[derive(Debug, Clone)]
pub struct MockGenerator {
    seed: Position,
    radius_deg: f64,
}

impl MockGenerator {
    /// Default scatter around the seed, in degrees.
    pub const DEFAULT_RADIUS_DEG: f64 = 0.002;

    /// A generator centred on `seed`.
    pub fn new(seed: Position) -> Self {
        Self {
            seed,
            radius_deg: Self::DEFAULT_RADIUS_DEG,
        }
    }

    /// Change the scatter radius.
    pub fn with_radius(self, radius_deg: f64) -> Self {
        Self {
            radius_deg: radius_deg.abs(),
            ..self
        }
    }

    /// Position the reports are centred on.
    pub fn seed(&self) -> Position {
        self.seed
    }

    /// One synthetic report for the cell under the seed.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> ScanReport {
        let cell = CellId::at_level(self.seed.lat, self.seed.lon, SCAN_LEVEL);
        let now = Utc::now();

        let encounter_count = rng.random_range(0..=5);
        let mut encounters = Vec::with_capacity(encounter_count);
        for _ in 0..encounter_count {
            let (lat, lon) = self.scatter(rng);
            encounters.push(Encounter {
                encounter_id: rng.random(),
                species_id: rng.random_range(1..=151),
                lat,
                lon,
                disappears_at: now + TimeDelta::seconds(rng.random_range(60..=1800)),
            });
        }

        let fort_count = rng.random_range(0..=2);
        let mut forts = Vec::with_capacity(fort_count);
        for _ in 0..fort_count {
            let (lat, lon) = self.scatter(rng);
            forts.push(Fort {
                fort_id: format!("mock-{:016x}", rng.random::<u64>()),
                kind: if rng.random_bool(0.5) { FortKind::Stop } else { FortKind::Gym },
                lat,
                lon,
            });
        }

        ScanReport {
            cell,
            position: self.seed,
            scanned_at: now,
            encounters,
            forts,
        }
    }

    fn scatter<R: Rng + ?Sized>(&self, rng: &mut R) -> (f64, f64) {
        if self.radius_deg == 0.0 {
            return (self.seed.lat, self.seed.lon);
        }
        let r = self.radius_deg;
        (
            self.seed.lat + rng.random_range(-r..=r),
            self.seed.lon + rng.random_range(-r..=r),
        )
    }
}

pub(crate) struct WorkerContext {
    pub(crate) worker_idx: usize,
    pub(crate) config: SupervisorConfig,
    pub(crate) scheduler: Arc<CoverageScheduler>,
    pub(crate) pause: Arc<PauseSignal>,
    pub(crate) events: broadcast::Sender<SweepEvent>,
}

impl WorkerContext {
    fn emit(&self, event: SweepEvent) {
        let _ = self.events.send(event);
    }

    fn hold_while_paused(&self) {
        if !self.pause.is_set() {
            return;
        }
        let worker_idx = self.worker_idx;
        info!(worker = worker_idx, "paused");
        self.emit(SweepEvent::WorkerPaused { worker_idx });
        while !self.pause.wait_while_set_timeout(self.config.poll_interval) {
            debug!(worker = worker_idx, "still paused");
        }
        info!(worker = worker_idx, "resumed");
        self.emit(SweepEvent::WorkerResumed { worker_idx });
    }

    fn warn_on_checkpoint_error(&self, result: Result<bool, crate::error::SweepError>) {
        if let Err(err) = result {
            warn!(worker = self.worker_idx, error = %err, "checkpoint failed; continuing");
            self.emit(SweepEvent::Warning {
                message: format!("checkpoint failed: {err}"),
            });
        }
    }

    fn pause_between_cells(&self) {
        if !self.config.scan_delay.is_zero() {
            thread::sleep(self.config.scan_delay);
        }
    }
}

fn log_report(worker_idx: usize, report: &ScanReport) {
    info!(
        worker = worker_idx,
        cell = %report.cell,
        position = %report.position,
        encounters = report.encounters.len(),
        forts = report.forts.len(),
        "scanned cell"
    );
    for encounter in &report.encounters {
        debug!(
            worker = worker_idx,
            species = encounter.species_id,
            lat = encounter.lat,
            lon = encounter.lon,
            disappears_at = %encounter.disappears_at,
            "encounter"
        );
    }
    for fort in &report.forts {
        debug!(worker = worker_idx, id = %fort.fort_id, kind = ?fort.kind, "fort");
    }
}

/// Real scan loop: consumes cells until the queue is exhausted.
pub(crate) fn run_scan_worker(
    ctx: &WorkerContext,
    scanner: &dyn CellScanner,
    credentials: &Credentials,
    rotation: &AtomicUsize,
) -> TerminationReason {
    let worker_idx = ctx.worker_idx;
    let max_attempts = ctx.config.max_attempts.max(1);

    loop {
        ctx.hold_while_paused();
        let Some(cell) = ctx.scheduler.dequeue() else {
            info!(worker = worker_idx, "queue exhausted");
            return TerminationReason::Exhausted;
        };
        // A pause raised while we were dequeuing holds this cell, it does not skip it.
        ctx.hold_while_paused();

        ctx.emit(SweepEvent::CellStarted { worker_idx, cell });
        let started_at = Instant::now();
        let position = cell_center(cell);

        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            let account = credentials.rotate(rotation.fetch_add(1, Ordering::Relaxed));
            match scanner.scan(cell, position, account) {
                Ok(report) => break Ok(report),
                Err(err) if attempts < max_attempts => {
                    let error = format!("{err:#}");
                    warn!(
                        worker = worker_idx,
                        cell = %cell,
                        attempt = attempts,
                        error = %error,
                        "scan failed; retrying"
                    );
                    thread::sleep(ctx.config.retry_delay);
                    ctx.hold_while_paused();
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(mut report) => {
                ctx.config.filter.apply(&mut report);
                log_report(worker_idx, &report);
                ctx.warn_on_checkpoint_error(ctx.scheduler.complete(cell));
                ctx.emit(SweepEvent::CellFinished {
                    outcome: CellOutcome {
                        worker_idx,
                        cell,
                        encounters: report.encounters.len(),
                        forts: report.forts.len(),
                        attempts,
                        elapsed_ms: started_at.elapsed().as_millis() as u64,
                    },
                });
            }
            Err(err) => {
                let error = format!("{err:#}");
                warn!(
                    worker = worker_idx,
                    cell = %cell,
                    attempts,
                    error = %error,
                    "giving up on cell until the next run"
                );
                ctx.warn_on_checkpoint_error(ctx.scheduler.defer(cell));
                ctx.emit(SweepEvent::CellDeferred {
                    worker_idx,
                    cell,
                    error,
                });
            }
        }

        ctx.pause_between_cells();
    }
}

/// Mock loop: one fabricated report per round, no queue and no network.
pub(crate) fn run_synthetic_worker(
    ctx: &WorkerContext,
    generator: &MockGenerator,
) -> TerminationReason {
    let worker_idx = ctx.worker_idx;
    let mut rng = rand::rng();
    let mut round: u64 = 0;

    loop {
        if ctx.config.mock_rounds.is_some_and(|limit| round >= limit) {
            info!(worker = worker_idx, rounds = round, "synthetic rounds completed");
            return TerminationReason::RoundsCompleted;
        }
        ctx.hold_while_paused();

        let started_at = Instant::now();
        let mut report = generator.generate(&mut rng);
        ctx.config.filter.apply(&mut report);
        log_report(worker_idx, &report);
        round += 1;

        ctx.emit(SweepEvent::CellFinished {
            outcome: CellOutcome {
                worker_idx,
                cell: report.cell,
                encounters: report.encounters.len(),
                forts: report.forts.len(),
                attempts: 1,
                elapsed_ms: started_at.elapsed().as_millis() as u64,
            },
        });

        ctx.pause_between_cells();
    }
}
