//! Public configuration, report and event types for the sweep engine.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use geosweep_core::{CellId, Position};
use serde::{Deserialize, Serialize};

/// When the scheduler writes the remaining cells back to disk.
///
/// The initial save before any consumption, the save when the queue drains and
/// the save on graceful shutdown happen under every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPolicy {
    /// Only the mandatory saves. A crash re-scans everything done this run.
    Startup,
    /// Additionally save after every N completed (or deferred) cells.
    EveryCells(NonZeroU32),
}

impl CheckpointPolicy {
    /// Completed cells between two saves under the default policy.
    pub const DEFAULT_INTERVAL: NonZeroU32 = NonZeroU32::new(25).unwrap();

    /// Whether a checkpoint is due after `processed` cells this run.
    pub fn is_due(&self, processed: u64) -> bool {
        match self {
            CheckpointPolicy::Startup => false,
            CheckpointPolicy::EveryCells(n) => processed > 0 && processed % u64::from(n.get()) == 0,
        }
    }
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        CheckpointPolicy::EveryCells(Self::DEFAULT_INTERVAL)
    }
}

impl fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointPolicy::Startup => f.write_str("startup"),
            CheckpointPolicy::EveryCells(n) => write!(f, "every:{n}"),
        }
    }
}

impl FromStr for CheckpointPolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let s = input.trim().to_ascii_lowercase();
        match s.as_str() {
            "startup" | "once" => return Ok(CheckpointPolicy::Startup),
            "every-cell" => return Ok(CheckpointPolicy::EveryCells(NonZeroU32::MIN)),
            _ => {}
        }
        let Some(raw) = s.strip_prefix("every:") else {
            return Err(format!(
                "invalid checkpoint policy {input:?} (expected `startup`, `every-cell` or `every:N`)"
            ));
        };
        let n: u32 = raw
            .trim()
            .parse()
            .map_err(|_| format!("invalid checkpoint interval: {input:?}"))?;
        NonZeroU32::new(n)
            .map(CheckpointPolicy::EveryCells)
            .ok_or_else(|| format!("checkpoint interval must be >= 1: {input:?}"))
    }
}

/// Configuration for the coverage scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Session key naming the checkpoint file.
    pub session: String,
    /// Checkpoint cadence while cells are consumed.
    pub checkpoint: CheckpointPolicy,
    /// Upper bound on the number of cells a covering may contain.
    pub max_cells: usize,
}

impl SchedulerConfig {
    /// Session key used when the operator does not name one.
    pub const DEFAULT_SESSION: &'static str = "default";

    /// Default covering size limit.
    pub const DEFAULT_MAX_CELLS: usize = 1_000_000;
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            session: Self::DEFAULT_SESSION.to_string(),
            checkpoint: CheckpointPolicy::default(),
            max_cells: Self::DEFAULT_MAX_CELLS,
        }
    }
}

/// Configuration for the scan supervisor and its workers.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Number of real scan workers sharing the queue. Synthetic runs always use one.
    pub workers: usize,
    /// How often the supervisor checks whether workers are still alive.
    pub poll_interval: Duration,
    /// Pause between two cells (or two synthetic rounds).
    pub scan_delay: Duration,
    /// Pause before retrying a failed cell scan.
    pub retry_delay: Duration,
    /// Scan attempts per cell before it is deferred to the next run.
    pub max_attempts: u32,
    /// Which result kinds to keep.
    pub filter: ScanFilter,
    /// Number of synthetic rounds before the mock worker exits (`None`: forever).
    pub mock_rounds: Option<u64>,
}

impl SupervisorConfig {
    /// Default liveness poll.
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

    /// Default delay between cells.
    pub const DEFAULT_SCAN_DELAY: Duration = Duration::from_secs(5);

    /// Default delay before a retry.
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(10);

    /// Default attempts per cell.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            scan_delay: Self::DEFAULT_SCAN_DELAY,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            filter: ScanFilter::default(),
            mock_rounds: None,
        }
    }
}

/// Result kinds kept from each scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFilter {
    /// Keep encounters.
    pub encounters: bool,
    /// Keep stops.
    pub stops: bool,
    /// Keep gyms.
    pub gyms: bool,
}

impl Default for ScanFilter {
    fn default() -> Self {
        Self {
            encounters: true,
            stops: true,
            gyms: true,
        }
    }
}

impl ScanFilter {
    /// Drop everything this filter excludes from `report`.
    pub fn apply(&self, report: &mut ScanReport) {
        if !self.encounters {
            report.encounters.clear();
        }
        report.forts.retain(|fort| match fort.kind {
            FortKind::Stop => self.stops,
            FortKind::Gym => self.gyms,
        });
    }
}

/// A creature sighting reported by a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Encounter {
    /// Service-side encounter identifier.
    pub encounter_id: u64,
    /// Species number.
    pub species_id: u16,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// When the sighting expires.
    pub disappears_at: DateTime<Utc>,
}

/// Kind of fixed point of interest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FortKind {
    /// A stop.
    Stop,
    /// A gym.
    Gym,
}

/// A fixed point of interest reported by a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fort {
    /// Service-side identifier.
    pub fort_id: String,
    /// Stop or gym.
    pub kind: FortKind,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// Everything one scan of one cell produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScanReport {
    /// Cell that was scanned.
    pub cell: CellId,
    /// Point the scan was made from.
    pub position: Position,
    /// When the scan finished.
    pub scanned_at: DateTime<Utc>,
    /// Creature sightings.
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    /// Stops and gyms.
    #[serde(default)]
    pub forts: Vec<Fort>,
}

/// Summary of a finished cell.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CellOutcome {
    /// Worker index (0-based).
    pub worker_idx: usize,
    /// Cell that was scanned.
    pub cell: CellId,
    /// Encounters kept after filtering.
    pub encounters: usize,
    /// Forts kept after filtering.
    pub forts: usize,
    /// Scan attempts used.
    pub attempts: u32,
    /// Wall time spent on the cell (milliseconds).
    pub elapsed_ms: u64,
}

/// Why a worker thread stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "detail")]
pub enum TerminationReason {
    /// The queue ran dry: the pass over the region is complete.
    Exhausted,
    /// The synthetic worker produced its configured number of rounds.
    RoundsCompleted,
    /// The worker panicked.
    Panicked(String),
}

/// One worker's exit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerExit {
    /// Worker index (0-based).
    pub worker_idx: usize,
    /// Why it stopped.
    pub reason: TerminationReason,
}

/// Returned by the supervisor once every worker has ended.
///
/// This is the normal end of a run, not a failure: the host process should
/// exit and leave any restart policy to an outer process manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTerminated {
    /// Exit of each worker, by index.
    pub exits: Vec<WorkerExit>,
}

impl WorkerTerminated {
    /// Whether any worker died from a panic.
    pub fn any_panicked(&self) -> bool {
        self.exits
            .iter()
            .any(|exit| matches!(exit.reason, TerminationReason::Panicked(_)))
    }
}

/// Sweep event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum SweepEvent {
    /// Workers were started.
    Started {
        /// Number of workers.
        workers: usize,
        /// Cells left when the run began.
        remaining: usize,
    },
    /// A worker took a cell off the queue.
    CellStarted {
        /// Worker index (0-based).
        worker_idx: usize,
        /// The cell.
        cell: CellId,
    },
    /// A cell was scanned (or a synthetic round produced).
    CellFinished {
        /// Outcome summary.
        outcome: CellOutcome,
    },
    /// A cell failed every attempt and is left for the next run.
    CellDeferred {
        /// Worker index (0-based).
        worker_idx: usize,
        /// The cell.
        cell: CellId,
        /// Last scan error.
        error: String,
    },
    /// A worker is holding because the pause signal is set.
    WorkerPaused {
        /// Worker index (0-based).
        worker_idx: usize,
    },
    /// A held worker continues.
    WorkerResumed {
        /// Worker index (0-based).
        worker_idx: usize,
    },
    /// Remaining cells were written to disk.
    Checkpointed {
        /// Cells in the checkpoint.
        remaining: usize,
    },
    /// Something non-fatal went wrong.
    Warning {
        /// Human-readable message.
        message: String,
    },
    /// A worker thread ended.
    WorkerExited {
        /// Exit details.
        exit: WorkerExit,
    },
}
