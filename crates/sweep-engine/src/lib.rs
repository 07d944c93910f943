#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Sweep engine for `geosweep` (region coverage, resumable scan queue, scan workers).

/// Public API types: configuration, reports and events.
pub mod api;

/// HTTP clients for the scan service, geocoder and elevation API.
pub mod backend;

/// Remaining-cells checkpoint files.
pub mod checkpoint;

/// Bounding box to cell covering.
pub mod coverer;

/// Error taxonomy.
pub mod error;

/// Location string to starting position.
pub mod locate;

/// Shared pause gate.
pub mod pause;

/// Lease-tracking FIFO.
pub mod queue;

/// Coverage scheduler.
pub mod scheduler;

/// Worker thread supervision.
pub mod supervisor;

mod worker;

pub use api::{
    CellOutcome, CheckpointPolicy, Encounter, Fort, FortKind, ScanFilter, ScanReport,
    SchedulerConfig, SupervisorConfig, SweepEvent, TerminationReason, WorkerExit,
    WorkerTerminated,
};
pub use backend::{DEFAULT_HTTP_TIMEOUT, ElevationClient, HttpScanner, NominatimGeocoder};
pub use checkpoint::{CheckpointStore, default_state_dir};
pub use coverer::{BoundingBox, Coverer, cell_center};
pub use error::SweepError;
pub use locate::{AltitudeResolver, PositionResolver, resolve_start_position};
pub use pause::PauseSignal;
pub use queue::WorkQueue;
pub use scheduler::CoverageScheduler;
pub use supervisor::{Supervisor, WorkerKind};
pub use worker::{CellScanner, MockGenerator};
