//! Owns the queue of cells for one region and keeps its checkpoint current.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use geosweep_core::{CellId, Position};
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::api::SchedulerConfig;
use crate::checkpoint::{CheckpointStore, validate_session};
use crate::coverer::{BoundingBox, Coverer, cell_center};
use crate::error::SweepError;
use crate::queue::WorkQueue;

/// Turns a bounding box into a resumable, shuffled, exactly-once cell queue.
pub struct CoverageScheduler {
    config: SchedulerConfig,
    store: CheckpointStore,
    coverer: Coverer,
    queue: WorkQueue<CellId>,
    initialized: Mutex<bool>,
    processed: AtomicU64,
    completed: AtomicU64,
    total: AtomicUsize,
    checkpoint_lock: Mutex<()>,
}

impl CoverageScheduler {
    /// A scheduler for `config.session`, persisting through `store`.
    pub fn new(config: SchedulerConfig, store: CheckpointStore) -> Result<Self, SweepError> {
        validate_session(&config.session)?;
        Ok(Self {
            coverer: Coverer::new(config.max_cells),
            config,
            store,
            queue: WorkQueue::new(),
            initialized: Mutex::new(false),
            processed: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            total: AtomicUsize::new(0),
            checkpoint_lock: Mutex::new(()),
        })
    }

    /// [`CoverageScheduler::initialize_with_rng`] with the thread-local RNG.
    pub fn initialize(&self, bbox: &BoundingBox) -> Result<Vec<CellId>, SweepError> {
        self.initialize_with_rng(bbox, &mut rand::rng())
    }

    /// Load or build the scan order and fill the queue with it.
    ///
    /// A saved checkpoint is resumed verbatim. Otherwise the covering of `bbox`
    /// is shuffled with `rng` and saved before anything is handed out. Only the
    /// first call fills (and seals) the queue; later calls re-read the saved
    /// order and return it. Concurrent calls are serialized, so the queue and
    /// the file always hold the same order.
    pub fn initialize_with_rng<R>(&self, bbox: &BoundingBox, rng: &mut R) -> Result<Vec<CellId>, SweepError>
    where
        R: Rng + ?Sized,
    {
        let mut initialized = self
            .initialized
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let session = self.config.session.as_str();
        let cells = match self.store.load(session)? {
            Some(cells) => {
                info!(session, remaining = cells.len(), "resuming from checkpoint");
                if cells.is_empty() {
                    info!(session, "checkpoint is empty; pass --reset to sweep the region again");
                }
                cells
            }
            None => {
                let mut cells: Vec<CellId> = self.coverer.compute_coverage(bbox)?.into_iter().collect();
                cells.shuffle(rng);
                self.store.save(session, &cells)?;
                info!(session, cells = cells.len(), "computed new coverage");
                cells
            }
        };

        if *initialized {
            debug!(session, "scheduler already initialized; queue left untouched");
            return Ok(cells);
        }
        *initialized = true;

        self.total.store(cells.len(), Ordering::SeqCst);
        if let Err(rejected) = self.queue.enqueue_all(cells.iter().copied()) {
            debug!(rejected = rejected.len(), "queue closed before initialization");
        }
        self.queue.close();
        Ok(cells)
    }

    /// Next cell in scan order, blocking until one is available. `None` once
    /// the pass is exhausted.
    pub fn dequeue(&self) -> Option<CellId> {
        self.queue.dequeue()
    }

    /// Next cell without blocking.
    pub fn try_dequeue(&self) -> Option<CellId> {
        self.queue.try_dequeue()
    }

    /// Mark a dequeued cell done. Returns `false` for cells that were not in
    /// flight. May write a checkpoint depending on the policy.
    pub fn complete(&self, cell: CellId) -> Result<bool, SweepError> {
        if !self.queue.complete(&cell) {
            return Ok(false);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.after_release()?;
        Ok(true)
    }

    /// Give up on a dequeued cell for this run; it stays in later checkpoints.
    pub fn defer(&self, cell: CellId) -> Result<bool, SweepError> {
        if !self.queue.defer(&cell) {
            return Ok(false);
        }
        self.after_release()?;
        Ok(true)
    }

    fn after_release(&self) -> Result<(), SweepError> {
        let processed = self.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let drained = self.queue.is_closed() && self.queue.outstanding_len() == 0;
        if drained || self.config.checkpoint.is_due(processed) {
            self.checkpoint()?;
        }
        Ok(())
    }

    /// Persist every cell still owed (in flight, pending, deferred) right now.
    /// Returns the number of cells written.
    pub fn checkpoint(&self) -> Result<usize, SweepError> {
        let _guard = self
            .checkpoint_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.queue.snapshot();
        self.store.save(&self.config.session, &snapshot)?;
        Ok(snapshot.len())
    }

    /// Cells not yet completed or deferred this run (pending plus in flight).
    pub fn remaining_count(&self) -> usize {
        self.queue.outstanding_len()
    }

    /// Cells in the queue when the run began.
    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Cells completed this run.
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Cells given up on this run.
    pub fn deferred_count(&self) -> usize {
        self.queue.deferred_len()
    }

    /// Centre of the first cell still owed, or `fallback` when none is left.
    pub fn initial_position(&self, fallback: Position) -> Position {
        self.queue
            .snapshot()
            .first()
            .map(|cell| cell_center(*cell))
            .unwrap_or(fallback)
    }

    /// Session key.
    pub fn session(&self) -> &str {
        &self.config.session
    }

    /// File the checkpoint is written to.
    pub fn checkpoint_path(&self) -> Result<PathBuf, SweepError> {
        self.store.path_for(&self.config.session)
    }
}
