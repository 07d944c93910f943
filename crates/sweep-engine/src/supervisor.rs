use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::thread;
use std::time::Duration;

use geosweep_core::Credentials;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::api::{SupervisorConfig, SweepEvent, TerminationReason, WorkerExit, WorkerTerminated};
use crate::error::SweepError;
use crate::pause::PauseSignal;
use crate::scheduler::CoverageScheduler;
use crate::worker::{
    CellScanner, MockGenerator, WorkerContext, run_scan_worker, run_synthetic_worker,
};

/// Liveness poll used once a scan run has no cells left to hand out.
const DRAINED_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Which worker implementation a run uses. Exactly one per run.
pub enum WorkerKind {
    /// Scan queued cells against the external service.
    Scan {
        /// Service client.
        scanner: Arc<dyn CellScanner>,
        /// Accounts rotated across requests.
        credentials: Arc<Credentials>,
    },
    /// Fabricate reports around a seed position without touching the queue.
    Synthetic {
        /// Report source.
        generator: MockGenerator,
    },
}

/// Starts worker threads and watches them until they are all gone.
///
/// Worker threads are detached: nothing joins them on process exit, and a
/// dead worker is reported, never restarted.
pub struct Supervisor {
    config: SupervisorConfig,
    scheduler: Arc<CoverageScheduler>,
    pause: Arc<PauseSignal>,
    event_tx: broadcast::Sender<SweepEvent>,
    workers: Vec<thread::JoinHandle<TerminationReason>>,
    scanning: bool,
}

impl Supervisor {
    /// A supervisor with no workers yet.
    pub fn new(
        mut config: SupervisorConfig,
        scheduler: Arc<CoverageScheduler>,
        pause: Arc<PauseSignal>,
    ) -> Self {
        if config.workers == 0 {
            config.workers = 1;
        }
        if config.poll_interval == Duration::ZERO {
            config.poll_interval = SupervisorConfig::DEFAULT_POLL_INTERVAL;
        }
        if config.max_attempts == 0 {
            config.max_attempts = SupervisorConfig::DEFAULT_MAX_ATTEMPTS;
        }

        let (event_tx, _) = broadcast::channel::<SweepEvent>(1024);
        Self {
            config,
            scheduler,
            pause,
            event_tx,
            workers: Vec::new(),
            scanning: false,
        }
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<SweepEvent> {
        self.event_tx.subscribe()
    }

    /// The scheduler the workers consume from.
    pub fn scheduler(&self) -> &Arc<CoverageScheduler> {
        &self.scheduler
    }

    /// Spawn the worker threads for `kind`.
    ///
    /// If the OS refuses a thread, the ones already started keep running.
    pub fn start(&mut self, kind: WorkerKind) -> Result<(), SweepError> {
        match kind {
            WorkerKind::Scan {
                scanner,
                credentials,
            } => {
                self.scanning = true;
                let rotation = Arc::new(AtomicUsize::new(0));
                for worker_idx in 0..self.config.workers {
                    let ctx = self.context(worker_idx);
                    let scanner = scanner.clone();
                    let credentials = credentials.clone();
                    let rotation = rotation.clone();
                    let handle = thread::Builder::new()
                        .name(format!("scan-worker-{worker_idx}"))
                        .spawn(move || {
                            run_scan_worker(&ctx, scanner.as_ref(), &credentials, &rotation)
                        })
                        .map_err(SweepError::Spawn)?;
                    self.workers.push(handle);
                }
            }
            WorkerKind::Synthetic { generator } => {
                let ctx = self.context(0);
                let handle = thread::Builder::new()
                    .name("synthetic-worker".to_string())
                    .spawn(move || run_synthetic_worker(&ctx, &generator))
                    .map_err(SweepError::Spawn)?;
                self.workers.push(handle);
            }
        }

        let remaining = self.scheduler.remaining_count();
        info!(
            workers = self.workers.len(),
            remaining,
            mode = if self.scanning { "scan" } else { "synthetic" },
            "workers started"
        );
        let _ = self.event_tx.send(SweepEvent::Started {
            workers: self.workers.len(),
            remaining,
        });
        Ok(())
    }

    fn context(&self, worker_idx: usize) -> WorkerContext {
        WorkerContext {
            worker_idx,
            config: self.config.clone(),
            scheduler: self.scheduler.clone(),
            pause: self.pause.clone(),
            events: self.event_tx.clone(),
        }
    }

    /// Whether any worker thread is still running.
    pub fn is_alive(&self) -> bool {
        self.workers.iter().any(|handle| !handle.is_finished())
    }

    /// The configured interval, or a short one once a scan run has nothing
    /// left to hand out.
    fn next_poll(&self) -> Duration {
        if self.scanning && self.scheduler.remaining_count() == 0 {
            self.config.poll_interval.min(DRAINED_POLL_INTERVAL)
        } else {
            self.config.poll_interval
        }
    }

    /// Check on the workers every `poll_interval` until all of them have
    /// ended, then report how each one ended.
    ///
    /// In scan mode a final checkpoint is written before returning.
    pub async fn wait(self) -> WorkerTerminated {
        while self.is_alive() {
            tokio::time::sleep(self.next_poll()).await;
        }

        let mut exits = Vec::with_capacity(self.workers.len());
        for (worker_idx, handle) in self.workers.into_iter().enumerate() {
            let reason = match handle.join() {
                Ok(reason) => reason,
                Err(payload) => TerminationReason::Panicked(panic_message(payload.as_ref())),
            };
            match &reason {
                TerminationReason::Panicked(message) => {
                    error!(worker = worker_idx, panic = %message, "worker panicked");
                }
                other => info!(worker = worker_idx, reason = ?other, "worker exited"),
            }
            let exit = WorkerExit { worker_idx, reason };
            let _ = self.event_tx.send(SweepEvent::WorkerExited { exit: exit.clone() });
            exits.push(exit);
        }

        if self.scanning {
            match self.scheduler.checkpoint() {
                Ok(remaining) => {
                    info!(remaining, "final checkpoint written");
                    let _ = self.event_tx.send(SweepEvent::Checkpointed { remaining });
                }
                Err(err) => {
                    warn!(error = %err, "final checkpoint failed");
                    let _ = self.event_tx.send(SweepEvent::Warning {
                        message: format!("final checkpoint failed: {err}"),
                    });
                }
            }
        }

        WorkerTerminated { exits }
    }

    /// [`Supervisor::start`] then [`Supervisor::wait`].
    pub async fn run(mut self, kind: WorkerKind) -> Result<WorkerTerminated, SweepError> {
        self.start(kind)?;
        Ok(self.wait().await)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use geosweep_core::{Account, CellId, Position};

    use super::*;
    use crate::api::{SchedulerConfig, ScanReport};
    use crate::checkpoint::CheckpointStore;
    use crate::coverer::BoundingBox;

    struct RecordingScanner {
        scanned: Mutex<Vec<CellId>>,
        fail_first: usize,
        calls: AtomicUsize,
    }

    impl RecordingScanner {
        fn new(fail_first: usize) -> Self {
            Self {
                scanned: Mutex::new(Vec::new()),
                fail_first,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl CellScanner for RecordingScanner {
        fn scan(
            &self,
            cell: CellId,
            position: Position,
            _account: Option<&Account>,
        ) -> anyhow::Result<ScanReport> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("service unavailable");
            }
            self.scanned.lock().unwrap().push(cell);
            Ok(ScanReport {
                cell,
                position,
                scanned_at: chrono::Utc::now(),
                encounters: Vec::new(),
                forts: Vec::new(),
            })
        }
    }

    struct PanickingScanner;

    impl CellScanner for PanickingScanner {
        fn scan(&self, _: CellId, _: Position, _: Option<&Account>) -> anyhow::Result<ScanReport> {
            panic!("scanner exploded");
        }
    }

    /// Raises the pause from inside its first call, which optionally fails.
    struct PausingScanner {
        pause: Arc<PauseSignal>,
        fail_first: bool,
        calls: AtomicUsize,
        calls_while_paused: AtomicUsize,
        scanned: Mutex<Vec<CellId>>,
    }

    impl PausingScanner {
        fn new(pause: Arc<PauseSignal>, fail_first: bool) -> Self {
            Self {
                pause,
                fail_first,
                calls: AtomicUsize::new(0),
                calls_while_paused: AtomicUsize::new(0),
                scanned: Mutex::new(Vec::new()),
            }
        }
    }

    impl CellScanner for PausingScanner {
        fn scan(
            &self,
            cell: CellId,
            position: Position,
            _account: Option<&Account>,
        ) -> anyhow::Result<ScanReport> {
            let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if call == 0 {
                self.pause.set();
                if self.fail_first {
                    anyhow::bail!("service unavailable");
                }
            } else if self.pause.is_set() {
                self.calls_while_paused
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            self.scanned.lock().unwrap().push(cell);
            Ok(ScanReport {
                cell,
                position,
                scanned_at: chrono::Utc::now(),
                encounters: Vec::new(),
                forts: Vec::new(),
            })
        }
    }

    fn fast_config(workers: usize) -> SupervisorConfig {
        SupervisorConfig {
            workers,
            poll_interval: Duration::from_millis(10),
            scan_delay: Duration::ZERO,
            retry_delay: Duration::ZERO,
            ..SupervisorConfig::default()
        }
    }

    fn ready_scheduler(dir: &std::path::Path) -> Arc<CoverageScheduler> {
        let sched = CoverageScheduler::new(SchedulerConfig::default(), CheckpointStore::new(dir)).unwrap();
        sched
            .initialize(&BoundingBox::new(37.0, -122.1, 37.01, -122.09).unwrap())
            .unwrap();
        Arc::new(sched)
    }

    fn scan_kind(scanner: Arc<dyn CellScanner>) -> WorkerKind {
        WorkerKind::Scan {
            scanner,
            credentials: Arc::new(Credentials::default()),
        }
    }

    #[tokio::test]
    async fn scan_workers_drain_the_queue_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let total = sched.remaining_count();
        let scanner = Arc::new(RecordingScanner::new(0));

        let supervisor = Supervisor::new(fast_config(3), sched.clone(), Arc::new(PauseSignal::new()));
        let done = supervisor.run(scan_kind(scanner.clone())).await.unwrap();

        assert_eq!(done.exits.len(), 3);
        assert!(done.exits.iter().all(|e| e.reason == TerminationReason::Exhausted));
        let mut scanned = scanner.scanned.lock().unwrap().clone();
        assert_eq!(scanned.len(), total);
        scanned.sort();
        scanned.dedup();
        assert_eq!(scanned.len(), total);
        assert_eq!(sched.completed_count(), total as u64);
        assert_eq!(
            CheckpointStore::new(dir.path()).load("default").unwrap(),
            Some(Vec::new())
        );
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let total = sched.remaining_count();
        let scanner = Arc::new(RecordingScanner::new(2));

        let supervisor = Supervisor::new(fast_config(1), sched.clone(), Arc::new(PauseSignal::new()));
        let mut events = supervisor.subscribe();
        supervisor.run(scan_kind(scanner.clone())).await.unwrap();

        assert_eq!(scanner.scanned.lock().unwrap().len(), total);
        assert_eq!(sched.deferred_count(), 0);
        let mut first_attempts = None;
        while let Ok(event) = events.try_recv() {
            if let SweepEvent::CellFinished { outcome } = event {
                first_attempts.get_or_insert(outcome.attempts);
            }
        }
        assert_eq!(first_attempts, Some(3));
    }

    #[tokio::test]
    async fn cells_failing_every_attempt_are_deferred_to_the_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let total = sched.remaining_count();
        let scanner = Arc::new(RecordingScanner::new(usize::MAX));

        let config = SupervisorConfig {
            max_attempts: 2,
            ..fast_config(2)
        };
        let supervisor = Supervisor::new(config, sched.clone(), Arc::new(PauseSignal::new()));
        supervisor.run(scan_kind(scanner)).await.unwrap();

        assert_eq!(sched.deferred_count(), total);
        let stored = CheckpointStore::new(dir.path()).load("default").unwrap().unwrap();
        assert_eq!(stored.len(), total);
    }

    #[tokio::test]
    async fn paused_workers_hold_cells_until_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let total = sched.remaining_count();
        let pause = Arc::new(PauseSignal::new());
        pause.set();

        let scanner = Arc::new(RecordingScanner::new(0));
        let mut supervisor = Supervisor::new(fast_config(2), sched.clone(), pause.clone());
        let mut events = supervisor.subscribe();
        supervisor.start(scan_kind(scanner.clone())).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(scanner.scanned.lock().unwrap().is_empty());
        assert_eq!(sched.remaining_count(), total);
        assert!(supervisor.is_alive());

        pause.clear();
        let done = supervisor.wait().await;
        assert!(!done.any_panicked());
        assert_eq!(scanner.scanned.lock().unwrap().len(), total);

        let mut paused = 0;
        let mut resumed = 0;
        while let Ok(event) = events.try_recv() {
            match event {
                SweepEvent::WorkerPaused { .. } => paused += 1,
                SweepEvent::WorkerResumed { .. } => resumed += 1,
                _ => {}
            }
        }
        assert_eq!(paused, 2);
        assert_eq!(resumed, 2);
    }

    #[tokio::test]
    async fn pause_raised_mid_scan_holds_the_next_cell() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let order = CheckpointStore::new(dir.path()).load("default").unwrap().unwrap();
        let pause = Arc::new(PauseSignal::new());
        let scanner = Arc::new(PausingScanner::new(pause.clone(), false));

        let mut supervisor = Supervisor::new(fast_config(1), sched.clone(), pause.clone());
        supervisor.start(scan_kind(scanner.clone())).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*scanner.scanned.lock().unwrap(), order[..1]);
        assert_eq!(sched.completed_count(), 1);
        assert_eq!(sched.remaining_count(), order.len() - 1);
        assert!(supervisor.is_alive());

        pause.clear();
        supervisor.wait().await;
        assert_eq!(scanner.calls_while_paused.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(*scanner.scanned.lock().unwrap(), order);
    }

    #[tokio::test]
    async fn pause_raised_during_a_failed_attempt_holds_the_retry() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let order = CheckpointStore::new(dir.path()).load("default").unwrap().unwrap();
        let pause = Arc::new(PauseSignal::new());
        let scanner = Arc::new(PausingScanner::new(pause.clone(), true));

        let mut supervisor = Supervisor::new(fast_config(1), sched.clone(), pause.clone());
        let mut events = supervisor.subscribe();
        supervisor.start(scan_kind(scanner.clone())).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(scanner.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(scanner.scanned.lock().unwrap().is_empty());
        assert_eq!(sched.completed_count(), 0);
        // The failing cell is still in flight, so it is still owed.
        assert_eq!(sched.remaining_count(), order.len());
        assert_eq!(sched.checkpoint().unwrap(), order.len());

        pause.clear();
        supervisor.wait().await;
        assert_eq!(scanner.calls_while_paused.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(*scanner.scanned.lock().unwrap(), order);
        assert_eq!(sched.deferred_count(), 0);

        let mut first_attempts = None;
        while let Ok(event) = events.try_recv() {
            if let SweepEvent::CellFinished { outcome } = event {
                first_attempts.get_or_insert(outcome.attempts);
            }
        }
        assert_eq!(first_attempts, Some(2));
    }

    #[tokio::test]
    async fn finished_session_does_not_wait_a_full_poll_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.save("default", &[]).unwrap();
        let sched = CoverageScheduler::new(SchedulerConfig::default(), store).unwrap();
        sched
            .initialize(&BoundingBox::new(37.0, -122.1, 37.01, -122.09).unwrap())
            .unwrap();
        let sched = Arc::new(sched);

        let config = SupervisorConfig {
            poll_interval: Duration::from_secs(60),
            ..fast_config(2)
        };
        let supervisor = Supervisor::new(config, sched, Arc::new(PauseSignal::new()));
        let scanner = Arc::new(RecordingScanner::new(0));
        let done = tokio::time::timeout(Duration::from_secs(5), supervisor.run(scan_kind(scanner)))
            .await
            .expect("supervisor should notice drained workers quickly")
            .unwrap();
        assert!(done.exits.iter().all(|e| e.reason == TerminationReason::Exhausted));
    }

    #[tokio::test]
    async fn panicking_worker_is_reported_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let total = sched.remaining_count();

        let supervisor = Supervisor::new(fast_config(1), sched.clone(), Arc::new(PauseSignal::new()));
        let done = supervisor.run(scan_kind(Arc::new(PanickingScanner))).await.unwrap();

        assert!(done.any_panicked());
        assert_eq!(
            done.exits[0].reason,
            TerminationReason::Panicked("scanner exploded".to_string())
        );
        // The cell being scanned is still owed.
        let stored = CheckpointStore::new(dir.path()).load("default").unwrap().unwrap();
        assert_eq!(stored.len(), total);
    }

    #[tokio::test]
    async fn synthetic_worker_stops_after_configured_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let sched = ready_scheduler(dir.path());
        let remaining = sched.remaining_count();
        let config = SupervisorConfig {
            mock_rounds: Some(4),
            ..fast_config(5)
        };

        let supervisor = Supervisor::new(config, sched.clone(), Arc::new(PauseSignal::new()));
        let mut events = supervisor.subscribe();
        let generator = MockGenerator::new(Position::at_ground(37.0, -122.0));
        let done = supervisor
            .run(WorkerKind::Synthetic { generator })
            .await
            .unwrap();

        assert_eq!(done.exits.len(), 1);
        assert_eq!(done.exits[0].reason, TerminationReason::RoundsCompleted);
        assert_eq!(sched.remaining_count(), remaining);

        let mut rounds = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, SweepEvent::CellFinished { .. }) {
                rounds += 1;
            }
        }
        assert_eq!(rounds, 4);
    }

    #[test]
    fn panic_payloads_are_stringified() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42_u8), "unknown panic payload");
    }
}
