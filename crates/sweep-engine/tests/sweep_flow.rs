use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use geosweep_core::{Account, CellId, Credentials, Position};
use geosweep_engine::{
    BoundingBox, CellScanner, CheckpointStore, CoverageScheduler, PauseSignal,
    ScanReport, SchedulerConfig, Supervisor, SupervisorConfig, SweepError, TerminationReason,
    WorkerKind, cell_center,
};

fn scenario_box() -> BoundingBox {
    BoundingBox::new(37.0, -122.1, 37.01, -122.09).unwrap()
}

fn config(session: &str) -> SchedulerConfig {
    SchedulerConfig {
        session: session.to_string(),
        ..SchedulerConfig::default()
    }
}

/// Scans at most `budget` cells, then panics so the run dies mid-pass.
struct BudgetScanner {
    budget: usize,
    scanned: Mutex<Vec<CellId>>,
}

impl CellScanner for BudgetScanner {
    fn scan(&self, cell: CellId, position: Position, _: Option<&Account>) -> anyhow::Result<ScanReport> {
        let mut scanned = self.scanned.lock().unwrap();
        if scanned.len() >= self.budget {
            drop(scanned);
            panic!("simulated crash");
        }
        scanned.push(cell);
        Ok(ScanReport {
            cell,
            position,
            scanned_at: chrono::Utc::now(),
            encounters: Vec::new(),
            forts: Vec::new(),
        })
    }
}

fn fast() -> SupervisorConfig {
    SupervisorConfig {
        workers: 1,
        poll_interval: Duration::from_millis(10),
        scan_delay: Duration::ZERO,
        retry_delay: Duration::ZERO,
        ..SupervisorConfig::default()
    }
}

#[test]
fn first_run_persists_and_restart_resumes_the_same_order() {
    let dir = tempfile::tempdir().unwrap();

    let first = CoverageScheduler::new(config("sf"), CheckpointStore::new(dir.path())).unwrap();
    let order = first.initialize(&scenario_box()).unwrap();
    assert!(!order.is_empty());

    let bbox = scenario_box();
    for cell in &order {
        let c = cell_center(*cell);
        assert!((c.lat - bbox.min_lat()).abs() < 1.0 && (c.lon - bbox.min_lon()).abs() < 1.0);
    }

    let restarted = CoverageScheduler::new(config("sf"), CheckpointStore::new(dir.path())).unwrap();
    assert_eq!(restarted.initialize(&scenario_box()).unwrap(), order);
    assert_eq!(restarted.dequeue(), Some(order[0]));
}

#[test]
fn malformed_checkpoint_stops_start_up() {
    let dir = tempfile::tempdir().unwrap();
    let store = CheckpointStore::new(dir.path());
    std::fs::write(store.path_for("sf").unwrap(), [0x80, 0x04, 0x95, 0xff]).unwrap();

    let scheduler = CoverageScheduler::new(config("sf"), store).unwrap();
    let err = scheduler.initialize(&scenario_box()).unwrap_err();
    assert!(matches!(err, SweepError::CorruptCheckpoint { .. }), "{err}");
    assert_eq!(scheduler.try_dequeue(), None);
}

#[tokio::test]
async fn crashed_run_is_finished_by_the_next_one() {
    let dir = tempfile::tempdir().unwrap();

    let scheduler = Arc::new(
        CoverageScheduler::new(config("crash"), CheckpointStore::new(dir.path())).unwrap(),
    );
    let order = scheduler.initialize(&scenario_box()).unwrap();
    assert!(order.len() > 3);

    let first_scanner = Arc::new(BudgetScanner {
        budget: 3,
        scanned: Mutex::new(Vec::new()),
    });
    let done = Supervisor::new(fast(), scheduler.clone(), Arc::new(PauseSignal::new()))
        .run(WorkerKind::Scan {
            scanner: first_scanner.clone(),
            credentials: Arc::new(Credentials::default()),
        })
        .await
        .unwrap();
    assert!(matches!(done.exits[0].reason, TerminationReason::Panicked(_)));

    let first_done = first_scanner.scanned.lock().unwrap().clone();
    assert_eq!(first_done, order[..3]);

    let resumed = Arc::new(
        CoverageScheduler::new(config("crash"), CheckpointStore::new(dir.path())).unwrap(),
    );
    let remaining = resumed.initialize(&scenario_box()).unwrap();
    assert_eq!(remaining, order[3..]);

    let second_scanner = Arc::new(BudgetScanner {
        budget: usize::MAX,
        scanned: Mutex::new(Vec::new()),
    });
    let done = Supervisor::new(fast(), resumed.clone(), Arc::new(PauseSignal::new()))
        .run(WorkerKind::Scan {
            scanner: second_scanner.clone(),
            credentials: Arc::new(Credentials::default()),
        })
        .await
        .unwrap();
    assert_eq!(done.exits[0].reason, TerminationReason::Exhausted);

    let mut all: Vec<CellId> = first_done;
    all.extend(second_scanner.scanned.lock().unwrap().iter().copied());
    let unique: HashSet<CellId> = all.iter().copied().collect();
    assert_eq!(unique.len(), order.len());
    assert_eq!(all.len(), order.len());
    assert_eq!(
        CheckpointStore::new(dir.path()).load("crash").unwrap(),
        Some(Vec::new())
    );
}
