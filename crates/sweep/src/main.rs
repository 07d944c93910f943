mod cli;
mod constants;
mod logging;
mod shutdown;
mod ui;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use geosweep_core::{Credentials, Position, default_credentials_path, load_credentials};
use geosweep_engine::{
    BoundingBox, CheckpointStore, CoverageScheduler, ElevationClient, HttpScanner, MockGenerator,
    NominatimGeocoder, PauseSignal, Supervisor, SweepEvent, WorkerKind, resolve_start_position,
};

use crate::cli::Cli;
use crate::logging::init_logging;
use crate::shutdown::{
    ShutdownController, ShutdownEvent, spawn_ctrl_c_handler, spawn_pause_toggle_handler,
};
use crate::ui::Ui;

async fn resolve_position(cli: &Cli) -> anyhow::Result<Position> {
    let geocoder = NominatimGeocoder::new(cli.geocoder_url.clone(), cli.http_timeout)?;
    let elevation = match cli.gmaps_key.as_deref().map(str::trim) {
        Some(key) if !key.is_empty() => Some(ElevationClient::new(
            cli.elevation_url.clone(),
            key,
            cli.http_timeout,
        )?),
        _ => {
            debug!("no maps key configured; skipping altitude lookup");
            None
        }
    };
    Ok(resolve_start_position(&cli.location, &geocoder, elevation.as_ref()).await?)
}

fn load_accounts(cli: &Cli) -> anyhow::Result<Credentials> {
    let path: PathBuf = match &cli.credentials {
        Some(path) => path.clone(),
        None => default_credentials_path()?,
    };
    let credentials = load_credentials(&path)?
        .with_context(|| format!("no credentials file at {}", path.display()))?;
    if credentials.is_empty() {
        anyhow::bail!("{} lists no accounts", path.display());
    }
    info!(path = %path.display(), accounts = credentials.accounts.len(), "loaded credentials");
    Ok(credentials)
}

fn build_worker(cli: &Cli, position: Position) -> anyhow::Result<WorkerKind> {
    if cli.mock {
        debug!("starting a synthetic worker");
        return Ok(WorkerKind::Synthetic {
            generator: MockGenerator::new(position),
        });
    }
    debug!(endpoint = %cli.scan_endpoint, "starting scan workers");
    let scanner = HttpScanner::new(cli.scan_endpoint.clone(), cli.http_timeout)?;
    Ok(WorkerKind::Scan {
        scanner: Arc::new(scanner),
        credentials: Arc::new(load_accounts(cli)?),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let progress_enabled = !cli.no_progress && std::io::stderr().is_terminal();
    let mut ui = progress_enabled.then(Ui::new);
    init_logging(cli.debug, ui.as_ref().map(Ui::bar))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        session = %cli.session,
        checkpoint = %cli.checkpoint,
        "geosweep starting"
    );

    let store = match &cli.state_dir {
        Some(dir) => CheckpointStore::new(dir),
        None => CheckpointStore::in_state_home().context("locate state directory")?,
    };
    if cli.reset {
        if store.remove(&cli.session)? {
            info!(session = %cli.session, "removed checkpoint; coverage will be recomputed");
        } else {
            info!(session = %cli.session, "no checkpoint to reset");
        }
    }

    let bbox = BoundingBox::new(cli.min_lat, cli.min_lon, cli.max_lat, cli.max_lon)?;
    let position = resolve_position(&cli).await?;

    let scheduler = Arc::new(CoverageScheduler::new(cli.scheduler_config(), store)?);
    if scheduler.checkpoint_path()?.exists() {
        info!("resuming an interrupted sweep");
    } else {
        info!("computing cell ids, this could take a while");
    }
    scheduler.initialize(&bbox)?;
    let initial = scheduler.initial_position(position);
    info!(
        position = %initial,
        remaining = scheduler.remaining_count(),
        "initial position"
    );

    let kind = build_worker(&cli, position)?;
    let mock = cli.mock;

    let pause = Arc::new(PauseSignal::new());
    let mut supervisor = Supervisor::new(cli.supervisor_config(), scheduler.clone(), pause.clone());
    let mut events = supervisor.subscribe();

    let shutdown = Arc::new(ShutdownController::new());
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::mpsc::unbounded_channel::<ShutdownEvent>();
    spawn_ctrl_c_handler(shutdown, shutdown_tx);
    spawn_pause_toggle_handler(pause.clone())?;

    supervisor.start(kind)?;
    if let Some(ui) = &mut ui {
        if mock {
            ui.start(None, 0);
        } else {
            let total = scheduler.total_count() as u64;
            ui.start(Some(total), total - scheduler.remaining_count() as u64);
        }
    }

    let wait = supervisor.wait();
    tokio::pin!(wait);
    let mut events_open = true;

    let terminated = loop {
        tokio::select! {
            done = &mut wait => break Some(done),
            ev = shutdown_rx.recv() => {
                match ev {
                    Some(ShutdownEvent::Graceful) => {
                        pause.set();
                        warn!("stop requested: pausing workers and saving progress (press CTRL+C again to exit immediately)");
                        if let Some(ui) = &mut ui {
                            ui.set_status(Some("stopping"));
                        }
                        match scheduler.checkpoint() {
                            Ok(remaining) => info!(remaining, "checkpoint written"),
                            Err(err) => error!(error = %err, "final checkpoint failed"),
                        }
                        break None;
                    }
                    Some(ShutdownEvent::Immediate) => {
                        warn!("stop requested again: exiting immediately");
                        if let Some(ui) = &ui {
                            ui.freeze();
                        }
                        std::process::exit(130);
                    }
                    None => {}
                }
            }
            evt = events.recv(), if events_open => {
                let evt = match evt {
                    Ok(v) => v,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => {
                        events_open = false;
                        continue;
                    }
                };
                let Some(ui) = &mut ui else {
                    continue;
                };
                match evt {
                    SweepEvent::CellFinished { outcome } => ui.cell_finished(&outcome),
                    SweepEvent::CellDeferred { .. } => ui.cell_deferred(),
                    SweepEvent::WorkerPaused { .. } => ui.set_status(Some("paused")),
                    SweepEvent::WorkerResumed { .. } => ui.set_status(None),
                    SweepEvent::Warning { message } => ui.println(&message),
                    SweepEvent::Started { .. }
                    | SweepEvent::CellStarted { .. }
                    | SweepEvent::Checkpointed { .. }
                    | SweepEvent::WorkerExited { .. } => {}
                }
            }
        }
    };

    if let Some(ui) = &ui {
        ui.freeze();
    }

    let Some(terminated) = terminated else {
        return Ok(());
    };
    if terminated.any_panicked() {
        error!("a worker panicked; its cell stays in the checkpoint for the next run");
    }
    info!(
        completed = scheduler.completed_count(),
        deferred = scheduler.deferred_count(),
        remaining = scheduler.remaining_count(),
        "all workers exited"
    );
    Ok(())
}
