use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

use geosweep_engine::PauseSignal;

#[derive(Debug)]
pub struct ShutdownController {
    requests: AtomicU8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownEvent {
    /// Pause workers, write a checkpoint, exit.
    Graceful,
    /// Exit without another checkpoint.
    Immediate,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            requests: AtomicU8::new(0),
        }
    }

    /// Count one more stop request and map it to the event it means.
    pub fn request(&self) -> ShutdownEvent {
        let n = self.requests.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if n == 1 {
            ShutdownEvent::Graceful
        } else {
            ShutdownEvent::Immediate
        }
    }
}

pub fn spawn_ctrl_c_handler(
    shutdown: Arc<ShutdownController>,
    shutdown_tx: mpsc::UnboundedSender<ShutdownEvent>,
) {
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            let event = shutdown.request();
            let _ = shutdown_tx.send(event);
            if event == ShutdownEvent::Immediate {
                return;
            }
        }
    });
}

/// `SIGUSR1` flips the pause signal.
#[cfg(unix)]
pub fn spawn_pause_toggle_handler(pause: Arc<PauseSignal>) -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = signal(SignalKind::user_defined1())?;
    tokio::spawn(async move {
        while usr1.recv().await.is_some() {
            if pause.toggle() {
                tracing::info!("SIGUSR1: pausing workers");
            } else {
                tracing::info!("SIGUSR1: resuming workers");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn spawn_pause_toggle_handler(_pause: Arc<PauseSignal>) -> anyhow::Result<()> {
    tracing::debug!("pause toggle signal is not available on this platform");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_request_is_graceful_then_immediate() {
        let shutdown = ShutdownController::new();
        assert_eq!(shutdown.request(), ShutdownEvent::Graceful);
        assert_eq!(shutdown.request(), ShutdownEvent::Immediate);
        assert_eq!(shutdown.request(), ShutdownEvent::Immediate);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigusr1_toggles_pause() {
        let pause = Arc::new(PauseSignal::new());
        spawn_pause_toggle_handler(pause.clone()).unwrap();

        let pid = std::process::id().to_string();
        let status = std::process::Command::new("kill")
            .args(["-USR1", pid.as_str()])
            .status()
            .unwrap();
        assert!(status.success());

        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        while !pause.is_set() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(pause.is_set());
    }
}
