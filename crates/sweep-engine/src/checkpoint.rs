//! Durable record of the cells a session still has to scan.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use geosweep_core::dirs::{BaseDir, app_dir};
use geosweep_core::{CellId, SCAN_LEVEL};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SweepError;

const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    #[serde(default)]
    session: String,
    saved_at: DateTime<Utc>,
    cells: Vec<CellId>,
}

/// Reads and writes `remaining_cells_id_<session>.json` files in one directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// A store rooted at `dir` (created on first save).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A store in the per-user state directory.
    pub fn in_state_home() -> anyhow::Result<Self> {
        Ok(Self::new(default_state_dir()?))
    }

    /// Directory holding the checkpoints.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint file for `session`.
    pub fn path_for(&self, session: &str) -> Result<PathBuf, SweepError> {
        validate_session(session)?;
        Ok(self.dir.join(format!("remaining_cells_id_{session}.json")))
    }

    /// Previously saved remaining cells, in saved order.
    ///
    /// `Ok(None)` means no prior session. Undecodable contents are
    /// [`SweepError::CorruptCheckpoint`] and are never silently discarded.
    pub fn load(&self, session: &str) -> Result<Option<Vec<CellId>>, SweepError> {
        let path = self.path_for(session)?;
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(SweepError::Checkpoint { path, source }),
        };

        let corrupt = |reason: String| SweepError::CorruptCheckpoint {
            path: path.clone(),
            reason,
        };

        let file: CheckpointFile =
            serde_json::from_slice(&raw).map_err(|err| corrupt(err.to_string()))?;
        if file.version != CHECKPOINT_VERSION {
            return Err(corrupt(format!("unsupported version {}", file.version)));
        }
        if let Some(bad) = file
            .cells
            .iter()
            .find(|c| !c.is_valid() || c.level() != SCAN_LEVEL)
        {
            return Err(corrupt(format!("invalid cell id {}", bad.raw())));
        }
        if file.session != session {
            warn!(
                path = %path.display(),
                stored = %file.session,
                session,
                "checkpoint was written under a different session key"
            );
        }

        debug!(
            path = %path.display(),
            cells = file.cells.len(),
            saved_at = %file.saved_at,
            "loaded checkpoint"
        );
        Ok(Some(file.cells))
    }

    /// Atomically replace the checkpoint for `session` with `cells`.
    ///
    /// Writes a sibling temp file, syncs it and renames it over the old one, so
    /// an interrupted save leaves the previous checkpoint intact.
    pub fn save(&self, session: &str, cells: &[CellId]) -> Result<(), SweepError> {
        let path = self.path_for(session)?;
        let file = CheckpointFile {
            version: CHECKPOINT_VERSION,
            session: session.to_string(),
            saved_at: Utc::now(),
            cells: cells.to_vec(),
        };
        persist_file(&path, &file).map_err(|source| SweepError::Checkpoint {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), cells = cells.len(), "saved checkpoint");
        Ok(())
    }

    /// Delete the checkpoint for `session`. `Ok(false)` if there was none.
    pub fn remove(&self, session: &str) -> Result<bool, SweepError> {
        let path = self.path_for(session)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SweepError::Checkpoint { path, source }),
        }
    }
}

fn persist_file(path: &Path, file: &CheckpointFile) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other(format!("invalid checkpoint path: {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_vec(file).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut out = std::fs::File::create(&tmp)?;
        out.write_all(&json)?;
        out.sync_all()?;
    }
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Session keys end up in file names.
pub fn validate_session(session: &str) -> Result<(), SweepError> {
    let ok = !session.is_empty()
        && session != "."
        && session != ".."
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok {
        Ok(())
    } else {
        Err(SweepError::InvalidSession(session.to_string()))
    }
}

/// `$XDG_STATE_HOME/geosweep` (or the platform equivalent).
pub fn default_state_dir() -> anyhow::Result<PathBuf> {
    app_dir(BaseDir::State)
}
