use std::path::PathBuf;

/// Failures of the sweep core.
///
/// Everything except [`SweepError::AltitudeUnavailable`] is fatal at start-up:
/// scanning the wrong region or losing resumability is worse than stopping.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    /// The bounding box is degenerate, out of range, or too large to cover.
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// A checkpoint exists but its contents cannot be decoded.
    #[error(
        "corrupt checkpoint {}: {reason} (delete it or rerun with --reset to recompute coverage)",
        path.display()
    )]
    CorruptCheckpoint {
        /// Checkpoint file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// No usable starting coordinate from any source.
    #[error("could not resolve a position for {query:?}: {reason}")]
    PositionUnresolved {
        /// Location string as given by the operator.
        query: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The elevation lookup failed. Callers default the altitude to zero.
    #[error("altitude unavailable: {0}")]
    AltitudeUnavailable(String),

    /// The session key cannot be used to name a checkpoint file.
    #[error("invalid session key {0:?}: use ASCII letters, digits, '-', '_' or '.'")]
    InvalidSession(String),

    /// Reading or writing a checkpoint failed at the filesystem level.
    #[error("checkpoint i/o on {}: {source}", path.display())]
    Checkpoint {
        /// File being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}
