//! Error taxonomy for the codec, the stage adapter and the orchestrator.
//!
//! End of a record stream is never an error: decoders return `Ok(None)` and
//! record iterators simply end.

/// Errors surfaced by `tbpipe`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The codec met an unknown tag, an impossible length or truncated data.
    #[error("malformed typedbytes stream: {0}")]
    Malformed(String),

    /// A stage's worker process exited while records were still expected,
    /// or exited with a nonzero status.
    #[error("worker died with exit code {code}: [{command}]\n--- worker stderr ---\n{stderr}")]
    WorkerDied {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The worker's `info` invocation did not print a usable JSON object.
    #[error("cannot query worker info: [{command}]\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}")]
    InfoQuery {
        command: String,
        stdout: String,
        stderr: String,
    },

    /// Contradictory or missing job parameters, raised before any worker runs.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    /// Whether this error reports a dead worker.
    pub fn is_worker_died(&self) -> bool {
        matches!(self, Error::WorkerDied { .. })
    }

    /// The worker's exit code, if this error reports a dead worker.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::WorkerDied { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
