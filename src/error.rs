use std::path::PathBuf;

use thiserror::Error;

/// Failures reported by the emulation backend.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("emulator is not loaded")]
    NotLoaded,
    #[error("emulator crashed: {0}")]
    Crashed(String),
    #[error("emulator snapshot I/O failed")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("emulator unavailable")]
    CollaboratorUnavailable(#[from] EmulatorError),
    #[error("corrupt persisted state in {}: {reason}", path.display())]
    CorruptPersistedState { path: PathBuf, reason: String },
    #[error("invalid milestone sequence: {0}")]
    InvalidMilestoneSequence(String),
    #[error("malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

impl CoreError {
    /// True when the error came from the emulation backend anywhere in an
    /// `anyhow` chain.
    pub fn is_collaborator_failure(err: &anyhow::Error) -> bool {
        err.chain().any(|cause| {
            cause.downcast_ref::<EmulatorError>().is_some()
                || matches!(
                    cause.downcast_ref::<CoreError>(),
                    Some(CoreError::CollaboratorUnavailable(_))
                )
        })
    }
}
