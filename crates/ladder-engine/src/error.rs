use thiserror::Error;

/// Every way an engine operation can refuse or fail.
///
/// All variants except `Persistence` are raised before any state is touched.
#[derive(Error, Debug)]
pub enum LadderError {
    /// Malformed input: bad metric, out of range score, wrong mode.
    #[error("{0}")]
    Validation(String),

    /// The action is illegal for the match's current status.
    #[error("{0}")]
    StateConflict(String),

    /// The actor lacks the role, rank window or privilege the action needs.
    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl LadderError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::StateConflict(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, LadderError>;
