#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("predictor unavailable: {0}")]
    Unavailable(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SchedulerError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Unavailable(_) => "UNAVAILABLE",
            Self::PersistenceFailure(_) | Self::Json(_) | Self::Io(_) => "PERSISTENCE_FAILURE",
        }
    }

    /// Folds raw serde/io failures from a store into `PersistenceFailure`.
    pub(crate) fn into_persistence(self) -> Self {
        match self {
            Self::Json(e) => Self::PersistenceFailure(e.to_string()),
            Self::Io(e) => Self::PersistenceFailure(e.to_string()),
            other => other,
        }
    }

    /// Folds raw serde/io failures from a model source into `Unavailable`.
    pub(crate) fn into_unavailable(self) -> Self {
        match self {
            Self::Json(e) => Self::Unavailable(format!("malformed model: {e}")),
            Self::Io(e) => Self::Unavailable(format!("model not readable: {e}")),
            other => other,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(SchedulerError::NotFound("x".into()).kind(), "NOT_FOUND");
        assert_eq!(SchedulerError::Conflict("x".into()).kind(), "CONFLICT");
        let io = SchedulerError::from(std::io::Error::other("disk"));
        assert_eq!(io.kind(), "PERSISTENCE_FAILURE");
        assert!(matches!(
            io.into_persistence(),
            SchedulerError::PersistenceFailure(_)
        ));
    }

    #[test]
    fn test_unavailable_folding() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        let folded = SchedulerError::from(err).into_unavailable();
        assert_eq!(folded.kind(), "UNAVAILABLE");
    }
}
