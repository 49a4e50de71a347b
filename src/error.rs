use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No resolvable user identity")]
    Unauthenticated,

    #[error("Invalid activity outcome: {0}")]
    InvalidActivityOutcome(String),

    #[error("Reference text must not be empty")]
    InvalidReferenceText,

    /// Connection-level failure: lost connection, pool timeout, closed pool.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The store answered but refused or could not decode the request.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Transient storage failures are the only retryable class.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Persistence(_))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => EngineError::Persistence(err.to_string()),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
