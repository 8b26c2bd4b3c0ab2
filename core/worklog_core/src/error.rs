use axum::http::StatusCode;
use thiserror::Error;

/// Failure kinds surfaced by lifecycle, reconstruction and review operations.
///
/// An owner mismatch is reported as `NotFound`: ownership is part of every
/// store predicate, so a foreign session is indistinguishable from a missing one.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("session or task not found")]
    NotFound,

    #[error("session already has an open task")]
    ConflictOpenTask,

    #[error("already ended")]
    AlreadyEnded,

    #[error("end instant precedes start instant")]
    InvalidTimeOrder,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("content codec: {0}")]
    ContentCodec(String),
}

impl CoreError {
    /// Stable short code returned to clients in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound => "not_found",
            CoreError::ConflictOpenTask => "conflict_open_task",
            CoreError::AlreadyEnded => "already_ended",
            CoreError::InvalidTimeOrder => "invalid_time_order",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::UpstreamUnavailable(_) => "upstream_unavailable",
            CoreError::ContentCodec(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::ConflictOpenTask | CoreError::AlreadyEnded => StatusCode::CONFLICT,
            CoreError::InvalidTimeOrder | CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::ContentCodec(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::UpstreamUnavailable(format!("store: {err}"))
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(err: reqwest::Error) -> Self {
        CoreError::UpstreamUnavailable(format!("summarizer: {err}"))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
