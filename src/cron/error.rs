use thiserror::Error;

/// Errors returned synchronously by store and service operations.
///
/// Failures that happen on a timer (arming, lapsed one-shots, delivery) are
/// never returned here; they are published as [`super::events::CronEvent::Error`].
#[derive(Debug, Error)]
pub enum CronError {
    /// Malformed schedule string, wrong cron field count, unparseable or past timestamp.
    #[error("Invalid schedule: {0}")]
    Validation(String),

    #[error("A job named \"{0}\" already exists")]
    DuplicateName(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CronError>;
