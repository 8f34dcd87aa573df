//! Error types for the MongoDB backend.

use mongodb::error::{ErrorKind, RETRYABLE_WRITE_ERROR, TRANSIENT_TRANSACTION_ERROR};
use thiserror::Error;
use workload_core::BackendError;

/// Errors raised inside the MongoDB client before they are classified.
#[derive(Error, Debug)]
pub enum MongoBackendError {
    /// MongoDB connection or command error.
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    /// An option the driver cannot express.
    #[error("Unsupported option: {0}")]
    UnsupportedOption(String),

    /// Session routing requested without an active transaction.
    #[error("No active session: {0}")]
    NoSession(String),

    /// Already classified, e.g. a bulk write with per-item failures.
    #[error(transparent)]
    Backend(BackendError),
}

impl From<MongoBackendError> for BackendError {
    fn from(err: MongoBackendError) -> Self {
        match err {
            MongoBackendError::MongoDB(e) => classify(&e),
            MongoBackendError::UnsupportedOption(msg) => BackendError::Command(msg),
            MongoBackendError::NoSession(msg) => BackendError::Session(msg),
            MongoBackendError::Backend(e) => e,
        }
    }
}

/// Map a driver error onto the engine's transient/fatal split.
///
/// Errors the server labels as retryable, network errors and server
/// selection timeouts are transient; everything else is a command failure.
pub fn classify(err: &mongodb::error::Error) -> BackendError {
    if err.contains_label(TRANSIENT_TRANSACTION_ERROR) || err.contains_label(RETRYABLE_WRITE_ERROR)
    {
        return BackendError::Transient(err.to_string());
    }
    match err.kind.as_ref() {
        ErrorKind::Io(_)
        | ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => BackendError::Transient(err.to_string()),
        ErrorKind::Transaction { .. } => BackendError::Session(err.to_string()),
        _ => BackendError::Command(err.to_string()),
    }
}
