//! Error types raised while executing a workload.

use crate::metrics::ActorIdentity;
use workload_core::{BackendError, ConfigError};

/// Failure of a single operation invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    /// The workload asked for something the session state forbids, such as
    /// `commitTransaction` with no transaction running. Never retried and
    /// never sent to the backend.
    #[error("{operation}: {message}")]
    Usage { operation: String, message: String },

    /// The backend rejected or failed the call.
    #[error("{operation}: {source}")]
    Backend {
        operation: String,
        #[source]
        source: BackendError,
    },
}

impl OperationError {
    pub fn usage(operation: &str, message: impl Into<String>) -> Self {
        Self::Usage {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn backend(operation: &str, source: BackendError) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            source,
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage { .. })
    }

    pub fn is_transient(&self) -> bool {
        match self {
            Self::Usage { .. } => false,
            Self::Backend { source, .. } => source.is_transient(),
        }
    }

    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Usage { .. } => None,
            Self::Backend { source, .. } => Some(source),
        }
    }
}

/// Failure that stops an actor instance.
#[derive(Debug, thiserror::Error)]
pub enum ActorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{actor} could not connect: {source}")]
    Connect {
        actor: ActorIdentity,
        #[source]
        source: BackendError,
    },

    #[error("{actor} failed in phase {phase}: {source}")]
    Operation {
        actor: ActorIdentity,
        phase: usize,
        #[source]
        source: OperationError,
    },
}
