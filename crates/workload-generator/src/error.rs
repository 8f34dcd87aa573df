//! Template compilation errors.

/// Error raised while compiling a value template.
///
/// Evaluation itself cannot fail: every parameter is checked here, once,
/// when the workload is loaded.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// `^Name` key that no generator answers to
    #[error("Unknown generator '^{0}'")]
    UnknownGenerator(String),

    /// Generator parameters failed to parse
    #[error("Invalid parameters for '^{generator}': {message}")]
    InvalidParameters { generator: String, message: String },

    /// Template did not produce the expected shape
    #[error("Expected {expected}, found {found}")]
    UnexpectedShape { expected: String, found: String },

    /// Document key that cannot be used as a field name
    #[error("Unsupported document key: {0}")]
    UnsupportedKey(String),
}

impl ExpressionError {
    pub(crate) fn invalid(generator: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            generator: generator.to_string(),
            message: message.into(),
        }
    }
}
