//! Error types for vibebar-core operations.

/// All errors that can occur in vibebar-core operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl CoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }
}

/// Convenience alias for Results using CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
