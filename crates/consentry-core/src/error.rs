//! Error types for Consentry

/// Result type alias using Consentry's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Consentry operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rule loading or compilation errors
    #[error("rule error: {0}")]
    Rule(String),

    /// Consent token or record errors
    #[error("consent error: {0}")]
    Consent(String),

    /// HTML processing errors
    #[error("html error: {0}")]
    Html(String),

    /// Response buffering errors
    #[error("buffer error: {0}")]
    Buffer(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new rule error
    pub fn rule(msg: impl Into<String>) -> Self {
        Self::Rule(msg.into())
    }

    /// Create a new consent error
    pub fn consent(msg: impl Into<String>) -> Self {
        Self::Consent(msg.into())
    }

    /// Create a new html error
    pub fn html(msg: impl Into<String>) -> Self {
        Self::Html(msg.into())
    }

    /// Create a new buffer error
    pub fn buffer(msg: impl Into<String>) -> Self {
        Self::Buffer(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
