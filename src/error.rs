//! Error types for bmcmond

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// bmcmond error types
///
/// Controller-side failures are kept as distinct variants so the session
/// layer can apply its bounded-retry policy per classification.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Controller call exceeded its deadline
    #[error("Connection timed out")]
    Timeout,

    /// Controller unreachable or transport-level failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Controller rejected the credentials or the login request
    #[error("Login failed: {0}")]
    LoginFailed(String),

    /// Push channel went silent past the staleness window
    #[error("Stale connection: no messages within the staleness window")]
    StaleConnection,

    /// Malformed frame or payload on the client protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation not supported by this controller access type
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    /// Configuration file missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
