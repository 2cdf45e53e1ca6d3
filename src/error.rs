use thiserror::Error;

/// Main error type for impactmap
#[derive(Error, Debug)]
pub enum ImpactError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failures (connect, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status returned by the directory API
    #[error("Directory API error {status}: {message}")]
    Api { status: u16, message: String },

    /// 404-class response from the directory API
    #[error("Not found: {0}")]
    NotFound(String),

    /// Parse errors (API payloads, cache blobs)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Input rejected before any network activity
    #[error("Invalid input: {0}")]
    Validation(String),
}

impl ImpactError {
    /// True for the "capability absent" signal (HTTP 404 from the vendor API).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ImpactError::NotFound(_) | ImpactError::Api { status: 404, .. })
    }
}

impl From<serde_json::Error> for ImpactError {
    fn from(err: serde_json::Error) -> Self {
        ImpactError::Parse(err.to_string())
    }
}

/// Convenient Result type using ImpactError
pub type Result<T> = std::result::Result<T, ImpactError>;
