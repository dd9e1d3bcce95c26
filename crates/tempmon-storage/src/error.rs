/// Errors that can occur within the storage layer and the metric sources.
///
/// # Examples
///
/// ```rust
/// use tempmon_storage::error::StorageError;
///
/// let err = StorageError::InvalidIdentifier("readings; drop".to_string());
/// assert!(err.to_string().contains("readings; drop"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Fetching a snapshot over HTTP failed.
    #[error("Storage: HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The metric source answered but reported a failure.
    #[error("Storage: metric source error: {0}")]
    Source(String),

    /// A configured table or column name is not a plain SQL identifier.
    #[error("Storage: invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A stored value could not be decoded.
    #[error("Storage: corrupt value in column '{column}': {detail}")]
    Corrupt { column: &'static str, detail: String },

    /// Filesystem error while preparing the database location.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
