use thiserror::Error;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

/// Failure applying or reading a snapshot, classified by what the caller
/// can do about it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// The snapshot changed underneath the change set. Retrying after a
    /// fresh read may succeed.
    #[error("snapshot conflict: {0}")]
    Conflict(String),

    /// The storage layer failed (disk, pool, transaction). Retrying may
    /// succeed.
    #[error("storage failure: {0}")]
    IoFailure(String),

    /// The on-disk schema does not match this build. Retrying cannot help;
    /// the database needs migration.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

impl PersistError {
    /// Whether retrying the same apply can possibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::SchemaMismatch(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Conflict(_) => "conflict",
            Self::IoFailure(_) => "io-failure",
            Self::SchemaMismatch(_) => "schema-mismatch",
        }
    }
}
