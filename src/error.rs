//! Unified error type for binpkg.

use thiserror::Error;

/// Unified error type for all binpkg operations.
///
/// Every surfaced failure maps onto one of these kinds; each carries a
/// message and, where available, the underlying cause.
#[derive(Error, Debug)]
pub enum PkgError {
    /// Filesystem or network failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Digest, size, or signature mismatch. Never retried.
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Local or remote database transaction failure.
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    /// Could not acquire a database lock in time.
    #[error("Database is locked by another process{0}", .holder.map(|p| format!(" (pid {p})")).unwrap_or_default())]
    LockBusy {
        /// Pid of the current lock holder when known.
        holder: Option<i32>,
    },

    /// Two packages claim the same file path.
    #[error("File conflict on {path}: owned by {owner}, claimed by {claimer}")]
    Conflict {
        /// Conflicting absolute path.
        path: String,
        /// Package currently owning the path.
        owner: String,
        /// Package attempting to claim the path.
        claimer: String,
    },

    /// Attempt to modify a locked package without `force_locked`.
    #[error("Package {0} is locked and may not be modified")]
    Locked(String),

    /// A dependency constraint cannot be satisfied.
    #[error("Cannot satisfy dependency: {0}")]
    DepUnsat(String),

    /// Unbreakable dependency cycle in the plan.
    #[error("Dependency cycle cannot be broken: {0}")]
    Cycle(String),

    /// A pre/post script returned non-zero.
    #[error("Script {kind} for {package} failed with status {status}")]
    ScriptFail {
        /// Script kind (e.g. "pre-install").
        kind: String,
        /// Package the script belongs to.
        package: String,
        /// Exit status of the script process.
        status: i32,
    },

    /// Caller-requested cancellation observed at a step boundary.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON parsing or serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Custom parsing error with message.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Package not found in the local database or any catalogue.
    #[error("Package not found: {0}")]
    NotFound(String),
}

/// Result type alias for binpkg operations.
pub type Result<T> = std::result::Result<T, PkgError>;

impl PkgError {
    /// What: Decide whether the error may be retried by the fetcher.
    ///
    /// Inputs: None
    ///
    /// Output:
    /// - `true` for transient I/O failures, `false` for everything else.
    ///
    /// Details:
    /// - Integrity failures (`Corrupt`) are never retried.
    /// - Database errors are retried once at the transaction boundary by
    ///   the database layer itself, not by callers of this method.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
