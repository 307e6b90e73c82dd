//! Error types for Stowage operations.

use thiserror::Error;

/// All error kinds a Stowage operation can produce (§7 of the design: the
/// taxonomy is closed — `InvalidArgument`, `NotFound`, `AlreadyExists`,
/// `Conflict`, `IntegrityError`, `IoError`, `Canceled`, `Internal`).
///
/// Leaf components (`Store`, `FileSystem`) raise the narrowest kind;
/// `Collection` and `CollectionRepo` propagate without rewriting. The
/// service surface is the single place that maps a kind to a wire status
/// code — never recover silently from `IntegrityError` or `Internal`.
#[derive(Error, Debug)]
pub enum StowageError {
    /// A caller-supplied argument failed validation (empty id, bad path,
    /// unparseable page token, disallowed `order_by`, …).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested record, collection, backup, or file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A create would collide with an existing id or namespaced name.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// An operation that would overwrite existing state was attempted
    /// without an explicit `overwrite` opt-in.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A backup or storage artifact failed an integrity check.
    #[error("integrity error: {0}")]
    IntegrityError(String),

    /// A filesystem or database I/O operation failed.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    /// The underlying SQLite engine reported an error.
    #[error("store error: {0}")]
    StoreError(#[from] rusqlite::Error),

    /// The operation was canceled by its caller before completion.
    #[error("canceled: {0}")]
    Canceled(String),

    /// An unexpected internal error; never silently recovered from.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for `Result<T, StowageError>`.
pub type Result<T> = std::result::Result<T, StowageError>;

impl StowageError {
    /// Short, stable tag for the error kind, used by callers that need to
    /// branch on kind without matching the full enum — the service
    /// surface's status-code mapping is built on this.
    pub fn kind(&self) -> &'static str {
        match self {
            StowageError::InvalidArgument(_) => "invalid_argument",
            StowageError::NotFound(_) => "not_found",
            StowageError::AlreadyExists(_) => "already_exists",
            StowageError::Conflict(_) => "conflict",
            StowageError::IntegrityError(_) => "integrity_error",
            StowageError::IoError(_) => "io_error",
            StowageError::StoreError(_) => "io_error",
            StowageError::Canceled(_) => "canceled",
            StowageError::Internal(_) => "internal",
        }
    }
}
