//! Wire status codes and the `Status{code, message}` response wrapper.
//!
//! `stowage-service` is the single place that maps a `StowageError` kind
//! to a wire status — `stowage-core` never constructs one of these.

use serde::{Deserialize, Serialize};
use stowage_core::StowageError;

/// Wire status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    FailedPrecondition,
    Internal,
    Unimplemented,
}

/// Every RPC response carries one of these, whether or not it also
/// carries a payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub code: StatusCode,
    pub message: String,
}

impl Status {
    pub fn ok() -> Self {
        Self {
            code: StatusCode::Ok,
            message: String::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok
    }
}

impl From<&StowageError> for Status {
    fn from(err: &StowageError) -> Self {
        let code = match err {
            StowageError::InvalidArgument(_) => StatusCode::InvalidArgument,
            StowageError::NotFound(_) => StatusCode::NotFound,
            StowageError::AlreadyExists(_) => StatusCode::AlreadyExists,
            StowageError::Conflict(_) => StatusCode::FailedPrecondition,
            StowageError::IntegrityError(_) => StatusCode::Internal,
            StowageError::IoError(_) => StatusCode::Internal,
            StowageError::StoreError(_) => StatusCode::Internal,
            StowageError::Canceled(_) => StatusCode::FailedPrecondition,
            StowageError::Internal(_) => StatusCode::Internal,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

impl From<StowageError> for Status {
    fn from(err: StowageError) -> Self {
        Status::from(&err)
    }
}

/// Maps a `Status` to a process exit code for `main.rs`'s dispatch.
pub fn exit_code(status: &StatusCode) -> i32 {
    match status {
        StatusCode::Ok => 0,
        StatusCode::InvalidArgument => 2,
        StatusCode::NotFound => 3,
        StatusCode::AlreadyExists => 4,
        StatusCode::FailedPrecondition => 5,
        StatusCode::Internal => 6,
        StatusCode::Unimplemented => 7,
    }
}
