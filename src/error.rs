//! Structured error types for client operations.

use serde::Serialize;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Startup/configuration
    NotConfigured,

    // Client-side guards
    PermissionDenied,
    NotSignedIn,
    ProtectedDepartment,

    // Lookup failures
    ProfileNotFound,
    TaskNotFound,
    WorkspaceNotFound,

    // Boundary failures
    AuthFailed,
    BackendError,
    StorageError,
    LocalStoreError,

    // One-shot recovery
    SetupFailed,
}

/// Error type shared by all client and backend operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backend credentials are missing or are placeholder values. Detected at
    /// startup; no app logic runs past this.
    #[error("backend is not configured: {0}")]
    NotConfigured(String),

    /// A client-side role guard rejected the operation before any network call.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// An operation that needs an authenticated user ran without one.
    #[error("not signed in")]
    NotSignedIn,

    /// The Administration department cannot be deleted.
    #[error("the {0} department cannot be deleted")]
    ProtectedDepartment(String),

    #[error("no profile found for identity {0}")]
    ProfileNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// Sign-up or sign-in was rejected by the identity service.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// A table read or write against the hosted backend failed.
    #[error("backend request failed: {0}")]
    Backend(String),

    /// An object-storage upload or URL resolution failed.
    #[error("storage operation failed: {0}")]
    Storage(String),

    /// The per-device key-value store could not be read or written.
    #[error("local store error: {0}")]
    LocalStore(String),

    /// The post-signup setup-completion path failed; the user is signed out.
    #[error("workspace setup could not be completed: {0}")]
    SetupFailed(String),
}

impl Error {
    /// Stable code for the error category.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NotConfigured(_) => ErrorCode::NotConfigured,
            Error::PermissionDenied(_) => ErrorCode::PermissionDenied,
            Error::NotSignedIn => ErrorCode::NotSignedIn,
            Error::ProtectedDepartment(_) => ErrorCode::ProtectedDepartment,
            Error::ProfileNotFound(_) => ErrorCode::ProfileNotFound,
            Error::TaskNotFound(_) => ErrorCode::TaskNotFound,
            Error::WorkspaceNotFound(_) => ErrorCode::WorkspaceNotFound,
            Error::AuthFailed(_) => ErrorCode::AuthFailed,
            Error::Backend(_) => ErrorCode::BackendError,
            Error::Storage(_) => ErrorCode::StorageError,
            Error::LocalStore(_) => ErrorCode::LocalStoreError,
            Error::SetupFailed(_) => ErrorCode::SetupFailed,
        }
    }

    // Convenience constructors

    pub fn permission(message: impl Into<String>) -> Self {
        Error::PermissionDenied(message.into())
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Error::Backend(err.to_string())
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Error::Storage(err.to_string())
    }

    pub fn auth(err: impl std::fmt::Display) -> Self {
        Error::AuthFailed(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Backend(err.to_string())
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
