//! Typed errors for the deployment engine.

use thiserror::Error;

/// The kind of failure, independent of its message. Callers that need to
/// branch on failure mode (the reconciler's per-mod accumulation, the CLI's
/// exit-code mapping) match on this rather than downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AuthRequired,
    Network,
    CacheCorrupt,
    CrossDeviceLink,
    PathEscape,
    Conflict,
    HookFailed,
    Cancelled,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication required: {0}")]
    AuthRequired(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("cache entry corrupt: {0}")]
    CacheCorrupt(String),

    #[error("cannot hard link across filesystems: {0}")]
    CrossDeviceLink(String),

    #[error("archive entry escapes extraction root: {0}")]
    PathEscape(String),

    #[error("ownership conflict: {0}")]
    Conflict(String),

    #[error("hook failed: {0}")]
    HookFailed(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AuthRequired(_) => ErrorKind::AuthRequired,
            Error::Network(_) => ErrorKind::Network,
            Error::CacheCorrupt(_) => ErrorKind::CacheCorrupt,
            Error::CrossDeviceLink(_) => ErrorKind::CrossDeviceLink,
            Error::PathEscape(_) => ErrorKind::PathEscape,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::HookFailed(_) => ErrorKind::HookFailed,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Io(std::io::Error::other(e.to_string()))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
