//! Error taxonomy for mirroring and cache operations.
//!
//! Three families cover every failure the subsystem can observe:
//!
//! - [`ResolutionError`]: an asset reference that cannot become a fetchable URL
//! - [`FetchError`]: a single HTTP GET that did not produce a body
//! - [`FilesystemError`]: a cache directory or file operation that failed
//!
//! Individual asset failures are captured into the mirror result and never raised.
//! Failures on the top-level document, and every Cache Store failure, propagate.

use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A reference found in a document that cannot be turned into an absolute URL.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionError {
    /// Inline `data:` URIs carry their own content and are never fetched.
    #[error("data URI is not a fetchable reference")]
    DataUri,

    #[error("unsupported scheme '{scheme}' in reference '{reference}'")]
    UnsupportedScheme { reference: String, scheme: String },

    #[error("cannot parse reference '{reference}': {message}")]
    Malformed { reference: String, message: String },
}

/// Failure of a single HTTP GET.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("response exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus(status.as_u16())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

/// A filesystem operation on the cache tree failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilesystemError {
    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("disk full while writing {}", path.display())]
    DiskFull { path: PathBuf },

    #[error("path too long: {}", path.display())]
    PathTooLong { path: PathBuf },

    #[error("filesystem error at {}: {message}", path.display())]
    Other { path: PathBuf, message: String },
}

#[cfg(target_os = "linux")]
const ENAMETOOLONG: i32 = 36;
#[cfg(all(unix, not(target_os = "linux")))]
const ENAMETOOLONG: i32 = 63;
#[cfg(unix)]
const ENOSPC: i32 = 28;

#[cfg(windows)]
const ERROR_DISK_FULL: i32 = 112;
#[cfg(windows)]
const ERROR_FILENAME_EXCED_RANGE: i32 = 206;

impl FilesystemError {
    /// Classifies an I/O error raised while operating on `path`.
    pub fn from_io(path: impl AsRef<Path>, err: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();

        if err.kind() == io::ErrorKind::PermissionDenied {
            return FilesystemError::PermissionDenied { path };
        }

        match err.raw_os_error() {
            #[cfg(unix)]
            Some(ENOSPC) => FilesystemError::DiskFull { path },
            #[cfg(unix)]
            Some(ENAMETOOLONG) => FilesystemError::PathTooLong { path },
            #[cfg(windows)]
            Some(ERROR_DISK_FULL) => FilesystemError::DiskFull { path },
            #[cfg(windows)]
            Some(ERROR_FILENAME_EXCED_RANGE) => FilesystemError::PathTooLong { path },
            _ => FilesystemError::Other {
                path,
                message: err.to_string(),
            },
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            FilesystemError::PermissionDenied { path }
            | FilesystemError::DiskFull { path }
            | FilesystemError::PathTooLong { path }
            | FilesystemError::Other { path, .. } => path,
        }
    }
}

/// Why a whole mirror call did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum MirrorError {
    #[error("document fetch failed: {0}")]
    Fetch(FetchError),

    #[error("cache write failed: {0}")]
    Filesystem(FilesystemError),

    #[error("mirror cancelled")]
    Cancelled,
}

/// Crate-level error for fallible library calls outside the mirror loop.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Filesystem(#[from] FilesystemError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid mirror request: {0}")]
    InvalidRequest(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
