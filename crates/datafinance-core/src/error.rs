//! Error types shared by the download and extraction pipelines

use std::io;
use std::path::PathBuf;

/// Message fragments that mark an otherwise-unclassified error as retryable.
const RETRYABLE_KEYWORDS: &[&str] = &[
    "timeout",
    "connection refused",
    "connection reset",
    "connection aborted",
    "temporarily",
    "unavailable",
    "try again",
];

fn message_is_retryable(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Error from fetching a single remote file (download + local placement).
#[derive(Debug)]
pub enum FetchError {
    /// HTTP-level failure with optional status code
    Http {
        status: Option<u16>,
        message: String,
    },
    /// Per-read or total deadline exceeded
    Timeout { message: String },
    /// Size or digest mismatch after a completed body
    Integrity { message: String },
    /// Local I/O failure
    Io(io::Error),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http {
                status: Some(s),
                message,
            } => write!(f, "HTTP {s}: {message}"),
            Self::Http {
                status: None,
                message,
            } => write!(f, "HTTP error: {message}"),
            Self::Timeout { message } => write!(f, "timeout: {message}"),
            Self::Integrity { message } => write!(f, "integrity mismatch: {message}"),
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout {
                message: e.to_string(),
            };
        }
        Self::Http {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }

    /// Whether another attempt may succeed.
    ///
    /// Network, timeout, and integrity failures retry; client errors
    /// (except 408/429), local permission, and disk-space failures never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http {
                status: Some(code), ..
            } if (400..500).contains(code) => matches!(*code, 408 | 429),
            Self::Http { .. } | Self::Timeout { .. } | Self::Integrity { .. } => true,
            Self::Io(e) => match e.kind() {
                io::ErrorKind::StorageFull | io::ErrorKind::PermissionDenied => false,
                io::ErrorKind::TimedOut
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted => true,
                _ => message_is_retryable(&e.to_string()),
            },
        }
    }

    /// Terminal for the whole batch, not just this file.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::PermissionDenied
            )
        )
    }
}

impl From<io::Error> for FetchError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Error from ZIP reading, CSV conversion, or Parquet writing.
#[derive(Debug)]
pub enum ExtractError {
    /// Archive cannot be opened or enumerated
    CorruptedZip { path: PathBuf, message: String },
    /// Aggregate failure after rollback, or a malformed archive layout
    Extraction { path: PathBuf, message: String },
    /// No space left on the destination device
    DiskFull { path: PathBuf },
    /// Destination not writable
    Permission { path: PathBuf },
    /// Other local I/O failure
    Io(io::Error),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CorruptedZip { path, message } => {
                write!(f, "corrupted ZIP '{}': {message}", path.display())
            }
            Self::Extraction { path, message } => {
                write!(f, "extraction failed for '{}': {message}", path.display())
            }
            Self::DiskFull { path } => {
                write!(f, "insufficient disk space for '{}'", path.display())
            }
            Self::Permission { path } => {
                write!(f, "no write permission for '{}'", path.display())
            }
            Self::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {}

impl ExtractError {
    /// Wrap an I/O error, promoting disk-full and permission kinds so callers
    /// can apply batch-fatal handling.
    pub fn from_io(e: io::Error, path: &std::path::Path) -> Self {
        match e.kind() {
            io::ErrorKind::StorageFull => Self::DiskFull {
                path: path.to_path_buf(),
            },
            io::ErrorKind::PermissionDenied => Self::Permission {
                path: path.to_path_buf(),
            },
            _ => Self::Io(e),
        }
    }

    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, Self::DiskFull { .. } | Self::Permission { .. })
    }
}

impl From<io::Error> for ExtractError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    fn http_err(status: u16) -> FetchError {
        FetchError::Http {
            status: Some(status),
            message: "test".to_string(),
        }
    }

    #[test]
    fn http_500_retryable() {
        assert!(http_err(500).is_retryable());
    }

    #[test]
    fn http_503_retryable() {
        assert!(http_err(503).is_retryable());
    }

    #[test]
    fn http_404_not_retryable() {
        assert!(!http_err(404).is_retryable());
        assert!(!http_err(403).is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        assert!(http_err(429).is_retryable());
        assert!(http_err(408).is_retryable());
    }

    #[test]
    fn timeout_retryable() {
        let err = FetchError::Timeout {
            message: "read stalled".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn integrity_retryable() {
        let err = FetchError::Integrity {
            message: "md5 mismatch".to_string(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn io_storage_full_not_retryable() {
        let err = FetchError::Io(io::Error::new(ErrorKind::StorageFull, "disk full"));
        assert!(!err.is_retryable());
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn io_permission_denied_not_retryable() {
        let err = FetchError::Io(io::Error::new(ErrorKind::PermissionDenied, "denied"));
        assert!(!err.is_retryable());
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn io_connection_reset_retryable() {
        let err = FetchError::Io(io::Error::new(ErrorKind::ConnectionReset, "reset"));
        assert!(err.is_retryable());
        assert!(!err.is_batch_fatal());
    }

    #[test]
    fn io_keyword_match_retryable() {
        let err = FetchError::Io(io::Error::other("service temporarily overloaded"));
        assert!(err.is_retryable());
    }

    #[test]
    fn io_keyword_match_case_insensitive() {
        let err = FetchError::Io(io::Error::other("Connection Refused by host"));
        assert!(err.is_retryable());
    }

    #[test]
    fn io_unclassified_not_retryable() {
        let err = FetchError::Io(io::Error::other("segment fault in handler"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_http_with_status() {
        assert_eq!(format!("{}", http_err(404)), "HTTP 404: test");
    }

    #[test]
    fn display_http_without_status() {
        let err = FetchError::Http {
            status: None,
            message: "dns failure".to_string(),
        };
        assert_eq!(format!("{err}"), "HTTP error: dns failure");
    }

    #[test]
    fn extract_from_io_promotes_storage_full() {
        let err = ExtractError::from_io(
            io::Error::new(ErrorKind::StorageFull, "full"),
            std::path::Path::new("/out"),
        );
        assert!(matches!(err, ExtractError::DiskFull { .. }));
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn extract_from_io_promotes_permission() {
        let err = ExtractError::from_io(
            io::Error::new(ErrorKind::PermissionDenied, "denied"),
            std::path::Path::new("/out"),
        );
        assert!(matches!(err, ExtractError::Permission { .. }));
        assert!(err.is_batch_fatal());
    }

    #[test]
    fn extract_plain_io_not_fatal() {
        let err = ExtractError::from_io(io::Error::other("boom"), std::path::Path::new("/out"));
        assert!(!err.is_batch_fatal());
    }
}
