//! Error types for the NTFS metadata engine.
//!
//! # Error Taxonomy
//!
//! | Class | Variant | Recoverable by caller |
//! |-------|---------|-----------------------|
//! | Format violation | `CorruptFormat` | no, surfaced as-is |
//! | Missing key/path | `NotFound` | yes |
//! | Unsupported layout or mode | `UnsupportedFormat` | no, state untouched |
//! | Exhausted bitmap/log space | `OutOfSpace` | yes |
//!
//! Decoders raise `CorruptFormat` at the smallest unit they can decode (one
//! attribute, one index page, one log page) so an isolated bad structure
//! never hides intact neighbours. The journal never downgrades a
//! `WriteOrdering` failure; the mutating operation fails instead.
//!
//! Every variant maps to exactly one POSIX errno via [`NtfsError::to_errno`]
//! for adapters that surface errors through a kernel interface.

use thiserror::Error;

/// Unified error type for all engine operations.
#[derive(Debug, Error)]
pub enum NtfsError {
    /// Signature mismatch, bounds violation, fixup mismatch, VCN-count
    /// mismatch, or any other structural inconsistency found while decoding.
    #[error("corrupt {structure}: {detail}")]
    CorruptFormat {
        structure: &'static str,
        detail: String,
    },

    /// Path component, index key, or segment absent (or stale).
    #[error("not found: {0}")]
    NotFound(String),

    /// Layout or mode this engine does not implement (unknown collation,
    /// named restart entries, undo-based rollback, ...).
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// No free segment, cluster, bitmap bit, or log space.
    #[error("out of space: {0}")]
    OutOfSpace(String),

    /// Name already present in the target directory.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Directory still has entries.
    #[error("directory not empty")]
    NotEmpty,

    /// A path component or parent reference is not a directory.
    #[error("not a directory")]
    NotDirectory,

    /// Data-stream operation attempted on a directory.
    #[error("is a directory")]
    IsDirectory,

    /// Caller-supplied argument is out of range or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A metadata page write was attempted before its redo records were
    /// durable in the log.
    #[error("write-ahead ordering violated: page needs lsn {required}, log flushed to {flushed}")]
    WriteOrdering { required: u64, flushed: u64 },

    /// The device is held exclusively by another writer.
    #[error("device busy")]
    Busy,

    /// Error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant broken inside the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl NtfsError {
    /// Build a `CorruptFormat` error for `structure`.
    #[must_use]
    pub fn corrupt(structure: &'static str, detail: impl Into<String>) -> Self {
        Self::CorruptFormat {
            structure,
            detail: detail.into(),
        }
    }

    /// Build an `Internal` error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build an `UnsupportedFormat` error.
    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Build an `OutOfSpace` error.
    #[must_use]
    pub fn out_of_space(msg: impl Into<String>) -> Self {
        Self::OutOfSpace(msg.into())
    }

    /// Whether this error reports on-disk corruption.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptFormat { .. })
    }

    /// Whether the caller can reasonably retry after freeing space or
    /// choosing another key.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::OutOfSpace(_)
                | Self::AlreadyExists(_)
                | Self::NotEmpty
                | Self::Busy
        )
    }

    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; adding a variant is a compile error until
    /// its errno is assigned.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::CorruptFormat { .. } | Self::WriteOrdering { .. } | Self::Internal(_) => {
                libc::EIO
            }
            Self::NotFound(_) => libc::ENOENT,
            Self::UnsupportedFormat(_) => libc::EOPNOTSUPP,
            Self::OutOfSpace(_) => libc::ENOSPC,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotEmpty => libc::ENOTEMPTY,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::Busy => libc::EBUSY,
        }
    }
}

/// Result alias using `NtfsError`.
pub type Result<T> = std::result::Result<T, NtfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(NtfsError, libc::c_int)> = vec![
            (NtfsError::Io(std::io::Error::other("test")), libc::EIO),
            (NtfsError::corrupt("file record", "bad sig"), libc::EIO),
            (NtfsError::NotFound("x".into()), libc::ENOENT),
            (NtfsError::unsupported("collation 0x13"), libc::EOPNOTSUPP),
            (NtfsError::out_of_space("mft"), libc::ENOSPC),
            (NtfsError::AlreadyExists("a".into()), libc::EEXIST),
            (NtfsError::NotEmpty, libc::ENOTEMPTY),
            (NtfsError::NotDirectory, libc::ENOTDIR),
            (NtfsError::IsDirectory, libc::EISDIR),
            (NtfsError::InvalidArgument("len".into()), libc::EINVAL),
            (
                NtfsError::WriteOrdering {
                    required: 10,
                    flushed: 4,
                },
                libc::EIO,
            ),
            (NtfsError::Busy, libc::EBUSY),
            (NtfsError::internal("oops"), libc::EIO),
        ];

        for (error, expected) in &cases {
            assert_eq!(error.to_errno(), *expected, "wrong errno for {error:?}");
        }
    }

    #[test]
    fn io_error_preserves_raw_os_error() {
        let err = NtfsError::Io(std::io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(err.to_errno(), libc::EPERM);
    }

    #[test]
    fn display_formatting() {
        let err = NtfsError::corrupt("index record", "fixup mismatch in stride 3");
        assert_eq!(
            err.to_string(),
            "corrupt index record: fixup mismatch in stride 3"
        );
        let ordering = NtfsError::WriteOrdering {
            required: 8192,
            flushed: 4096,
        };
        assert!(ordering.to_string().contains("lsn 8192"));
    }

    #[test]
    fn classifiers() {
        assert!(NtfsError::corrupt("x", "y").is_corruption());
        assert!(!NtfsError::NotEmpty.is_corruption());
        assert!(NtfsError::out_of_space("log").is_recoverable());
        assert!(!NtfsError::unsupported("undo").is_recoverable());
    }
}
