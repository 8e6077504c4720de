//! Error types for the streaming layer.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for streaming operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Error variants for streaming operations.
///
/// End-of-stream is not an error: it travels on the byte-count channel as
/// [`Transfer::EndOfStream`](crate::stream::Transfer::EndOfStream).
#[derive(Debug, Error)]
pub enum StreamError {
    /// Wraps standard I/O errors that carry no path context.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file to open does not exist.
    #[error("File not found: {}", path.display())]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The file exists but could not be opened.
    #[error("Failed to open {}: {source}", path.display())]
    OpenFailed {
        /// The path that failed to open.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Reading from an open file failed.
    #[error("Failed to read from {}: {source}", path.display())]
    ReadFailed {
        /// The file being read.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// Writing to an open file failed.
    #[error("Failed to write to {}: {source}", path.display())]
    WriteFailed {
        /// The file being written.
        path: PathBuf,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An operation was attempted on a handle that is not open.
    #[error("File not open: {}", path.display())]
    NotOpen {
        /// The path of the unopened handle.
        path: PathBuf,
    },

    /// Buffer growth could not allocate the required memory.
    #[error("Capacity exhausted: cannot grow buffer to {requested} bytes")]
    CapacityExhausted {
        /// The capacity that was requested.
        requested: usize,
    },

    /// A write was attempted on a buffer wrapping read-only memory.
    #[error("Buffer is read-only")]
    ReadOnlyBuffer,

    /// A patch reference no longer points at live buffer contents.
    #[error("Stale patch reference: region {offset}..{} is no longer valid", offset + len)]
    StalePatch {
        /// Start of the referenced region.
        offset: usize,
        /// Length of the referenced region.
        len: usize,
    },

    /// A patch reference was resolved against a buffer it does not belong to.
    #[error("Patch reference belongs to a different buffer")]
    ForeignPatch,

    /// An array patch index exceeds the reserved element count.
    #[error("Patch index {index} out of range for {count} elements")]
    PatchIndexOutOfRange {
        /// The requested element index.
        index: usize,
        /// Number of reserved elements.
        count: usize,
    },

    /// Patch data is longer than the reserved region.
    #[error("Patch of {len} bytes overflows reserved region of {reserved} bytes")]
    PatchOverflow {
        /// Length of the patch data.
        len: usize,
        /// Size of the reserved region.
        reserved: usize,
    },

    /// Space can only be reserved when the cursor sits at the end of the buffer.
    #[error("Cannot reserve at position {position}: buffer size is {size}")]
    ReserveNotAtEnd {
        /// Current cursor position.
        position: usize,
        /// Current buffer size.
        size: usize,
    },

    /// A sink refused data permanently, or was written after echoing end-of-stream.
    #[error("Sink closed: {pending} bytes refused")]
    SinkClosed {
        /// Bytes that could not be delivered.
        pending: usize,
    },

    /// A filter lifecycle operation was invoked in the wrong state.
    #[error("Filter {name} misused: {reason}")]
    FilterMisuse {
        /// Filter name.
        name: String,
        /// What went wrong.
        reason: &'static str,
    },

    /// A configuration value is out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the bad value.
        reason: String,
    },

    /// A caller-supplied monitor aborted the operation.
    #[error("Operation aborted: {0}")]
    Aborted(String),
}

impl StreamError {
    /// Returns the offending path for file-related failures.
    pub fn path(&self) -> Option<&Path> {
        match self {
            StreamError::NotFound { path }
            | StreamError::OpenFailed { path, .. }
            | StreamError::ReadFailed { path, .. }
            | StreamError::WriteFailed { path, .. }
            | StreamError::NotOpen { path } => Some(path),
            _ => None,
        }
    }

    /// True if the error reports a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StreamError::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_result_alias() {
        let ok: StreamResult<i32> = Ok(42);
        assert!(ok.is_ok());

        let err: StreamResult<i32> = Err(StreamError::ReadOnlyBuffer);
        assert!(err.is_err());
    }

    #[test]
    fn test_io_error_from_std() {
        let std_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: StreamError = std_err.into();
        assert!(matches!(err, StreamError::Io(_)));
        assert!(err.path().is_none());
    }

    #[test]
    fn test_not_found_carries_path() {
        let err = StreamError::NotFound {
            path: PathBuf::from("/data/missing.bin"),
        };
        assert!(err.is_not_found());
        assert_eq!(err.path(), Some(Path::new("/data/missing.bin")));
        assert_eq!(format!("{}", err), "File not found: /data/missing.bin");
    }

    #[test]
    fn test_open_failed_message() {
        let err = StreamError::OpenFailed {
            path: PathBuf::from("/etc/shadow"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("/etc/shadow"));
        assert!(msg.contains("denied"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_capacity_exhausted() {
        let err = StreamError::CapacityExhausted { requested: 1 << 40 };
        assert!(format!("{}", err).contains("1099511627776"));
    }

    #[test]
    fn test_stale_patch_range() {
        let err = StreamError::StalePatch { offset: 8, len: 4 };
        assert_eq!(
            format!("{}", err),
            "Stale patch reference: region 8..12 is no longer valid"
        );
    }

    #[test]
    fn test_filter_misuse() {
        let err = StreamError::FilterMisuse {
            name: "identity".to_string(),
            reason: "finalize before completion",
        };
        assert_eq!(
            format!("{}", err),
            "Filter identity misused: finalize before completion"
        );
    }
}
