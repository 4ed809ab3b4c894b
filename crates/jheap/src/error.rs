//! Error types for heap dump analysis.
//!
//! The taxonomy follows the failure classes of the engine:
//!
//! - Format errors (bad magic, truncated header, unknown record tag) abort
//!   the whole build.
//! - Identity errors (a lookup for an id the index has never seen) are fatal
//!   by default but degrade to a stub instance when
//!   [`HeapConfig::tolerate_missing_ids`](crate::HeapConfig) is enabled.
//! - Resource errors (scratch file creation, I/O) are fatal and never
//!   retried.
//! - Bounds errors (reads past the file or the sanity ceiling) are fatal.

use thiserror::Error;

/// Main error type for all heap dump operations.
#[derive(Debug, Error)]
pub enum HeapError {
    /// The file does not start with a recognized HPROF magic string,
    /// or is too small to contain the minimal header.
    #[error("invalid heap dump format: {0}")]
    InvalidFormat(String),

    /// An unrecognized record tag inside a heap dump segment.
    ///
    /// Heap sub-records carry no length field, so an unknown tag makes the
    /// rest of the segment undecodable. The format is not forward
    /// compatible by design.
    #[error("unknown heap record tag {tag:#04x} at offset {offset:#x}")]
    UnknownTag { tag: u8, offset: u64 },

    /// A field or array element type code outside the defined basic types.
    #[error("invalid basic type {0}")]
    InvalidType(u8),

    /// A reference or lookup for an object identity that is not present in
    /// the identity index.
    #[error("illegal instance id {0:#x}")]
    IllegalInstanceId(u64),

    /// The requested heap dump segment index does not exist in the file.
    #[error("invalid heap dump segment {0}")]
    InvalidSegment(usize),

    /// A read past the declared end of file or beyond the configured
    /// sanity ceiling.
    #[error("read of {len} bytes at offset {offset:#x} is out of bounds (limit {limit:#x})")]
    OutOfBounds { offset: u64, len: usize, limit: u64 },

    /// Backing store or dump file I/O failure. Never retried.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value detected before the build starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invariant violation inside a graph algorithm. Indicates a bug, not
    /// bad input; nothing in the algorithms masks an unexpected zero.
    #[error("internal error: {0}")]
    Internal(String),
}

impl HeapError {
    /// True for errors caused by the dump contents rather than the
    /// environment or a bug.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            HeapError::InvalidFormat(_)
                | HeapError::UnknownTag { .. }
                | HeapError::InvalidType(_)
                | HeapError::InvalidSegment(_)
        )
    }

    /// True when the error indicates a bug in this crate.
    pub fn is_bug(&self) -> bool {
        matches!(self, HeapError::Internal(_))
    }
}

/// Result type alias for heap dump operations.
pub type Result<T> = std::result::Result<T, HeapError>;
