//! Error types for the fast-LZMA2 codec.
//!
//! This module provides the [`Error`] enum which represents all possible
//! failure modes when compressing or decompressing fast-LZMA2 frames, along
//! with a convenient [`Result<T>`] type alias and the stable numeric
//! [`ErrorCode`] taxonomy exported for callers that track codes rather than
//! values.
//!
//! # Error Handling
//!
//! All fallible operations in this crate return `Result<T, Error>`. You can
//! handle errors using pattern matching or the `?` operator:
//!
//! ```rust,no_run
//! use flzma2::{DecompressContext, Error, Result};
//!
//! fn restore(frame: &[u8]) -> Result<Vec<u8>> {
//!     let mut dctx = DecompressContext::new();
//!     match dctx.decompress(frame) {
//!         Ok(data) => Ok(data),
//!         Err(Error::CorruptionDetected) => {
//!             eprintln!("frame is damaged");
//!             Err(Error::CorruptionDetected)
//!         }
//!         Err(Error::ChecksumWrong) => {
//!             eprintln!("payload restored but the XXH64 trailer does not match");
//!             Err(Error::ChecksumWrong)
//!         }
//!         Err(e) => Err(e),
//!     }
//! }
//! ```

use thiserror::Error;

/// A convenient `Result` alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the codec.
///
/// The variants map one-to-one onto the numeric [`ErrorCode`] taxonomy; the
/// display strings are the same fixed strings returned by [`error_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// Unspecified internal failure.
    #[error("Error (generic)")]
    Generic,

    /// An operation was attempted on a context that was never initialized.
    #[error("Context should be init first")]
    InitMissing,

    /// An internal allocation failed.
    #[error("Allocation error: not enough memory")]
    MemoryAllocation,

    /// A parameter is not supported by this build.
    #[error("Unsupported parameter")]
    ParameterUnsupported,

    /// A parameter lies outside its accepted range.
    #[error("Parameter is out of bound")]
    ParameterOutOfBound,

    /// The literal context/position bit constraint `lc + lp <= 4` was violated.
    #[error("Parameters lc+lp > 4 are not supported")]
    LclpMaxExceeded,

    /// The operation is not permitted in the context's current stage,
    /// including any operation after an unrecovered error.
    #[error("Operation not authorized at current processing stage")]
    StageWrong,

    /// The compressed input ended before the frame was complete.
    #[error("Src size is incorrect")]
    SrcSizeWrong,

    /// The caller-supplied output buffer cannot hold the result.
    #[error("Destination buffer is too small")]
    DstSizeTooSmall,

    /// The compressed data is malformed.
    #[error("Corrupted block detected")]
    CorruptionDetected,

    /// The payload decoded fully but its XXH64 trailer does not match.
    #[error("Restored data doesn't match checksum")]
    ChecksumWrong,

    /// The operation was canceled by the caller.
    #[error("Processing was canceled")]
    Canceled,

    /// Streaming progress halted because a buffer is full or empty.
    #[error("Streaming progress halted due to buffer(s) full/empty")]
    Buffer,
}

impl Error {
    /// Returns the stable numeric code for this error.
    pub fn code(self) -> ErrorCode {
        match self {
            Error::Generic => ErrorCode::Generic,
            Error::InitMissing => ErrorCode::InitMissing,
            Error::MemoryAllocation => ErrorCode::MemoryAllocation,
            Error::ParameterUnsupported => ErrorCode::ParameterUnsupported,
            Error::ParameterOutOfBound => ErrorCode::ParameterOutOfBound,
            Error::LclpMaxExceeded => ErrorCode::LclpMaxExceeded,
            Error::StageWrong => ErrorCode::StageWrong,
            Error::SrcSizeWrong => ErrorCode::SrcSizeWrong,
            Error::DstSizeTooSmall => ErrorCode::DstSizeTooSmall,
            Error::CorruptionDetected => ErrorCode::CorruptionDetected,
            Error::ChecksumWrong => ErrorCode::ChecksumWrong,
            Error::Canceled => ErrorCode::Canceled,
            Error::Buffer => ErrorCode::Buffer,
        }
    }
}

/// Stable numeric error taxonomy.
///
/// Code 0 means "no error"; [`ErrorCode::MaxCode`] is a fencepost, not a
/// real error. The numbering is part of the public API and never reorders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    /// No error detected.
    NoError = 0,
    /// Unspecified failure.
    Generic = 1,
    /// Context not initialized.
    InitMissing = 2,
    /// Allocation failure.
    MemoryAllocation = 3,
    /// Unsupported parameter.
    ParameterUnsupported = 4,
    /// Parameter out of range.
    ParameterOutOfBound = 5,
    /// `lc + lp > 4`.
    LclpMaxExceeded = 6,
    /// Wrong processing stage.
    StageWrong = 7,
    /// Truncated or oversized source.
    SrcSizeWrong = 8,
    /// Destination buffer too small.
    DstSizeTooSmall = 9,
    /// Malformed compressed data.
    CorruptionDetected = 10,
    /// XXH64 trailer mismatch.
    ChecksumWrong = 11,
    /// Canceled by the caller.
    Canceled = 12,
    /// Buffer full/empty stall.
    Buffer = 13,
    /// Fencepost; one past the largest valid code.
    MaxCode = 14,
}

impl ErrorCode {
    /// Returns the fixed descriptive string for this code.
    pub fn name(self) -> &'static str {
        error_name(self as u32)
    }
}

/// Returns the fixed descriptive string for a numeric error code.
///
/// Codes outside the taxonomy return a fixed sentinel string rather than
/// panicking, so the function is total:
///
/// ```rust
/// use flzma2::error_name;
///
/// assert_eq!(error_name(0), "No error detected");
/// assert_eq!(error_name(1), "Error (generic)");
/// assert_eq!(error_name(499), "Unspecified error code");
/// ```
pub fn error_name(code: u32) -> &'static str {
    match code {
        0 => "No error detected",
        1 => "Error (generic)",
        2 => "Context should be init first",
        3 => "Allocation error: not enough memory",
        4 => "Unsupported parameter",
        5 => "Parameter is out of bound",
        6 => "Parameters lc+lp > 4 are not supported",
        7 => "Operation not authorized at current processing stage",
        8 => "Src size is incorrect",
        9 => "Destination buffer is too small",
        10 => "Corrupted block detected",
        11 => "Restored data doesn't match checksum",
        12 => "Processing was canceled",
        13 => "Streaming progress halted due to buffer(s) full/empty",
        _ => "Unspecified error code",
    }
}
