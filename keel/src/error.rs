//! Error types for core primitive operations.

use core::fmt;

/// Errors that can occur in the core primitives.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A byte buffer did not have the expected length.
    InvalidLength {
        /// Expected byte count.
        expected: usize,
        /// Actual byte count.
        actual: usize,
    },
    /// Invalid Base58 payload.
    InvalidEncoding,
    /// Base58Check checksum mismatch.
    InvalidChecksum,
    /// A MAC keying operation failed.
    Mac,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength { expected, actual } => {
                write!(f, "invalid length {actual}, expected {expected}")
            }
            Self::InvalidEncoding => write!(f, "invalid base58 encoding"),
            Self::InvalidChecksum => write!(f, "base58check checksum mismatch"),
            Self::Mac => write!(f, "MAC keying failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
