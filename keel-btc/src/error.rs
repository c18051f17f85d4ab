//! Error types for wallet engine operations.
//!
//! This module defines all errors that can occur during wallet creation,
//! chain derivation, address generation, and store access.

use core::fmt;

/// Errors that can occur during wallet engine operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Operation on a wallet with no derived assets.
    Uninitialized,
    /// Structural corruption in a stored record: length prefix mismatch,
    /// unknown tag byte, or a missing header record.
    Corrupt(&'static str),
    /// Malformed asset record encountered during a chain scan.
    AssetDeserialize(String),
    /// Asset requested at an index that is not present and cannot be
    /// reached by extending the chain.
    AssetUnavailable,
    /// Private-key material is encrypted and unavailable for derivation.
    KeyLocked,
    /// Sub-wallet id set does not match the persisted derivation scheme.
    SchemeMismatch,
    /// Invalid caller-supplied parameter.
    InvalidParameter(&'static str),
    /// An asset of the wrong kind was supplied to an operation.
    UnexpectedAssetType,
    /// Core primitive error.
    Core(keel::Error),
    /// Keyed store error.
    Storage(rocksdb::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "wallet has no derived assets"),
            Self::Corrupt(msg) => write!(f, "wallet record corrupt: {msg}"),
            Self::AssetDeserialize(msg) => write!(f, "asset deserialization failed: {msg}"),
            Self::AssetUnavailable => write!(f, "requested index overflows max lookup"),
            Self::KeyLocked => write!(f, "private key is locked"),
            Self::SchemeMismatch => write!(f, "sub-wallet id set mismatch"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::UnexpectedAssetType => write!(f, "unexpected asset entry type"),
            Self::Core(e) => write!(f, "core primitive error: {e}"),
            Self::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Core(e) => Some(e),
            Self::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<keel::Error> for Error {
    fn from(err: keel::Error) -> Self {
        Self::Core(err)
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Self::Storage(err)
    }
}
