//! Common types and wire-format constants for the wallet engine.

use core::fmt;

use crate::{Error, Result};

/// Number of unused addresses pre-derived ahead of the top used index.
pub const DERIVATION_LOOKUP: u32 = 100;

// Store header keys, 32-bit little-endian. Part of the wire format;
// never renumber.
pub(crate) const WALLETTYPE_KEY: u32 = 0x0000_0001;
pub(crate) const PARENTID_KEY: u32 = 0x0000_0002;
pub(crate) const WALLETID_KEY: u32 = 0x0000_0003;
pub(crate) const DERIVATIONSCHEME_KEY: u32 = 0x0000_0004;
pub(crate) const ADDRESSENTRYTYPE_KEY: u32 = 0x0000_0005;
pub(crate) const TOPUSEDINDEX_KEY: u32 = 0x0000_0006;
pub(crate) const ROOTASSET_KEY: u32 = 0x0000_0007;

// Single-byte asset key prefix, distinct from the low byte of every
// header key above.
pub(crate) const ASSETENTRY_PREFIX: u8 = 0xaa;

// Record tag bytes.
pub(crate) const PUBKEY_UNCOMPRESSED_BYTE: u8 = 0x80;
pub(crate) const PUBKEY_COMPRESSED_BYTE: u8 = 0x81;
pub(crate) const PRIVKEY_BYTE: u8 = 0x82;
pub(crate) const CYPHER_BYTE: u8 = 0x90;

pub(crate) const ASSETENTRY_SINGLE: u8 = 0x01;

pub(crate) const DERIVATIONSCHEME_LEGACY: u8 = 0xa0;
pub(crate) const DERIVATIONSCHEME_MULTISIG: u8 = 0xa1;

pub(crate) const WALLETTYPE_SINGLE: u8 = 0x01;
pub(crate) const WALLETTYPE_MULTISIG: u8 = 0x02;

/// 20-byte wallet identifier, derived from the root public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalletId([u8; 20]);

impl WalletId {
    /// Wrap a raw 20-byte identifier.
    #[must_use]
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Parse an identifier from a byte slice.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; 20] = bytes
            .try_into()
            .map_err(|_| Error::Corrupt("wallet id must be 20 bytes"))?;
        Ok(Self(raw))
    }

    /// Raw identifier bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletId({})", hex::encode(self.0))
    }
}

/// Address schemes an asset can be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressType {
    /// Pay to Public Key Hash (Legacy) - Base58Check of the uncompressed key hash
    #[default]
    P2PKH,
    /// Pay to Witness Public Key Hash - raw compressed key hash, no envelope yet
    P2WPKH,
    /// Pay to Script Hash - Base58Check of a script (or compressed key) hash
    P2SH,
    /// Pay to Witness Script Hash - prefixed SHA-256, no envelope yet
    P2WSH,
}

impl AddressType {
    /// Stored representation of this address type.
    #[must_use]
    pub(crate) const fn as_byte(self) -> u8 {
        match self {
            Self::P2PKH => 0x01,
            Self::P2WPKH => 0x02,
            Self::P2SH => 0x03,
            Self::P2WSH => 0x04,
        }
    }

    /// Decode an address type from its stored representation.
    pub(crate) fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::P2PKH),
            0x02 => Ok(Self::P2WPKH),
            0x03 => Ok(Self::P2SH),
            0x04 => Ok(Self::P2WSH),
            _ => Err(Error::Corrupt("unknown address entry type")),
        }
    }

    /// Whether this type pays to a script hash (the only types a multisig
    /// wallet can serve).
    #[must_use]
    pub const fn is_script_hash(self) -> bool {
        matches!(self, Self::P2SH | Self::P2WSH)
    }

    /// Get address type name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::P2PKH => "P2PKH",
            Self::P2WPKH => "P2WPKH",
            Self::P2SH => "P2SH",
            Self::P2WSH => "P2WSH",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
