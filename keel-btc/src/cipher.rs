//! Cipher descriptors for encrypted private keys.
//!
//! The engine never encrypts or decrypts key material itself; it persists
//! a descriptor (scheme tag plus IV) next to each private key so the
//! encryption primitive can be re-bound after a reload.

use crate::codec::{BinaryReader, BinaryWriter};
use crate::types::CYPHER_BYTE;
use crate::{Error, Result};

/// Supported symmetric encryption schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// AES with a 16-byte IV.
    Aes,
}

impl CipherKind {
    const fn as_byte(self) -> u8 {
        match self {
            Self::Aes => 0x01,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Aes),
            _ => Err(Error::Corrupt("unexpected cipher type")),
        }
    }
}

/// Non-secret companion blob recording how a private key is encrypted.
///
/// A descriptor with an empty IV marks plaintext key material: the
/// encryption primitive generates an IV on first use. A non-empty IV
/// marks the companion key bytes as ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cipher {
    kind: CipherKind,
    iv: Vec<u8>,
}

impl Cipher {
    /// A fresh AES descriptor with no IV.
    #[must_use]
    pub fn aes() -> Self {
        Self {
            kind: CipherKind::Aes,
            iv: Vec::new(),
        }
    }

    /// Rebuild a descriptor from its stored parts.
    #[must_use]
    pub fn with_iv(kind: CipherKind, iv: Vec<u8>) -> Self {
        Self { kind, iv }
    }

    /// The encryption scheme.
    #[must_use]
    pub const fn kind(&self) -> CipherKind {
        self.kind
    }

    /// The stored IV; empty for plaintext material.
    #[must_use]
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Whether the companion key bytes are ciphertext.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.iv.is_empty()
    }

    /// A same-scheme descriptor with no IV, for newly derived entries.
    #[must_use]
    pub fn fresh_copy(&self) -> Self {
        Self {
            kind: self.kind,
            iv: Vec::new(),
        }
    }

    /// Serialize as `CYPHER_BYTE || type || var_int(iv_len) || iv`.
    pub(crate) fn serialize(&self, writer: &mut BinaryWriter) {
        writer.put_u8(CYPHER_BYTE);
        writer.put_u8(self.kind.as_byte());
        writer.put_var_int(self.iv.len() as u64);
        writer.put_bytes(&self.iv);
    }

    /// Decode the descriptor body; the caller has already consumed the
    /// `CYPHER_BYTE` tag.
    pub(crate) fn deserialize(reader: &mut BinaryReader<'_>) -> Result<Self> {
        let kind = CipherKind::from_byte(reader.get_u8()?)?;
        let iv_len = reader.get_var_int()? as usize;
        let iv = reader.get_bytes(iv_len)?.to_vec();
        Ok(Self { kind, iv })
    }
}
