//! Assets: the persisted unit of derived key material.
//!
//! A single asset holds one public-key pair and, when known, its private
//! key with the cipher descriptor it is (or will be) encrypted under.
//! Multisig assets are composed on demand from the single assets of each
//! sub-wallet at the same index and are never persisted directly.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use zeroize::Zeroizing;

use keel::hash::{double_sha256, hash160, sha256};

use crate::chain;
use crate::cipher::Cipher;
use crate::codec::{frame, unframe, BinaryReader, BinaryWriter};
use crate::types::{
    WalletId, ASSETENTRY_PREFIX, ASSETENTRY_SINGLE, CYPHER_BYTE, PRIVKEY_BYTE,
    PUBKEY_COMPRESSED_BYTE, PUBKEY_UNCOMPRESSED_BYTE,
};
use crate::{Error, Result};

/// Chain index of the root asset.
pub const ROOT_ASSET_INDEX: i32 = -1;

const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_CHECKMULTISIG: u8 = 0xae;

/// A public key in both SEC1 encodings.
///
/// The two encodings are validated to describe the same curve point when
/// the pair is rebuilt from stored records.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyPair {
    uncompressed: [u8; 65],
    compressed: [u8; 33],
}

impl PublicKeyPair {
    /// Build a pair from an uncompressed key, deriving the compressed form.
    pub fn from_uncompressed(uncompressed: [u8; 65]) -> Result<Self> {
        let compressed = chain::compress_public_key(&uncompressed)?;
        Ok(Self {
            uncompressed,
            compressed,
        })
    }

    /// Rebuild a pair from both stored encodings, validating consistency.
    pub fn from_parts(uncompressed: [u8; 65], compressed: [u8; 33]) -> Result<Self> {
        if chain::compress_public_key(&uncompressed)? != compressed {
            return Err(Error::Corrupt("public key encodings disagree"));
        }
        Ok(Self {
            uncompressed,
            compressed,
        })
    }

    /// The 65-byte uncompressed encoding.
    #[must_use]
    pub const fn uncompressed(&self) -> &[u8; 65] {
        &self.uncompressed
    }

    /// The 33-byte compressed encoding.
    #[must_use]
    pub const fn compressed(&self) -> &[u8; 33] {
        &self.compressed
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.put_var_int(self.uncompressed.len() as u64 + 1);
        writer.put_u8(PUBKEY_UNCOMPRESSED_BYTE);
        writer.put_bytes(&self.uncompressed);

        writer.put_var_int(self.compressed.len() as u64 + 1);
        writer.put_u8(PUBKEY_COMPRESSED_BYTE);
        writer.put_bytes(&self.compressed);
    }
}

impl fmt::Debug for PublicKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyPair({})", hex::encode(self.compressed))
    }
}

/// Private-key bytes (plaintext or ciphertext) with their cipher descriptor.
pub struct StoredPrivateKey {
    key: Zeroizing<Vec<u8>>,
    cipher: Cipher,
}

impl StoredPrivateKey {
    /// Bundle key bytes with the descriptor recording their encryption.
    #[must_use]
    pub fn new(key: Zeroizing<Vec<u8>>, cipher: Cipher) -> Self {
        Self { key, cipher }
    }

    /// The raw stored bytes; ciphertext when the descriptor is locked.
    #[must_use]
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// The cipher descriptor.
    #[must_use]
    pub const fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Whether the key bytes are ciphertext.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.cipher.is_locked()
    }

    /// Plaintext key bytes, or [`Error::KeyLocked`] if encrypted.
    pub fn plaintext(&self) -> Result<&[u8]> {
        if self.is_locked() {
            return Err(Error::KeyLocked);
        }
        Ok(&self.key)
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.put_var_int(self.key.len() as u64 + 1);
        writer.put_u8(PRIVKEY_BYTE);
        writer.put_bytes(&self.key);

        let mut cipher_writer = BinaryWriter::new();
        self.cipher.serialize(&mut cipher_writer);
        writer.put_var_int(cipher_writer.len() as u64);
        writer.put_bytes(cipher_writer.as_bytes());
    }
}

impl fmt::Debug for StoredPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredPrivateKey")
            .field("key", &"[REDACTED]")
            .field("cipher", &self.cipher)
            .finish()
    }
}

/// One keypair at a chain index, with lazily memoized hashes.
#[derive(Debug)]
pub struct SingleAsset {
    index: i32,
    pubkey: PublicKeyPair,
    privkey: Option<StoredPrivateKey>,
    h160_uncompressed: OnceLock<[u8; 20]>,
    h160_compressed: OnceLock<[u8; 20]>,
    h256_compressed: OnceLock<[u8; 32]>,
}

impl SingleAsset {
    /// Create an asset at the given chain index.
    #[must_use]
    pub fn new(index: i32, pubkey: PublicKeyPair, privkey: Option<StoredPrivateKey>) -> Self {
        Self {
            index,
            pubkey,
            privkey,
            h160_uncompressed: OnceLock::new(),
            h160_compressed: OnceLock::new(),
            h256_compressed: OnceLock::new(),
        }
    }

    /// Chain index (`-1` for the root).
    #[must_use]
    pub const fn index(&self) -> i32 {
        self.index
    }

    /// The public-key pair.
    #[must_use]
    pub const fn pubkey(&self) -> &PublicKeyPair {
        &self.pubkey
    }

    /// The private key, when available.
    #[must_use]
    pub const fn privkey(&self) -> Option<&StoredPrivateKey> {
        self.privkey.as_ref()
    }

    /// HASH160 of the uncompressed public key.
    pub fn hash160_uncompressed(&self) -> &[u8; 20] {
        self.h160_uncompressed
            .get_or_init(|| hash160(&self.pubkey.uncompressed))
    }

    /// HASH160 of the compressed public key.
    pub fn hash160_compressed(&self) -> &[u8; 20] {
        self.h160_compressed
            .get_or_init(|| hash160(&self.pubkey.compressed))
    }

    /// Double SHA-256 of the compressed public key.
    pub fn hash256_compressed(&self) -> &[u8; 32] {
        self.h256_compressed
            .get_or_init(|| double_sha256(&self.pubkey.compressed))
    }

    /// Store key for this asset: `ASSETENTRY_PREFIX || int32(index)`.
    #[must_use]
    pub fn db_key(&self) -> Vec<u8> {
        asset_db_key(self.index)
    }

    /// Serialize to the framed on-disk value.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        writer.put_u8(ASSETENTRY_SINGLE);
        self.pubkey.serialize(&mut writer);
        if let Some(privkey) = &self.privkey {
            privkey.serialize(&mut writer);
        }
        frame(writer.as_bytes())
    }

    /// Decode the unframed value payload of a single-asset record.
    fn deserialize_payload(index: i32, payload: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(payload);

        let mut pub_uncompressed: Option<[u8; 65]> = None;
        let mut pub_compressed: Option<[u8; 33]> = None;
        let mut privkey_bytes: Option<Zeroizing<Vec<u8>>> = None;
        let mut cipher: Option<Cipher> = None;

        while !reader.is_exhausted() {
            let record_len = reader
                .get_var_int()
                .map_err(|_| deser_err("truncated asset record"))? as usize;
            let record = reader
                .get_bytes(record_len)
                .map_err(|_| deser_err("truncated asset record"))?;

            let mut record_reader = BinaryReader::new(record);
            let tag = record_reader
                .get_u8()
                .map_err(|_| deser_err("empty asset record"))?;

            match tag {
                PUBKEY_UNCOMPRESSED_BYTE => {
                    if pub_uncompressed.is_some() {
                        return Err(deser_err("duplicate uncompressed public key"));
                    }
                    let bytes: [u8; 65] = record_reader
                        .get_remaining()
                        .try_into()
                        .map_err(|_| deser_err("uncompressed public key must be 65 bytes"))?;
                    pub_uncompressed = Some(bytes);
                }
                PUBKEY_COMPRESSED_BYTE => {
                    if pub_compressed.is_some() {
                        return Err(deser_err("duplicate compressed public key"));
                    }
                    let bytes: [u8; 33] = record_reader
                        .get_remaining()
                        .try_into()
                        .map_err(|_| deser_err("compressed public key must be 33 bytes"))?;
                    pub_compressed = Some(bytes);
                }
                PRIVKEY_BYTE => {
                    if privkey_bytes.is_some() {
                        return Err(deser_err("duplicate private key"));
                    }
                    privkey_bytes = Some(Zeroizing::new(record_reader.get_remaining().to_vec()));
                }
                CYPHER_BYTE => {
                    if cipher.is_some() {
                        return Err(deser_err("duplicate cipher descriptor"));
                    }
                    cipher = Some(
                        Cipher::deserialize(&mut record_reader)
                            .map_err(|e| deser_err_from(&e))?,
                    );
                }
                _ => return Err(deser_err("unknown asset record tag")),
            }
        }

        let pubkey = match (pub_uncompressed, pub_compressed) {
            (Some(unc), Some(cmp)) => {
                PublicKeyPair::from_parts(unc, cmp).map_err(|e| deser_err_from(&e))?
            }
            _ => return Err(deser_err("missing public key record")),
        };

        let privkey = match (privkey_bytes, cipher) {
            (Some(key), Some(cipher)) => Some(StoredPrivateKey::new(key, cipher)),
            (None, None) => None,
            (Some(_), None) => return Err(deser_err("private key without cipher descriptor")),
            (None, Some(_)) => return Err(deser_err("cipher descriptor without private key")),
        };

        Ok(Self::new(index, pubkey, privkey))
    }
}

fn deser_err(msg: &str) -> Error {
    Error::AssetDeserialize(msg.to_string())
}

fn deser_err_from(err: &Error) -> Error {
    Error::AssetDeserialize(err.to_string())
}

/// Store key for the asset at `index`.
#[must_use]
pub(crate) fn asset_db_key(index: i32) -> Vec<u8> {
    let mut writer = BinaryWriter::new();
    writer.put_u8(ASSETENTRY_PREFIX);
    writer.put_i32(index);
    writer.into_bytes()
}

/// Joint M-of-N key material at one chain index.
///
/// Composed from the single assets of every sub-wallet; the redeem script
/// and its hashes are memoized on first use.
#[derive(Debug)]
pub struct MultisigAsset {
    index: i32,
    m: u32,
    n: u32,
    assets: BTreeMap<WalletId, Arc<AssetEntry>>,
    script: OnceLock<Vec<u8>>,
    h160: OnceLock<[u8; 20]>,
    h256: OnceLock<[u8; 32]>,
}

impl MultisigAsset {
    /// Compose a multisig asset from per-sub-wallet single assets.
    #[must_use]
    pub fn new(index: i32, assets: BTreeMap<WalletId, Arc<AssetEntry>>, m: u32, n: u32) -> Self {
        Self {
            index,
            m,
            n,
            assets,
            script: OnceLock::new(),
            h160: OnceLock::new(),
            h256: OnceLock::new(),
        }
    }

    /// Chain index.
    #[must_use]
    pub const fn index(&self) -> i32 {
        self.index
    }

    /// Required signer count.
    #[must_use]
    pub const fn m(&self) -> u32 {
        self.m
    }

    /// Total key count.
    #[must_use]
    pub const fn n(&self) -> u32 {
        self.n
    }

    /// Sub-wallet assets in id order.
    #[must_use]
    pub const fn sub_assets(&self) -> &BTreeMap<WalletId, Arc<AssetEntry>> {
        &self.assets
    }

    fn check_populated(&self) -> Result<()> {
        if self.assets.len() as u32 != self.n {
            return Err(Error::InvalidParameter(
                "multisig asset is missing sub-wallet keys",
            ));
        }
        Ok(())
    }

    fn build_script(&self) -> Result<Vec<u8>> {
        self.check_populated()?;

        if self.m < 1 || self.m > 16 || self.n > 16 || self.m > self.n {
            return Err(Error::InvalidParameter("M and N must satisfy 1 <= M <= N <= 16"));
        }

        let mut writer = BinaryWriter::new();
        writer.put_u8(OP_1 + self.m as u8 - 1);

        // compressed keys, concatenated in sub-wallet id order
        for asset in self.assets.values() {
            let single = asset.as_single()?;
            let compressed = single.pubkey().compressed();
            writer.put_u8(compressed.len() as u8);
            writer.put_bytes(compressed);
        }

        let op_n = OP_1 + self.n as u8 - 1;
        if op_n > OP_16 {
            return Err(Error::InvalidParameter("N exceeds OP_16"));
        }
        writer.put_u8(op_n);
        writer.put_u8(OP_CHECKMULTISIG);

        Ok(writer.into_bytes())
    }

    /// The multisig redeem script, built on first use.
    pub fn script(&self) -> Result<&[u8]> {
        if let Some(script) = self.script.get() {
            return Ok(script);
        }
        let built = self.build_script()?;
        Ok(self.script.get_or_init(|| built))
    }

    /// HASH160 of the redeem script (P2SH).
    pub fn hash160(&self) -> Result<&[u8; 20]> {
        self.check_populated()?;
        if let Some(hash) = self.h160.get() {
            return Ok(hash);
        }
        let hash = hash160(self.script()?);
        Ok(self.h160.get_or_init(|| hash))
    }

    /// Single SHA-256 of the redeem script (P2WSH).
    pub fn hash256(&self) -> Result<&[u8; 32]> {
        self.check_populated()?;
        if let Some(hash) = self.h256.get() {
            return Ok(hash);
        }
        let hash = sha256(self.script()?);
        Ok(self.h256.get_or_init(|| hash))
    }
}

/// A persisted or composed asset at a chain index.
#[derive(Debug)]
pub enum AssetEntry {
    /// One keypair.
    Single(SingleAsset),
    /// Joint M-of-N key material.
    Multisig(MultisigAsset),
}

impl AssetEntry {
    /// Chain index of this asset.
    #[must_use]
    pub const fn index(&self) -> i32 {
        match self {
            Self::Single(asset) => asset.index(),
            Self::Multisig(asset) => asset.index(),
        }
    }

    /// Downcast to a single asset.
    pub fn as_single(&self) -> Result<&SingleAsset> {
        match self {
            Self::Single(asset) => Ok(asset),
            Self::Multisig(_) => Err(Error::UnexpectedAssetType),
        }
    }

    /// Downcast to a multisig asset.
    pub fn as_multisig(&self) -> Result<&MultisigAsset> {
        match self {
            Self::Multisig(asset) => Ok(asset),
            Self::Single(_) => Err(Error::UnexpectedAssetType),
        }
    }

    /// Decode a stored asset record from its store key and framed value.
    pub fn deserialize(key: &[u8], value: &[u8]) -> Result<Self> {
        let mut key_reader = BinaryReader::new(key);
        let prefix = key_reader.get_u8().map_err(|_| deser_err("empty asset key"))?;
        if prefix != ASSETENTRY_PREFIX {
            return Err(deser_err("invalid asset key prefix"));
        }
        let index = key_reader
            .get_i32()
            .map_err(|_| deser_err("truncated asset key"))?;
        if !key_reader.is_exhausted() {
            return Err(deser_err("oversized asset key"));
        }

        let payload = unframe(value)?;
        Self::deserialize_payload(index, payload)
    }

    /// Decode the unframed value payload of an asset record at `index`.
    pub fn deserialize_payload(index: i32, payload: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(payload);
        let entry_type = reader
            .get_u8()
            .map_err(|_| deser_err("empty asset value"))?;
        match entry_type {
            ASSETENTRY_SINGLE => Ok(Self::Single(SingleAsset::deserialize_payload(
                index,
                reader.get_remaining(),
            )?)),
            _ => Err(deser_err("invalid asset entry type")),
        }
    }
}
