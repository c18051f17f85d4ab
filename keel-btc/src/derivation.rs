//! Derivation schemes: how one asset produces the next.

use std::collections::BTreeSet;

use zeroize::Zeroizing;

use crate::asset::{PublicKeyPair, SingleAsset, StoredPrivateKey};
use crate::chain;
use crate::codec::{frame, BinaryReader, BinaryWriter};
use crate::types::{WalletId, DERIVATIONSCHEME_LEGACY, DERIVATIONSCHEME_MULTISIG};
use crate::{Error, Result};

/// Outcome of deriving the next private key in a chain.
///
/// `Locked` is not an error: a chain with encrypted or absent private
/// keys keeps extending in pubkey-only form.
enum NextPrivateKey {
    Available(StoredPrivateKey),
    Locked,
}

/// A wallet's persisted derivation scheme.
#[derive(Debug)]
pub enum DerivationScheme {
    /// Linear chaincode derivation.
    Legacy(LegacyScheme),
    /// M-of-N composition over sub-wallets.
    Multisig(MultisigScheme),
}

impl DerivationScheme {
    /// Serialize to the framed on-disk blob.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        match self {
            Self::Legacy(scheme) => scheme.serialize(),
            Self::Multisig(scheme) => scheme.serialize(),
        }
    }

    /// Decode a scheme from its unframed payload.
    pub fn deserialize(payload: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(payload);
        match reader.get_u8()? {
            DERIVATIONSCHEME_LEGACY => {
                let len = reader.get_var_int()?;
                if len != 32 {
                    return Err(Error::Corrupt("chaincode must be 32 bytes"));
                }
                let chaincode: [u8; 32] = reader
                    .get_bytes(32)?
                    .try_into()
                    .expect("length checked");
                if !reader.is_exhausted() {
                    return Err(Error::Corrupt("trailing bytes after chaincode"));
                }
                Ok(Self::Legacy(LegacyScheme::new(Zeroizing::new(chaincode))))
            }
            DERIVATIONSCHEME_MULTISIG => {
                let m = reader.get_u32()?;
                let n = reader.get_u32()?;

                let mut ids = BTreeSet::new();
                while !reader.is_exhausted() {
                    let len = reader.get_var_int()? as usize;
                    let id = WalletId::from_slice(reader.get_bytes(len)?)?;
                    ids.insert(id);
                }
                if ids.len() as u32 != n {
                    return Err(Error::Corrupt("sub-wallet id count mismatch"));
                }

                let scheme = MultisigScheme::new(m, n, ids)
                    .map_err(|_| Error::Corrupt("invalid multisig parameters"))?;
                Ok(Self::Multisig(scheme))
            }
            _ => Err(Error::Corrupt("unsupported derivation scheme")),
        }
    }

    /// Downcast to the legacy scheme.
    pub fn as_legacy(&self) -> Result<&LegacyScheme> {
        match self {
            Self::Legacy(scheme) => Ok(scheme),
            Self::Multisig(_) => Err(Error::Corrupt("unexpected derivation scheme")),
        }
    }

    /// Downcast to the multisig scheme.
    pub fn as_multisig(&self) -> Result<&MultisigScheme> {
        match self {
            Self::Multisig(scheme) => Ok(scheme),
            Self::Legacy(_) => Err(Error::Corrupt("unexpected derivation scheme")),
        }
    }
}

/// Linear chained derivation over a 32-byte chaincode.
pub struct LegacyScheme {
    chaincode: Zeroizing<[u8; 32]>,
}

impl std::fmt::Debug for LegacyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyScheme")
            .field("chaincode", &"[REDACTED]")
            .finish()
    }
}

impl LegacyScheme {
    /// Wrap an existing chaincode.
    #[must_use]
    pub fn new(chaincode: Zeroizing<[u8; 32]>) -> Self {
        Self { chaincode }
    }

    /// Derive the chaincode from the private root.
    pub fn from_root(private_root: &[u8]) -> Result<Self> {
        Ok(Self::new(chain::compute_chain_code(private_root)?))
    }

    /// The chaincode bytes.
    #[must_use]
    pub fn chaincode(&self) -> &[u8; 32] {
        &self.chaincode
    }

    /// Serialize to the framed on-disk blob.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        writer.put_u8(DERIVATIONSCHEME_LEGACY);
        writer.put_var_int(32);
        writer.put_bytes(self.chaincode.as_slice());
        frame(writer.as_bytes())
    }

    /// Produce `count` new assets following `first_asset`.
    pub fn extend_chain(&self, first_asset: &SingleAsset, count: u32) -> Result<Vec<SingleAsset>> {
        let mut assets: Vec<SingleAsset> = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let prev = assets.last().unwrap_or(first_asset);
            let next = self.next_asset(prev)?;
            assets.push(next);
        }
        Ok(assets)
    }

    fn next_asset(&self, prev: &SingleAsset) -> Result<SingleAsset> {
        let (uncompressed, compressed) =
            chain::chained_public_key(prev.pubkey().uncompressed(), &self.chaincode)?;
        let pubkey = PublicKeyPair::from_parts(uncompressed, compressed)?;

        let privkey = match self.next_private_key(prev)? {
            NextPrivateKey::Available(key) => Some(key),
            NextPrivateKey::Locked => None,
        };

        Ok(SingleAsset::new(prev.index() + 1, pubkey, privkey))
    }

    fn next_private_key(&self, prev: &SingleAsset) -> Result<NextPrivateKey> {
        let Some(stored) = prev.privkey() else {
            return Ok(NextPrivateKey::Locked);
        };
        let Ok(plaintext) = stored.plaintext() else {
            // encrypted parent key: do not prompt, extend pubkey-only
            return Ok(NextPrivateKey::Locked);
        };

        let next =
            chain::chained_private_key(plaintext, &self.chaincode, prev.pubkey().uncompressed())?;
        Ok(NextPrivateKey::Available(StoredPrivateKey::new(
            Zeroizing::new(next.to_vec()),
            stored.cipher().fresh_copy(),
        )))
    }
}

/// M-of-N scheme: persisted parameters plus the ordered sub-wallet id set.
///
/// Sub-wallet handles are owned by the multisig wallet; the scheme only
/// records which ids must be present.
#[derive(Debug)]
pub struct MultisigScheme {
    m: u32,
    n: u32,
    ids: BTreeSet<WalletId>,
}

impl MultisigScheme {
    /// Build a scheme, validating parameters.
    pub fn new(m: u32, n: u32, ids: BTreeSet<WalletId>) -> Result<Self> {
        if m < 1 || m > 16 || n > 16 || m > n {
            return Err(Error::InvalidParameter("M and N must satisfy 1 <= M <= N <= 16"));
        }
        if ids.len() as u32 != n {
            return Err(Error::InvalidParameter("sub-wallet id count must equal N"));
        }
        Ok(Self { m, n, ids })
    }

    /// Required signer count.
    #[must_use]
    pub const fn m(&self) -> u32 {
        self.m
    }

    /// Total sub-wallet count.
    #[must_use]
    pub const fn n(&self) -> u32 {
        self.n
    }

    /// Sub-wallet ids in lexicographic order.
    #[must_use]
    pub const fn ids(&self) -> &BTreeSet<WalletId> {
        &self.ids
    }

    /// Validate an opened sub-wallet id set against the persisted one.
    pub fn bind_check(&self, opened: &BTreeSet<WalletId>) -> Result<()> {
        if *opened != self.ids {
            return Err(Error::SchemeMismatch);
        }
        Ok(())
    }

    /// Serialize to the framed on-disk blob.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut writer = BinaryWriter::new();
        writer.put_u8(DERIVATIONSCHEME_MULTISIG);
        writer.put_u32(self.m);
        writer.put_u32(self.n);
        for id in &self.ids {
            writer.put_var_int(id.as_bytes().len() as u64);
            writer.put_bytes(id.as_bytes());
        }
        frame(writer.as_bytes())
    }
}
