//! Address entries: the user-visible rendering of an asset.
//!
//! An entry wraps an asset and materializes its address bytes on first
//! use. P2PKH and P2SH render as Base58Check strings; the segwit forms
//! stay as raw prefixed hashes until an address standard is adopted.

use std::sync::{Arc, OnceLock};

use keel::base58check_encode;

use crate::asset::AssetEntry;
use crate::network::Network;
use crate::types::AddressType;
use crate::{Error, Result};

/// An output script plus the value to pay it, consumed by the
/// transaction builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecipient {
    script: Vec<u8>,
    value: u64,
}

impl ScriptRecipient {
    /// `OP_DUP OP_HASH160 <h160> OP_EQUALVERIFY OP_CHECKSIG`
    #[must_use]
    pub fn p2pkh(pubkey_hash: &[u8; 20], value: u64) -> Self {
        let mut script = Vec::with_capacity(25);
        script.push(0x76); // OP_DUP
        script.push(0xa9); // OP_HASH160
        script.push(0x14); // Push 20 bytes
        script.extend_from_slice(pubkey_hash);
        script.push(0x88); // OP_EQUALVERIFY
        script.push(0xac); // OP_CHECKSIG
        Self { script, value }
    }

    /// `OP_0 <h160>`
    #[must_use]
    pub fn p2wpkh(pubkey_hash: &[u8; 20], value: u64) -> Self {
        let mut script = Vec::with_capacity(22);
        script.push(0x00); // OP_0
        script.push(0x14); // Push 20 bytes
        script.extend_from_slice(pubkey_hash);
        Self { script, value }
    }

    /// `OP_HASH160 <h160> OP_EQUAL`
    #[must_use]
    pub fn p2sh(script_hash: &[u8; 20], value: u64) -> Self {
        let mut script = Vec::with_capacity(23);
        script.push(0xa9); // OP_HASH160
        script.push(0x14); // Push 20 bytes
        script.extend_from_slice(script_hash);
        script.push(0x87); // OP_EQUAL
        Self { script, value }
    }

    /// `OP_0 <h256>`
    #[must_use]
    pub fn p2wsh(script_hash: &[u8; 32], value: u64) -> Self {
        let mut script = Vec::with_capacity(34);
        script.push(0x00); // OP_0
        script.push(0x20); // Push 32 bytes
        script.extend_from_slice(script_hash);
        Self { script, value }
    }

    /// The output script.
    #[must_use]
    pub fn script(&self) -> &[u8] {
        &self.script
    }

    /// The value in satoshis.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.value
    }
}

/// A materialized, memoized address over an asset.
#[derive(Debug)]
pub struct AddressEntry {
    asset: Arc<AssetEntry>,
    addr_type: AddressType,
    network: Network,
    address: OnceLock<Vec<u8>>,
}

impl AddressEntry {
    /// Wrap an asset as the given address type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidParameter`] for unsupported
    /// (asset, address-type) pairings, e.g. a multisig asset as P2PKH.
    pub fn new(asset: Arc<AssetEntry>, addr_type: AddressType, network: Network) -> Result<Self> {
        match (&*asset, addr_type) {
            (AssetEntry::Single(_), _) => {}
            (AssetEntry::Multisig(_), AddressType::P2SH | AddressType::P2WSH) => {}
            (AssetEntry::Multisig(_), _) => {
                return Err(Error::InvalidParameter(
                    "multisig assets only support P2SH and P2WSH",
                ));
            }
        }
        Ok(Self {
            asset,
            addr_type,
            network,
            address: OnceLock::new(),
        })
    }

    /// Chain index of the wrapped asset.
    #[must_use]
    pub fn index(&self) -> i32 {
        self.asset.index()
    }

    /// The address type this entry renders as.
    #[must_use]
    pub const fn addr_type(&self) -> AddressType {
        self.addr_type
    }

    /// The wrapped asset.
    #[must_use]
    pub fn asset(&self) -> &Arc<AssetEntry> {
        &self.asset
    }

    /// Canonical address bytes, computed on first use.
    ///
    /// P2PKH and P2SH return Base58Check text; P2WPKH returns the raw
    /// compressed-key hash and P2WSH the prefixed SHA-256, as no segwit
    /// address envelope is defined for them yet.
    pub fn address(&self) -> Result<&[u8]> {
        if let Some(address) = self.address.get() {
            return Ok(address);
        }
        let built = self.build_address()?;
        Ok(self.address.get_or_init(|| built))
    }

    fn build_address(&self) -> Result<Vec<u8>> {
        let bytes = match (&*self.asset, self.addr_type) {
            (AssetEntry::Single(asset), AddressType::P2PKH) => {
                base58check_encode(&[self.network.p2pkh_prefix()], asset.hash160_uncompressed())
                    .into_bytes()
            }
            (AssetEntry::Single(asset), AddressType::P2WPKH) => {
                asset.hash160_compressed().to_vec()
            }
            (AssetEntry::Single(asset), AddressType::P2SH) => {
                base58check_encode(&[self.network.p2sh_prefix()], asset.hash160_compressed())
                    .into_bytes()
            }
            (AssetEntry::Single(asset), AddressType::P2WSH) => {
                let mut bytes = Vec::with_capacity(33);
                bytes.push(self.network.p2sh_prefix());
                bytes.extend_from_slice(asset.hash256_compressed());
                bytes
            }
            (AssetEntry::Multisig(asset), AddressType::P2SH) => {
                base58check_encode(&[self.network.p2sh_prefix()], asset.hash160()?).into_bytes()
            }
            (AssetEntry::Multisig(asset), AddressType::P2WSH) => {
                let mut bytes = Vec::with_capacity(33);
                bytes.push(self.network.p2sh_prefix());
                bytes.extend_from_slice(asset.hash256()?);
                bytes
            }
            (AssetEntry::Multisig(_), _) => {
                return Err(Error::InvalidParameter(
                    "multisig assets only support P2SH and P2WSH",
                ));
            }
        };
        Ok(bytes)
    }

    /// Build the payment recipient for this address at the given value.
    pub fn recipient(&self, value: u64) -> Result<ScriptRecipient> {
        let recipient = match (&*self.asset, self.addr_type) {
            (AssetEntry::Single(asset), AddressType::P2PKH) => {
                ScriptRecipient::p2pkh(asset.hash160_uncompressed(), value)
            }
            (AssetEntry::Single(asset), AddressType::P2WPKH) => {
                ScriptRecipient::p2wpkh(asset.hash160_compressed(), value)
            }
            (AssetEntry::Single(asset), AddressType::P2SH) => {
                ScriptRecipient::p2sh(asset.hash160_compressed(), value)
            }
            (AssetEntry::Single(asset), AddressType::P2WSH) => {
                ScriptRecipient::p2wsh(asset.hash256_compressed(), value)
            }
            (AssetEntry::Multisig(asset), AddressType::P2SH) => {
                ScriptRecipient::p2sh(asset.hash160()?, value)
            }
            (AssetEntry::Multisig(asset), AddressType::P2WSH) => {
                ScriptRecipient::p2wsh(asset.hash256()?, value)
            }
            (AssetEntry::Multisig(_), _) => {
                return Err(Error::InvalidParameter(
                    "multisig assets only support P2SH and P2WSH",
                ));
            }
        };
        Ok(recipient)
    }
}
