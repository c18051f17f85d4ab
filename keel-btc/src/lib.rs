//! # Keel-BTC - Deterministic Wallet Engine
//!
//! Persistent, reloadable Bitcoin wallets over a linear deterministic
//! key chain.
//!
//! ## Features
//!
//! - **Chained Key Derivation**: a seed and a chaincode produce a dense
//!   chain of keypairs; chains keep extending in pubkey-only form when
//!   private keys are locked
//! - **Persistent Store**: every wallet is a keyed store of framed
//!   records that reconstitutes the full wallet on open
//! - **Multiple Address Schemes**: P2PKH, P2WPKH, P2SH, and P2WSH over
//!   single-key and M-of-N multisig assets
//! - **Multisig Composition**: N independent sub-wallets in one store
//!   file, indexed jointly and hashed into shared redeem scripts

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod address;
mod asset;
pub mod chain;
mod cipher;
pub mod codec;
mod derivation;
mod error;
mod multisig;
mod network;
mod store;
mod types;
mod wallet;

pub use address::{AddressEntry, ScriptRecipient};
pub use asset::{
    AssetEntry, MultisigAsset, PublicKeyPair, SingleAsset, StoredPrivateKey, ROOT_ASSET_INDEX,
};
pub use cipher::{Cipher, CipherKind};
pub use derivation::{DerivationScheme, LegacyScheme, MultisigScheme};
pub use error::Error;
pub use multisig::MultisigWallet;
pub use network::Network;
pub use types::{AddressType, WalletId, DERIVATION_LOOKUP};
pub use wallet::SingleWallet;

/// A convenient Result type alias for wallet engine operations.
pub type Result<T> = core::result::Result<T, Error>;
