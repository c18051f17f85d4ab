//! Multisig asset wallet: N single-key sub-wallets indexed jointly.
//!
//! Each sub-wallet is a full single wallet stored under a named keyspace
//! of the parent's store file. Joint assets are never persisted; they are
//! recomposed from the sub-wallets' assets at the same index.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::address::AddressEntry;
use crate::asset::{AssetEntry, MultisigAsset};
use crate::chain;
use crate::derivation::{DerivationScheme, MultisigScheme};
use crate::network::Network;
use crate::store::{
    header_key, subwallet_keyspace_name, wallet_file_name, Keyspace, WalletDb, DEFAULT_KEYSPACE,
};
use crate::types::{
    AddressType, WalletId, ADDRESSENTRYTYPE_KEY, ASSETENTRY_PREFIX, DERIVATIONSCHEME_KEY,
    DERIVATION_LOOKUP, PARENTID_KEY, TOPUSEDINDEX_KEY, WALLETID_KEY, WALLETTYPE_KEY,
    WALLETTYPE_MULTISIG,
};
use crate::wallet::{bump_top_used_index, put_common_header, SingleWallet, WalletCaches};
use crate::{Error, Result};

/// An M-of-N wallet composed of N single-key sub-wallets.
#[derive(Debug)]
pub struct MultisigWallet {
    keyspace: Keyspace,
    network: Network,
    wallet_id: WalletId,
    parent_id: WalletId,
    scheme: MultisigScheme,
    default_type: AddressType,
    subwallets: BTreeMap<WalletId, SingleWallet>,
    caches: Mutex<WalletCaches>,
    top_used_index: AtomicI32,
    chain_length: AtomicU32,
}

impl MultisigWallet {
    /// Create an M-of-N wallet file under `dir` from a private root.
    ///
    /// Each sub-wallet root is derived from the private root, and every
    /// sub-wallet is extended to `lookup` (`u32::MAX` selects the default
    /// lookahead). The handle returned is reloaded purely from disk.
    pub fn create(
        dir: &Path,
        network: Network,
        default_type: AddressType,
        m: u32,
        n: u32,
        private_root: &[u8],
        lookup: u32,
    ) -> Result<Self> {
        if !default_type.is_script_hash() {
            return Err(Error::InvalidParameter(
                "multisig wallets must use P2SH or P2WSH",
            ));
        }
        if m < 1 || m > 16 || n > 16 || m > n {
            return Err(Error::InvalidParameter("M and N must satisfy 1 <= M <= N <= 16"));
        }

        let (root_pubkey, _) = chain::public_key_pair(private_root)?;
        let wallet_id = chain::multisig_wallet_id(&root_pubkey, m, n)?;
        let path = dir.join(wallet_file_name(&wallet_id));

        let lookup = if lookup == u32::MAX {
            DERIVATION_LOOKUP
        } else {
            lookup
        };

        {
            let db = WalletDb::create(&path, n)?;

            let mut ids = BTreeSet::new();
            for index in 0..n {
                let sub_root = chain::subwallet_root(private_root, index)?;
                let sub_keyspace = Keyspace::new(db.clone(), subwallet_keyspace_name(index));
                let sub = SingleWallet::init_keyspace(
                    &sub_keyspace,
                    network,
                    wallet_id,
                    AddressType::P2PKH,
                    sub_root.as_slice(),
                    lookup,
                )?;
                ids.insert(sub.wallet_id());
            }

            let scheme = MultisigScheme::new(m, n, ids)?;

            let keyspace = Keyspace::new(db, DEFAULT_KEYSPACE.to_string());
            let mut batch = keyspace.batch();
            batch.put_framed(&header_key(WALLETTYPE_KEY), &[WALLETTYPE_MULTISIG])?;
            put_common_header(
                &mut batch,
                &wallet_id,
                &wallet_id,
                &scheme.serialize(),
                default_type,
                0,
            )?;
            batch.put_framed(&[ASSETENTRY_PREFIX], &lookup.to_le_bytes())?;
            batch.commit()?;
        }

        // construction state released; the live handle comes from disk
        Self::open(&path, network)
    }

    /// Open an existing multisig wallet file.
    pub fn open(path: &Path, network: Network) -> Result<Self> {
        let db = WalletDb::open(path)?;
        let keyspace = Keyspace::new(db.clone(), DEFAULT_KEYSPACE.to_string());

        let wallet_type = keyspace.get_framed(&header_key(WALLETTYPE_KEY))?;
        if wallet_type.as_slice() != [WALLETTYPE_MULTISIG] {
            return Err(Error::Corrupt("wallet type is not multisig"));
        }

        let parent_id = WalletId::from_slice(&keyspace.get_framed(&header_key(PARENTID_KEY))?)?;
        let wallet_id = WalletId::from_slice(&keyspace.get_framed(&header_key(WALLETID_KEY))?)?;

        let aet = keyspace.get_framed(&header_key(ADDRESSENTRYTYPE_KEY))?;
        if aet.len() != 1 {
            return Err(Error::Corrupt("invalid address type length"));
        }
        let default_type = AddressType::from_byte(aet[0])?;

        let top: [u8; 4] = keyspace
            .get_framed(&header_key(TOPUSEDINDEX_KEY))?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Corrupt("invalid top index length"))?;
        let top_used_index = i32::from_le_bytes(top);

        let scheme_payload = keyspace.get_framed(&header_key(DERIVATIONSCHEME_KEY))?;
        let scheme = match DerivationScheme::deserialize(&scheme_payload)? {
            DerivationScheme::Multisig(scheme) => scheme,
            DerivationScheme::Legacy(_) => {
                return Err(Error::Corrupt("unexpected derivation scheme"));
            }
        };

        let length: [u8; 4] = keyspace
            .get_framed(&[ASSETENTRY_PREFIX])?
            .as_slice()
            .try_into()
            .map_err(|_| Error::Corrupt("invalid chain length"))?;
        let chain_length = u32::from_le_bytes(length);

        // open every sub-wallet, then bind against the persisted id set
        let mut subwallets = BTreeMap::new();
        for index in 0..scheme.n() {
            let sub = SingleWallet::load(
                Keyspace::new(db.clone(), subwallet_keyspace_name(index)),
                network,
            )?;
            subwallets.insert(sub.wallet_id(), sub);
        }
        scheme.bind_check(&subwallets.keys().copied().collect())?;

        let mut assets: BTreeMap<i32, Arc<AssetEntry>> = BTreeMap::new();
        for index in 0..chain_length as i32 {
            let asset = compose_asset(&subwallets, &scheme, index)?;
            assets.insert(index, Arc::new(AssetEntry::Multisig(asset)));
        }

        debug!(
            wallet = %wallet_id,
            m = scheme.m(),
            n = scheme.n(),
            assets = assets.len(),
            "opened multisig wallet"
        );

        Ok(Self {
            keyspace,
            network,
            wallet_id,
            parent_id,
            scheme,
            default_type,
            subwallets,
            caches: Mutex::new(WalletCaches {
                assets,
                addresses: BTreeMap::new(),
            }),
            top_used_index: AtomicI32::new(top_used_index),
            chain_length: AtomicU32::new(chain_length),
        })
    }

    /// Hand out the next unused address, extending every sub-wallet when
    /// the lookahead is exhausted.
    pub fn get_new_address(&self) -> Result<Arc<AddressEntry>> {
        let index = bump_top_used_index(&self.keyspace, &self.top_used_index)?;

        let mut caches = self.caches.lock();
        if let Some(entry) = caches.addresses.get(&index) {
            return Ok(entry.clone());
        }

        if !caches.assets.contains_key(&index) {
            if caches.assets.is_empty() {
                return Err(Error::Uninitialized);
            }
            self.extend_chain_locked(&mut caches, DERIVATION_LOOKUP)?;
        }
        let asset = caches
            .assets
            .get(&index)
            .cloned()
            .ok_or(Error::AssetUnavailable)?;

        let entry = Arc::new(AddressEntry::new(asset, self.default_type, self.network)?);
        caches.addresses.insert(index, entry.clone());
        Ok(entry)
    }

    /// Append `count` joint assets after the current highest index,
    /// growing each sub-wallet only by what it is missing.
    pub fn extend_chain(&self, count: u32) -> Result<()> {
        let mut caches = self.caches.lock();
        if caches.assets.is_empty() {
            return Err(Error::Uninitialized);
        }
        self.extend_chain_locked(&mut caches, count)
    }

    fn extend_chain_locked(&self, caches: &mut WalletCaches, count: u32) -> Result<()> {
        let first_index = caches
            .assets
            .keys()
            .next_back()
            .copied()
            .ok_or(Error::Uninitialized)?;
        let total = (first_index + 1) as u32 + count;

        for sub in self.subwallets.values() {
            let have = sub.asset_count() as u32;
            if total > have {
                sub.extend_chain(total - have)?;
            }
        }

        for index in (first_index + 1)..(total as i32) {
            if caches.assets.contains_key(&index) {
                continue;
            }
            let asset = compose_asset(&self.subwallets, &self.scheme, index)?;
            caches.assets.insert(index, Arc::new(AssetEntry::Multisig(asset)));
        }

        if total > self.chain_length.load(Ordering::Relaxed) {
            self.chain_length.store(total, Ordering::Relaxed);
            let mut batch = self.keyspace.batch();
            batch.put_framed(&[ASSETENTRY_PREFIX], &total.to_le_bytes())?;
            batch.commit()?;
        }
        Ok(())
    }

    /// Look up the joint asset at `index` in the in-memory map.
    pub fn get_asset_for_index(&self, index: i32) -> Result<Arc<AssetEntry>> {
        self.caches
            .lock()
            .assets
            .get(&index)
            .cloned()
            .ok_or(Error::AssetUnavailable)
    }

    /// Network-prefixed script hashes of every joint asset, one per
    /// index, matching the wallet's default address type.
    pub fn get_addr_hash_vec(&self) -> Result<Vec<Vec<u8>>> {
        let caches = self.caches.lock();
        let mut hashes = Vec::with_capacity(caches.assets.len());
        for asset in caches.assets.values() {
            let multisig = asset.as_multisig()?;
            let mut bytes = Vec::with_capacity(33);
            bytes.push(self.network.p2sh_prefix());
            match self.default_type {
                AddressType::P2SH => bytes.extend_from_slice(multisig.hash160()?),
                AddressType::P2WSH => bytes.extend_from_slice(multisig.hash256()?),
                _ => {
                    return Err(Error::InvalidParameter(
                        "multisig wallets must use P2SH or P2WSH",
                    ));
                }
            }
            hashes.push(bytes);
        }
        Ok(hashes)
    }

    /// Hex form of the wallet id.
    #[must_use]
    pub fn id(&self) -> String {
        self.wallet_id.to_string()
    }

    /// The 20-byte wallet id.
    #[must_use]
    pub const fn wallet_id(&self) -> WalletId {
        self.wallet_id
    }

    /// The parent wallet id; always equals the wallet id.
    #[must_use]
    pub const fn parent_id(&self) -> WalletId {
        self.parent_id
    }

    /// Required signer count.
    #[must_use]
    pub const fn m(&self) -> u32 {
        self.scheme.m()
    }

    /// Sub-wallet count.
    #[must_use]
    pub const fn n(&self) -> u32 {
        self.scheme.n()
    }

    /// The sub-wallets, keyed by their wallet id.
    #[must_use]
    pub const fn subwallets(&self) -> &BTreeMap<WalletId, SingleWallet> {
        &self.subwallets
    }

    /// The default address type new addresses render as.
    #[must_use]
    pub const fn default_type(&self) -> AddressType {
        self.default_type
    }

    /// Number of materialized joint assets.
    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.caches.lock().assets.len()
    }

    /// The persisted chain length.
    #[must_use]
    pub fn chain_length(&self) -> u32 {
        self.chain_length.load(Ordering::Relaxed)
    }

    /// The persisted top-used-index counter.
    #[must_use]
    pub fn top_used_index(&self) -> i32 {
        self.top_used_index.load(Ordering::Relaxed)
    }
}

fn compose_asset(
    subwallets: &BTreeMap<WalletId, SingleWallet>,
    scheme: &MultisigScheme,
    index: i32,
) -> Result<MultisigAsset> {
    let mut assets = BTreeMap::new();
    for (id, sub) in subwallets {
        assets.insert(*id, sub.get_asset_for_index(index)?);
    }
    Ok(MultisigAsset::new(index, assets, scheme.m(), scheme.n()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{PublicKeyPair, SingleAsset, ROOT_ASSET_INDEX};
    use crate::derivation::LegacyScheme;
    use keel::base58check_encode;
    use keel::hash::{hash160, sha256};

    const SEED: [u8; 32] = [0x11; 32];

    fn create_2of3(dir: &Path, lookup: u32) -> MultisigWallet {
        MultisigWallet::create(
            dir,
            Network::Mainnet,
            AddressType::P2SH,
            2,
            3,
            &SEED,
            lookup,
        )
        .unwrap()
    }

    fn ms_path(dir: &Path) -> std::path::PathBuf {
        let (pubkey, _) = chain::public_key_pair(&SEED).unwrap();
        let id = chain::multisig_wallet_id(&pubkey, 2, 3).unwrap();
        dir.join(wallet_file_name(&id))
    }

    #[test]
    fn test_create_builds_subwallets() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_2of3(dir.path(), 4);

        assert_eq!(wallet.n(), 3);
        assert_eq!(wallet.m(), 2);
        assert_eq!(wallet.subwallets().len(), 3);
        assert_eq!(wallet.asset_count(), 4);
        assert_eq!(wallet.chain_length(), 4);

        for sub in wallet.subwallets().values() {
            assert_eq!(sub.asset_count(), 4);
            assert_eq!(sub.parent_id(), wallet.wallet_id());
            assert_eq!(sub.default_type(), AddressType::P2PKH);
        }
    }

    #[test]
    fn test_redeem_script_uses_sorted_subwallet_keys() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_2of3(dir.path(), 4);

        let asset = wallet.get_asset_for_index(0).unwrap();
        let multisig = asset.as_multisig().unwrap();
        let script = multisig.script().unwrap();

        assert_eq!(script[0], 0x52); // OP_2
        assert_eq!(script[script.len() - 2], 0x53); // OP_3
        assert_eq!(script[script.len() - 1], 0xae); // OP_CHECKMULTISIG

        // keys appear in lexicographic sub-wallet id order
        let mut slot = 0;
        for (id, sub) in wallet.subwallets() {
            let sub_asset = sub.get_asset_for_index(0).unwrap();
            let expected = sub_asset.as_single().unwrap().pubkey().compressed();
            let start = 2 + slot * 34;
            assert_eq!(&script[start..start + 33], expected.as_slice(), "id {id}");
            slot += 1;
        }
    }

    #[test]
    fn test_subwallet_keys_match_direct_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_2of3(dir.path(), 4);

        for index in 0..3u32 {
            let sub_root = chain::subwallet_root(&SEED, index).unwrap();
            let (pubkey, _) = chain::public_key_pair(sub_root.as_slice()).unwrap();
            let id = chain::single_wallet_id(&pubkey);

            let sub = wallet.subwallets().get(&id).expect("sub-wallet id derived");

            let scheme = LegacyScheme::from_root(sub_root.as_slice()).unwrap();
            let root = SingleAsset::new(
                ROOT_ASSET_INDEX,
                PublicKeyPair::from_uncompressed(pubkey).unwrap(),
                None,
            );
            let expected = scheme.extend_chain(&root, 4).unwrap();
            for asset in &expected {
                let stored = sub.get_asset_for_index(asset.index()).unwrap();
                assert_eq!(stored.as_single().unwrap().pubkey(), asset.pubkey());
            }
        }
    }

    #[test]
    fn test_p2sh_address() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_2of3(dir.path(), 4);

        let entry = wallet.get_new_address().unwrap();
        assert_eq!(entry.index(), 0);

        let asset = wallet.get_asset_for_index(0).unwrap();
        let script = asset.as_multisig().unwrap().script().unwrap().to_vec();
        let expected = base58check_encode(&[0x05], &hash160(&script));
        assert_eq!(entry.address().unwrap(), expected.as_bytes());
    }

    #[test]
    fn test_p2wsh_address_is_prefixed_sha256() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = MultisigWallet::create(
            dir.path(),
            Network::Mainnet,
            AddressType::P2WSH,
            2,
            3,
            &SEED,
            4,
        )
        .unwrap();

        let entry = wallet.get_new_address().unwrap();
        let asset = wallet.get_asset_for_index(0).unwrap();
        let script = asset.as_multisig().unwrap().script().unwrap().to_vec();

        let bytes = entry.address().unwrap();
        assert_eq!(bytes[0], Network::Mainnet.p2sh_prefix());
        assert_eq!(&bytes[1..], sha256(&script).as_slice());
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let err = MultisigWallet::create(
            dir.path(),
            Network::Mainnet,
            AddressType::P2PKH,
            2,
            3,
            &SEED,
            4,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));

        let err = MultisigWallet::create(
            dir.path(),
            Network::Mainnet,
            AddressType::P2SH,
            4,
            3,
            &SEED,
            4,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
    }

    #[test]
    fn test_reopen_reproduces_assets() {
        let dir = tempfile::tempdir().unwrap();
        let created = create_2of3(dir.path(), 4);

        let mut expected = Vec::new();
        for index in 0..4 {
            let asset = created.get_asset_for_index(index).unwrap();
            let multisig = asset.as_multisig().unwrap();
            expected.push((
                multisig.script().unwrap().to_vec(),
                *multisig.hash160().unwrap(),
                *multisig.hash256().unwrap(),
            ));
        }
        drop(created);

        let reopened = MultisigWallet::open(&ms_path(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(reopened.asset_count(), 4);
        for (index, (script, h160, h256)) in expected.iter().enumerate() {
            let asset = reopened.get_asset_for_index(index as i32).unwrap();
            let multisig = asset.as_multisig().unwrap();
            assert_eq!(multisig.script().unwrap(), script.as_slice());
            assert_eq!(multisig.hash160().unwrap(), h160);
            assert_eq!(multisig.hash256().unwrap(), h256);
        }
    }

    #[test]
    fn test_lookahead_exhaustion_extends_subwallets() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_2of3(dir.path(), 4);

        for expected_index in 0..6 {
            let entry = wallet.get_new_address().unwrap();
            assert_eq!(entry.index(), expected_index);
        }

        assert!(wallet.asset_count() >= 6);
        assert!(wallet.chain_length() >= 6);
        for sub in wallet.subwallets().values() {
            assert!(sub.asset_count() >= 6);
        }
        assert_eq!(wallet.top_used_index(), 6);

        let grown_length = wallet.chain_length();
        drop(wallet);

        let reopened = MultisigWallet::open(&ms_path(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(reopened.chain_length(), grown_length);
        assert_eq!(reopened.asset_count(), grown_length as usize);
        assert_eq!(reopened.top_used_index(), 6);
    }

    #[test]
    fn test_addr_hash_vec_matches_default_type() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_2of3(dir.path(), 4);

        let hashes = wallet.get_addr_hash_vec().unwrap();
        assert_eq!(hashes.len(), 4);

        let asset = wallet.get_asset_for_index(0).unwrap();
        let expected = asset.as_multisig().unwrap().hash160().unwrap();
        assert_eq!(hashes[0][0], Network::Mainnet.p2sh_prefix());
        assert_eq!(&hashes[0][1..], expected.as_slice());
    }

    #[test]
    fn test_bind_check_rejects_foreign_ids() {
        let ids: BTreeSet<WalletId> = (0u8..3).map(|i| WalletId::new([i; 20])).collect();
        let scheme = MultisigScheme::new(2, 3, ids).unwrap();

        let mut other: BTreeSet<WalletId> = (0u8..2).map(|i| WalletId::new([i; 20])).collect();
        other.insert(WalletId::new([9; 20]));

        assert!(matches!(
            scheme.bind_check(&other).unwrap_err(),
            Error::SchemeMismatch
        ));
    }
}
