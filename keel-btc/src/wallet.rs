//! Single-signature asset wallet: a persistent, reloadable chain of
//! deterministically derived keys.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::address::AddressEntry;
use crate::asset::{
    AssetEntry, PublicKeyPair, SingleAsset, StoredPrivateKey, ROOT_ASSET_INDEX,
};
use crate::chain;
use crate::cipher::Cipher;
use crate::derivation::{DerivationScheme, LegacyScheme};
use crate::network::Network;
use crate::store::{
    header_key, wallet_file_name, Keyspace, RecordBatch, WalletDb, DEFAULT_KEYSPACE,
};
use crate::types::{
    AddressType, WalletId, ADDRESSENTRYTYPE_KEY, ASSETENTRY_PREFIX, DERIVATIONSCHEME_KEY,
    DERIVATION_LOOKUP, PARENTID_KEY, ROOTASSET_KEY, TOPUSEDINDEX_KEY, WALLETID_KEY,
    WALLETTYPE_KEY, WALLETTYPE_SINGLE,
};
use crate::{Error, Result};

/// In-memory maps shared under the wallet mutex.
#[derive(Debug)]
pub(crate) struct WalletCaches {
    pub(crate) assets: BTreeMap<i32, Arc<AssetEntry>>,
    pub(crate) addresses: BTreeMap<i32, Arc<AddressEntry>>,
}

/// Fetch-and-add the top-used-index counter and persist the new value
/// before any cache is touched.
pub(crate) fn bump_top_used_index(keyspace: &Keyspace, counter: &AtomicI32) -> Result<i32> {
    let index = counter.fetch_add(1, Ordering::Relaxed);
    let current = counter.load(Ordering::Relaxed);

    let mut batch = keyspace.batch();
    batch.put_framed(&header_key(TOPUSEDINDEX_KEY), &current.to_le_bytes())?;
    batch.commit()?;

    Ok(index)
}

/// Write the header records every wallet flavor shares.
pub(crate) fn put_common_header(
    batch: &mut RecordBatch<'_>,
    parent_id: &WalletId,
    wallet_id: &WalletId,
    scheme_blob: &[u8],
    default_type: AddressType,
    top_used_index: i32,
) -> Result<()> {
    batch.put_framed(&header_key(PARENTID_KEY), parent_id.as_bytes())?;
    batch.put_framed(&header_key(WALLETID_KEY), wallet_id.as_bytes())?;
    // the scheme blob carries its own length envelope
    batch.put_raw(&header_key(DERIVATIONSCHEME_KEY), scheme_blob)?;
    batch.put_framed(&header_key(ADDRESSENTRYTYPE_KEY), &[default_type.as_byte()])?;
    batch.put_framed(&header_key(TOPUSEDINDEX_KEY), &top_used_index.to_le_bytes())?;
    Ok(())
}

/// A single-key wallet backed by one store keyspace.
///
/// The handle is shared between threads: the top-used-index counter is
/// atomic, and the asset and address maps sit behind one mutex.
#[derive(Debug)]
pub struct SingleWallet {
    keyspace: Keyspace,
    network: Network,
    wallet_id: WalletId,
    parent_id: WalletId,
    scheme: LegacyScheme,
    default_type: AddressType,
    root: Arc<AssetEntry>,
    caches: Mutex<WalletCaches>,
    top_used_index: AtomicI32,
}

impl SingleWallet {
    /// Create a wallet file under `dir` from a private root, pre-deriving
    /// `lookup` assets (`u32::MAX` selects the default lookahead).
    pub fn create(
        dir: &Path,
        network: Network,
        default_type: AddressType,
        private_root: &[u8],
        lookup: u32,
    ) -> Result<Self> {
        let (root_pubkey, _) = chain::public_key_pair(private_root)?;
        let wallet_id = chain::single_wallet_id(&root_pubkey);

        let path = dir.join(wallet_file_name(&wallet_id));
        let db = WalletDb::create(&path, 0)?;
        let keyspace = Keyspace::new(db, DEFAULT_KEYSPACE.to_string());

        Self::init_keyspace(&keyspace, network, wallet_id, default_type, private_root, lookup)
    }

    /// Initialize a keyspace as a single wallet and return the live handle.
    ///
    /// Used both for top-level wallets and for multisig sub-wallets, which
    /// pass the multisig wallet's id as `parent_id`.
    pub(crate) fn init_keyspace(
        keyspace: &Keyspace,
        network: Network,
        parent_id: WalletId,
        default_type: AddressType,
        private_root: &[u8],
        lookup: u32,
    ) -> Result<Self> {
        let (root_pubkey, _) = chain::public_key_pair(private_root)?;
        let wallet_id = chain::single_wallet_id(&root_pubkey);

        let scheme = LegacyScheme::from_root(private_root)?;
        let root = SingleAsset::new(
            ROOT_ASSET_INDEX,
            PublicKeyPair::from_uncompressed(root_pubkey)?,
            Some(StoredPrivateKey::new(
                Zeroizing::new(private_root.to_vec()),
                Cipher::aes(),
            )),
        );

        let mut batch = keyspace.batch();
        batch.put_framed(&header_key(WALLETTYPE_KEY), &[WALLETTYPE_SINGLE])?;
        put_common_header(
            &mut batch,
            &parent_id,
            &wallet_id,
            &scheme.serialize(),
            default_type,
            0,
        )?;
        // the asset envelope is the frame
        batch.put_raw(&header_key(ROOTASSET_KEY), &root.serialize())?;
        batch.commit()?;

        let wallet = Self::load(keyspace.clone(), network)?;

        let lookup = if lookup == u32::MAX {
            DERIVATION_LOOKUP
        } else {
            lookup
        };
        let first = wallet.root.clone();
        wallet.extend_chain_from(&first, lookup)?;
        Ok(wallet)
    }

    /// Open an existing wallet file.
    pub fn open(path: &Path, network: Network) -> Result<Self> {
        let db = WalletDb::open(path)?;
        Self::load(Keyspace::new(db, DEFAULT_KEYSPACE.to_string()), network)
    }

    /// Reconstitute a wallet from its keyspace.
    pub(crate) fn load(keyspace: Keyspace, network: Network) -> Result<Self> {
        let wallet_type = keyspace.get_framed(&header_key(WALLETTYPE_KEY))?;
        if wallet_type.as_slice() != [WALLETTYPE_SINGLE] {
            return Err(Error::Corrupt("wallet type is not single"));
        }

        let parent_id = WalletId::from_slice(&keyspace.get_framed(&header_key(PARENTID_KEY))?)?;
        let wallet_id = WalletId::from_slice(&keyspace.get_framed(&header_key(WALLETID_KEY))?)?;

        let scheme_payload = keyspace.get_framed(&header_key(DERIVATIONSCHEME_KEY))?;
        let scheme = match DerivationScheme::deserialize(&scheme_payload)? {
            DerivationScheme::Legacy(scheme) => scheme,
            DerivationScheme::Multisig(_) => {
                return Err(Error::Corrupt("unexpected derivation scheme"));
            }
        };

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

        let root_payload = keyspace.get_framed(&header_key(ROOTASSET_KEY))?;
        let root = Arc::new(AssetEntry::deserialize_payload(
            ROOT_ASSET_INDEX,
            &root_payload,
        )?);
        root.as_single()?;

        // chain scan: a truncated tail is tolerated, mid-record frame
        // corruption is not
        let mut assets: BTreeMap<i32, Arc<AssetEntry>> = BTreeMap::new();
        for (key, value) in keyspace.scan_prefix(ASSETENTRY_PREFIX)? {
            match AssetEntry::deserialize(&key, &value) {
                Ok(entry) => {
                    assets.insert(entry.index(), Arc::new(entry));
                }
                Err(err @ Error::AssetDeserialize(_)) => {
                    warn!(?err, "asset decode failed, truncating chain scan");
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        debug!(wallet = %wallet_id, assets = assets.len(), "opened single wallet");

        Ok(Self {
            keyspace,
            network,
            wallet_id,
            parent_id,
            scheme,
            default_type,
            root,
            caches: Mutex::new(WalletCaches {
                assets,
                addresses: BTreeMap::new(),
            }),
            top_used_index: AtomicI32::new(top_used_index),
        })
    }

    /// Hand out the next unused address, extending the chain when the
    /// lookahead is exhausted.
    pub fn get_new_address(&self) -> Result<Arc<AddressEntry>> {
        // the counter bump commits before the caches are touched
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

    /// Append `count` assets after the current highest-index asset.
    pub fn extend_chain(&self, count: u32) -> Result<()> {
        let mut caches = self.caches.lock();
        if caches.assets.is_empty() {
            return Err(Error::Uninitialized);
        }
        self.extend_chain_locked(&mut caches, count)
    }

    fn extend_chain_locked(&self, caches: &mut WalletCaches, count: u32) -> Result<()> {
        let top = caches
            .assets
            .values()
            .next_back()
            .cloned()
            .unwrap_or_else(|| self.root.clone());
        self.extend_chain_inner(caches, &top, count)
    }

    /// Extend from an explicit first asset; indices already present are
    /// skipped, so re-running is a no-op.
    pub(crate) fn extend_chain_from(&self, first: &Arc<AssetEntry>, count: u32) -> Result<()> {
        let mut caches = self.caches.lock();
        self.extend_chain_inner(&mut caches, first, count)
    }

    fn extend_chain_inner(
        &self,
        caches: &mut WalletCaches,
        first: &Arc<AssetEntry>,
        count: u32,
    ) -> Result<()> {
        let derived = self.scheme.extend_chain(first.as_single()?, count)?;

        let mut batch = self.keyspace.batch();
        let mut fresh: Vec<Arc<AssetEntry>> = Vec::new();
        for asset in derived {
            if caches.assets.contains_key(&asset.index()) {
                continue;
            }
            batch.put_raw(&asset.db_key(), &asset.serialize())?;
            fresh.push(Arc::new(AssetEntry::Single(asset)));
        }
        // all new assets land together or not at all
        batch.commit()?;

        for asset in fresh {
            caches.assets.insert(asset.index(), asset);
        }
        Ok(())
    }

    /// Look up the asset at `index` in the in-memory map.
    pub fn get_asset_for_index(&self, index: i32) -> Result<Arc<AssetEntry>> {
        self.caches
            .lock()
            .assets
            .get(&index)
            .cloned()
            .ok_or(Error::AssetUnavailable)
    }

    /// Both compressed and uncompressed network-prefixed key hashes of
    /// every derived asset, for bulk scanning.
    pub fn get_addr_hash_vec(&self) -> Result<Vec<Vec<u8>>> {
        let caches = self.caches.lock();
        let mut hashes = Vec::with_capacity(caches.assets.len() * 2);
        for asset in caches.assets.values() {
            let single = asset.as_single()?;
            hashes.push(prefixed(
                self.network.p2pkh_prefix(),
                single.hash160_uncompressed(),
            ));
            hashes.push(prefixed(
                self.network.p2pkh_prefix(),
                single.hash160_compressed(),
            ));
        }
        Ok(hashes)
    }

    /// Network-prefixed uncompressed key hashes only.
    pub fn hash160_vec_uncompressed(&self) -> Result<Vec<Vec<u8>>> {
        let caches = self.caches.lock();
        caches
            .assets
            .values()
            .map(|asset| {
                Ok(prefixed(
                    self.network.p2pkh_prefix(),
                    asset.as_single()?.hash160_uncompressed(),
                ))
            })
            .collect()
    }

    /// Network-prefixed compressed key hashes only.
    pub fn hash160_vec_compressed(&self) -> Result<Vec<Vec<u8>>> {
        let caches = self.caches.lock();
        caches
            .assets
            .values()
            .map(|asset| {
                Ok(prefixed(
                    self.network.p2pkh_prefix(),
                    asset.as_single()?.hash160_compressed(),
                ))
            })
            .collect()
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

    /// The parent wallet id; equals the wallet id for top-level wallets.
    #[must_use]
    pub const fn parent_id(&self) -> WalletId {
        self.parent_id
    }

    /// The root asset at index `-1`.
    #[must_use]
    pub fn root(&self) -> &Arc<AssetEntry> {
        &self.root
    }

    /// The default address type new addresses render as.
    #[must_use]
    pub const fn default_type(&self) -> AddressType {
        self.default_type
    }

    /// The network addresses are materialized for.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Number of derived assets (the root is not counted).
    #[must_use]
    pub fn asset_count(&self) -> usize {
        self.caches.lock().assets.len()
    }

    /// The persisted top-used-index counter.
    #[must_use]
    pub fn top_used_index(&self) -> i32 {
        self.top_used_index.load(Ordering::Relaxed)
    }
}

fn prefixed(network_byte: u8, hash: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(hash.len() + 1);
    bytes.push(network_byte);
    bytes.extend_from_slice(hash);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::frame;
    use keel::base58check_encode;

    const SEED: [u8; 32] = [0x11; 32];

    fn create_wallet(dir: &Path, lookup: u32) -> SingleWallet {
        SingleWallet::create(dir, Network::Mainnet, AddressType::P2PKH, &SEED, lookup).unwrap()
    }

    fn wallet_path(dir: &Path) -> std::path::PathBuf {
        let (pubkey, _) = chain::public_key_pair(&SEED).unwrap();
        dir.join(wallet_file_name(&chain::single_wallet_id(&pubkey)))
    }

    #[test]
    fn test_create_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let created = create_wallet(dir.path(), 5);

        assert_eq!(created.asset_count(), 5);
        for index in 0..5 {
            assert_eq!(created.get_asset_for_index(index).unwrap().index(), index);
        }

        let (root_pubkey, _) = chain::public_key_pair(&SEED).unwrap();
        assert_eq!(
            created.root().as_single().unwrap().pubkey().uncompressed(),
            &root_pubkey
        );
        assert_eq!(created.wallet_id(), chain::single_wallet_id(&root_pubkey));

        let created_id = created.wallet_id();
        let asset0_before = created
            .get_asset_for_index(0)
            .unwrap()
            .as_single()
            .unwrap()
            .serialize();
        drop(created);

        let reopened = SingleWallet::open(&wallet_path(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(reopened.asset_count(), 5);
        assert_eq!(reopened.wallet_id(), created_id);
        assert_eq!(reopened.parent_id(), created_id);
        assert_eq!(reopened.default_type(), AddressType::P2PKH);

        // asset 0 survives the round trip byte for byte
        let asset0_after = reopened
            .get_asset_for_index(0)
            .unwrap()
            .as_single()
            .unwrap()
            .serialize();
        assert_eq!(asset0_before, asset0_after);
    }

    #[test]
    fn test_reopen_matches_in_process_derivation() {
        let dir = tempfile::tempdir().unwrap();
        create_wallet(dir.path(), 4);

        let reopened = SingleWallet::open(&wallet_path(dir.path()), Network::Mainnet).unwrap();

        let scheme = LegacyScheme::from_root(&SEED).unwrap();
        let root = reopened.root().as_single().unwrap();
        let expected = scheme.extend_chain(root, 4).unwrap();

        for asset in &expected {
            let stored = reopened.get_asset_for_index(asset.index()).unwrap();
            assert_eq!(
                stored.as_single().unwrap().pubkey(),
                asset.pubkey(),
                "index {}",
                asset.index()
            );
        }
    }

    #[test]
    fn test_new_addresses_are_sequential_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 5);

        for expected_index in 0..3 {
            let entry = wallet.get_new_address().unwrap();
            assert_eq!(entry.index(), expected_index);

            let asset = wallet.get_asset_for_index(expected_index).unwrap();
            let expected_addr = base58check_encode(
                &[Network::Mainnet.p2pkh_prefix()],
                asset.as_single().unwrap().hash160_uncompressed(),
            );
            assert_eq!(entry.address().unwrap(), expected_addr.as_bytes());
        }
        assert_eq!(wallet.top_used_index(), 3);
        drop(wallet);

        // the bump committed before the caches were touched
        let reopened = SingleWallet::open(&wallet_path(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(reopened.top_used_index(), 3);
    }

    #[test]
    fn test_lookahead_exhaustion_extends_chain() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), u32::MAX);
        assert_eq!(wallet.asset_count(), DERIVATION_LOOKUP as usize);

        for _ in 0..105 {
            wallet.get_new_address().unwrap();
        }

        assert!(wallet.asset_count() >= 105);
        assert_eq!(wallet.top_used_index(), 105);
    }

    #[test]
    fn test_extend_chain_appends_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 5);

        wallet.extend_chain(3).unwrap();
        assert_eq!(wallet.asset_count(), 8);
        drop(wallet);

        let reopened = SingleWallet::open(&wallet_path(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(reopened.asset_count(), 8);
    }

    #[test]
    fn test_extend_from_same_asset_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 5);

        let root = wallet.root().clone();
        wallet.extend_chain_from(&root, 5).unwrap();
        assert_eq!(wallet.asset_count(), 5);
    }

    #[test]
    fn test_split_extension_equals_whole() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let whole = create_wallet(dir_a.path(), 7);
        let split = create_wallet(dir_b.path(), 3);
        split.extend_chain(4).unwrap();

        assert_eq!(whole.asset_count(), split.asset_count());
        for index in 0..7 {
            assert_eq!(
                whole
                    .get_asset_for_index(index)
                    .unwrap()
                    .as_single()
                    .unwrap()
                    .serialize(),
                split
                    .get_asset_for_index(index)
                    .unwrap()
                    .as_single()
                    .unwrap()
                    .serialize()
            );
        }
    }

    #[test]
    fn test_empty_wallet_is_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 0);

        assert!(matches!(
            wallet.get_new_address().unwrap_err(),
            Error::Uninitialized
        ));
        assert!(matches!(
            wallet.extend_chain(1).unwrap_err(),
            Error::Uninitialized
        ));
    }

    #[test]
    fn test_addr_hash_vec_has_both_encodings() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 3);

        let hashes = wallet.get_addr_hash_vec().unwrap();
        assert_eq!(hashes.len(), 6);
        for hash in &hashes {
            assert_eq!(hash.len(), 21);
            assert_eq!(hash[0], Network::Mainnet.p2pkh_prefix());
        }

        assert_eq!(wallet.hash160_vec_uncompressed().unwrap().len(), 3);
        assert_eq!(wallet.hash160_vec_compressed().unwrap().len(), 3);
    }

    #[test]
    fn test_scan_stops_at_first_bad_asset() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 5);

        // well-framed record whose payload is not a decodable asset
        let key = wallet.get_asset_for_index(2).unwrap();
        let mut batch = wallet.keyspace.batch();
        batch
            .put_raw(
                &key.as_single().unwrap().db_key(),
                &frame(&[0x01, 0x03, 0x7f, 0x00, 0x00]),
            )
            .unwrap();
        batch.commit().unwrap();
        drop(wallet);

        let reopened = SingleWallet::open(&wallet_path(dir.path()), Network::Mainnet).unwrap();
        assert_eq!(reopened.asset_count(), 2);
        assert!(reopened.get_asset_for_index(0).is_ok());
        assert!(reopened.get_asset_for_index(2).is_err());
    }

    #[test]
    fn test_broken_frame_is_fatal_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = create_wallet(dir.path(), 5);

        let key = wallet.get_asset_for_index(1).unwrap();
        let mut batch = wallet.keyspace.batch();
        // declared length exceeds the payload
        batch
            .put_raw(&key.as_single().unwrap().db_key(), &[0x20, 0x01, 0x02])
            .unwrap();
        batch.commit().unwrap();
        drop(wallet);

        let err = SingleWallet::open(&wallet_path(dir.path()), Network::Mainnet).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
