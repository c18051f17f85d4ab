//! Keyed record store backing the wallet files.
//!
//! One RocksDB database per top-level wallet. Multisig wallets keep their
//! sub-wallets in named column families within the same database; the
//! parent header lives in the default column family. Every value is
//! framed `var_int(len) || payload` and writes are committed through a
//! single atomic batch.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use crate::codec::{frame, unframe};
use crate::types::WalletId;
use crate::{Error, Result};

type Db = DBWithThreadMode<MultiThreaded>;

pub(crate) const DEFAULT_KEYSPACE: &str = "default";

/// Store file name for a top-level wallet.
#[must_use]
pub(crate) fn wallet_file_name(id: &WalletId) -> String {
    format!("armory_{id}_wallet.lmdb")
}

/// Column family name of multisig sub-wallet `index`.
#[must_use]
pub(crate) fn subwallet_keyspace_name(index: u32) -> String {
    format!("Subwallet-{index}")
}

/// Little-endian store key for a 32-bit header tag.
#[must_use]
pub(crate) fn header_key(tag: u32) -> [u8; 4] {
    tag.to_le_bytes()
}

/// An open wallet database.
pub(crate) struct WalletDb {
    db: Db,
}

impl WalletDb {
    /// Create a database sized for `sub_databases` named sub-wallet
    /// keyspaces in addition to the default one.
    pub(crate) fn create(path: &Path, sub_databases: u32) -> Result<Arc<Self>> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let mut descriptors = vec![ColumnFamilyDescriptor::new(
            DEFAULT_KEYSPACE,
            Options::default(),
        )];
        for index in 0..sub_databases {
            descriptors.push(ColumnFamilyDescriptor::new(
                subwallet_keyspace_name(index),
                Options::default(),
            ));
        }

        let db = Db::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(Arc::new(Self { db }))
    }

    /// Open an existing database, discovering its keyspaces.
    pub(crate) fn open(path: &Path) -> Result<Arc<Self>> {
        let names = Db::list_cf(&Options::default(), path)?;
        let descriptors: Vec<ColumnFamilyDescriptor> = names
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let opts = Options::default();
        let db = Db::open_cf_descriptors(&opts, path, descriptors)?;
        Ok(Arc::new(Self { db }))
    }

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or(Error::Corrupt("missing wallet sub-database"))
    }
}

impl std::fmt::Debug for WalletDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletDb").finish_non_exhaustive()
    }
}

/// One wallet's view into the database: the default keyspace for a
/// top-level wallet, a named one for a multisig sub-wallet.
#[derive(Clone, Debug)]
pub(crate) struct Keyspace {
    db: Arc<WalletDb>,
    name: String,
}

impl Keyspace {
    pub(crate) fn new(db: Arc<WalletDb>, name: String) -> Self {
        Self { db, name }
    }

    /// Point read of a raw value.
    pub(crate) fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.db.cf(&self.name)?;
        Ok(self.db.db.get_cf(&cf, key)?)
    }

    /// Point read of a framed record, validating and stripping the
    /// length envelope. A missing record is a corruption error.
    pub(crate) fn get_framed(&self, key: &[u8]) -> Result<Vec<u8>> {
        let value = self
            .get_raw(key)?
            .ok_or(Error::Corrupt("missing wallet record"))?;
        Ok(unframe(&value)?.to_vec())
    }

    /// All records whose key starts with `prefix`, in key order.
    pub(crate) fn scan_prefix(&self, prefix: u8) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.db.cf(&self.name)?;
        let iter = self
            .db
            .db
            .iterator_cf(&cf, IteratorMode::From(&[prefix], Direction::Forward));

        let mut records = Vec::new();
        for entry in iter {
            let (key, value) = entry?;
            if key.first() != Some(&prefix) {
                break;
            }
            records.push((key.to_vec(), value.to_vec()));
        }
        Ok(records)
    }

    /// Start an atomic write batch against this keyspace.
    pub(crate) fn batch(&self) -> RecordBatch<'_> {
        RecordBatch {
            keyspace: self,
            inner: WriteBatch::default(),
        }
    }
}

/// A pending atomic write: every record lands together or not at all.
pub(crate) struct RecordBatch<'a> {
    keyspace: &'a Keyspace,
    inner: WriteBatch,
}

impl RecordBatch<'_> {
    /// Queue a pre-framed value.
    pub(crate) fn put_raw(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.keyspace.db.cf(&self.keyspace.name)?;
        self.inner.put_cf(&cf, key, value);
        Ok(())
    }

    /// Queue a payload under the standard length envelope.
    pub(crate) fn put_framed(&mut self, key: &[u8], payload: &[u8]) -> Result<()> {
        self.put_raw(key, &frame(payload))
    }

    /// Commit the batch.
    pub(crate) fn commit(self) -> Result<()> {
        self.keyspace.db.db.write(self.inner)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_keyspace() -> (tempfile::TempDir, Keyspace) {
        let dir = tempfile::tempdir().unwrap();
        let db = WalletDb::create(&dir.path().join("db"), 0).unwrap();
        (dir, Keyspace::new(db, DEFAULT_KEYSPACE.to_string()))
    }

    #[test]
    fn test_framed_roundtrip() {
        let (_dir, keyspace) = temp_keyspace();

        let mut batch = keyspace.batch();
        batch.put_framed(b"key", b"payload").unwrap();
        batch.commit().unwrap();

        assert_eq!(keyspace.get_framed(b"key").unwrap(), b"payload");
    }

    #[test]
    fn test_missing_record_is_corrupt() {
        let (_dir, keyspace) = temp_keyspace();
        assert!(matches!(
            keyspace.get_framed(b"absent").unwrap_err(),
            Error::Corrupt(_)
        ));
    }

    #[test]
    fn test_frame_mismatch_is_corrupt() {
        let (_dir, keyspace) = temp_keyspace();

        let mut batch = keyspace.batch();
        batch.put_raw(b"bad", &[5, 1, 2]).unwrap();
        batch.commit().unwrap();

        assert!(matches!(
            keyspace.get_framed(b"bad").unwrap_err(),
            Error::Corrupt(_)
        ));
    }

    #[test]
    fn test_scan_prefix_bounds() {
        let (_dir, keyspace) = temp_keyspace();

        let mut batch = keyspace.batch();
        batch.put_raw(&[0x01, 0x00], b"header").unwrap();
        batch.put_raw(&[0xaa, 0x01], b"a").unwrap();
        batch.put_raw(&[0xaa, 0x02], b"b").unwrap();
        batch.put_raw(&[0xab], b"past").unwrap();
        batch.commit().unwrap();

        let records = keyspace.scan_prefix(0xaa).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].0, vec![0xaa, 0x01]);
        assert_eq!(records[1].0, vec![0xaa, 0x02]);
    }

    #[test]
    fn test_subwallet_keyspaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = WalletDb::create(&path, 2).unwrap();
            let sub0 = Keyspace::new(db.clone(), subwallet_keyspace_name(0));
            let mut batch = sub0.batch();
            batch.put_framed(b"k", b"sub0").unwrap();
            batch.commit().unwrap();
        }

        let db = WalletDb::open(&path).unwrap();
        let sub0 = Keyspace::new(db.clone(), subwallet_keyspace_name(0));
        let sub1 = Keyspace::new(db.clone(), subwallet_keyspace_name(1));
        let top = Keyspace::new(db, DEFAULT_KEYSPACE.to_string());

        assert_eq!(sub0.get_framed(b"k").unwrap(), b"sub0");
        assert!(sub1.get_raw(b"k").unwrap().is_none());
        assert!(top.get_raw(b"k").unwrap().is_none());
    }

    #[test]
    fn test_wallet_file_name() {
        let id = WalletId::new([0xab; 20]);
        assert_eq!(
            wallet_file_name(&id),
            format!("armory_{}_wallet.lmdb", "ab".repeat(20))
        );
    }
}
