pub mod crypto;

use crate::{
    config::NetworkMode,
    errors::StoreError,
    import::{AddressRecord, AddressRegistry, Passphrase, RegistryLease},
    paths::KeyImportPaths,
};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use eyre::Context as _;
use fs2::FileExt as _;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fs::{self, File},
    path::Path,
    str::FromStr as _,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchOnlyEntry {
    pub address: String,
    pub added_at: String,
}

/// On-disk layout of `addresses/index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressIndex {
    pub watch_only: Vec<WatchOnlyEntry>,
    pub private_keys: Vec<AddressRecord>,
}

impl AddressIndex {
    fn has_watch_only(&self, address: &str) -> bool {
        self.watch_only.iter().any(|w| w.address == address)
    }

    fn has_private_key(&self, address: &str) -> bool {
        self.private_keys.iter().any(|r| r.address == address)
    }

    fn contains(&self, address: &str) -> bool {
        self.has_watch_only(address) || self.has_private_key(address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    WatchOnly,
    PrivateKey,
}

/// A registry entry without any key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnownAddress {
    pub address: String,
    pub kind: AddressKind,
    pub since: String,
}

fn load_index(path: &Path) -> eyre::Result<AddressIndex> {
    if !path.exists() {
        return Ok(AddressIndex::default());
    }
    let s = fs::read_to_string(path).context("read address index")?;
    serde_json::from_str(&s).context("parse address index")
}

fn save_index(path: &Path, index: &AddressIndex) -> eyre::Result<()> {
    let s = serde_json::to_string_pretty(index).context("serialize address index")?;
    crate::fsutil::write_atomic_private(path, s.as_bytes()).context("write address index")
}

/// File-backed address registry shared by every `keyimport` process on the machine.
///
/// Reads are served from an in-memory snapshot that is refreshed whenever a lease is taken.
/// Writes re-read the index under the exclusive registry lock and refuse duplicates.
#[derive(Debug)]
pub struct Keystore {
    paths: KeyImportPaths,
    snapshot: RwLock<AddressIndex>,
    lease_held: Arc<AtomicBool>,
}

impl Keystore {
    pub fn open(paths: KeyImportPaths) -> eyre::Result<Self> {
        paths.ensure_private_dirs()?;
        let index = load_index(&paths.address_index())?;
        Ok(Self {
            paths,
            snapshot: RwLock::new(index),
            lease_held: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Exclusive lock across processes. Fails fast instead of waiting on another writer.
    fn acquire_write_lock(&self) -> Result<File, StoreError> {
        let f = crate::fsutil::open_private(&self.paths.registry_lock())
            .map_err(|e| StoreError::io(&e))?;
        match f.try_lock_exclusive() {
            Ok(()) => Ok(f),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(StoreError::Busy),
            Err(e) => Err(StoreError::Io(format!("lock exclusive: {e}"))),
        }
    }

    fn reload(&self) -> Result<AddressIndex, StoreError> {
        let index = load_index(&self.paths.address_index()).map_err(|e| StoreError::io(&e))?;
        if let Ok(mut snap) = self.snapshot.write() {
            snap.clone_from(&index);
        }
        Ok(index)
    }

    fn commit(&self, index: AddressIndex) -> Result<(), StoreError> {
        save_index(&self.paths.address_index(), &index).map_err(|e| StoreError::io(&e))?;
        if let Ok(mut snap) = self.snapshot.write() {
            *snap = index;
        }
        Ok(())
    }

    /// Register `address` as watch-only. It must be a valid address for `network` and unknown
    /// to both sets.
    pub fn add_watch_only(&self, address: &str, network: NetworkMode) -> eyre::Result<String> {
        let address = bitcoin::Address::from_str(address.trim())
            .context("parse address")?
            .require_network(network.network())
            .context("address does not belong to the configured network")?
            .to_string();

        let _lease = self.lease()?;
        let mut index = self.reload()?;
        if index.contains(&address) {
            return Err(StoreError::Duplicate(address).into());
        }
        index.watch_only.push(WatchOnlyEntry {
            address: address.clone(),
            added_at: chrono::Utc::now().to_rfc3339(),
        });
        self.commit(index)?;
        tracing::info!(address = %address, "watch-only address added");
        Ok(address)
    }

    pub fn list(&self) -> eyre::Result<Vec<KnownAddress>> {
        let index = self.reload()?;
        let watch = index.watch_only.into_iter().map(|w| KnownAddress {
            address: w.address,
            kind: AddressKind::WatchOnly,
            since: w.added_at,
        });
        let keys = index.private_keys.into_iter().map(|r| KnownAddress {
            address: r.address,
            kind: AddressKind::PrivateKey,
            since: r.imported_at,
        });
        Ok(watch.chain(keys).collect())
    }

    /// Whether `passphrase` opens the key stored for `address` and the opened scalar still
    /// matches the recorded public key. The passphrase is wiped before returning.
    pub fn check_passphrase(
        &self,
        address: &str,
        passphrase: &mut Passphrase,
    ) -> eyre::Result<bool> {
        let index = self.reload()?;
        let record = index
            .private_keys
            .iter()
            .find(|r| r.address == address)
            .ok_or_else(|| eyre::eyre!("no private key stored for {address}"))?;

        let opened = passphrase
            .expose()
            .map(|p| crypto::open_private_key(p, address, &record.encrypted));
        passphrase.wipe();
        let Some(Ok(secret)) = opened else {
            return Ok(false);
        };

        let mut sk = SecretKey::from_slice(&secret).context("stored key is not a valid scalar")?;
        let pk = bitcoin::PublicKey::new(sk.public_key(&Secp256k1::new()));
        sk.non_secure_erase();
        Ok(hex::encode(pk.to_bytes()) == record.public_key_hex)
    }
}

impl AddressRegistry for Keystore {
    fn contains_watch_only(&self, address: &str) -> bool {
        self.snapshot
            .read()
            .is_ok_and(|i| i.has_watch_only(address))
    }

    fn contains_private_key(&self, address: &str) -> bool {
        self.snapshot
            .read()
            .is_ok_and(|i| i.has_private_key(address))
    }

    fn add_addresses(
        &self,
        lease: &RegistryLease,
        records: Vec<AddressRecord>,
    ) -> Result<(), StoreError> {
        if !lease.is_held_by(&self.lease_held) {
            return Err(StoreError::NotLeased);
        }

        let mut index = self.reload()?;
        let mut batch = HashSet::new();
        for r in &records {
            if index.contains(&r.address) || !batch.insert(r.address.as_str()) {
                return Err(StoreError::Duplicate(r.address.clone()));
            }
        }
        let added = records.len();
        index.private_keys.extend(records);
        self.commit(index)?;
        tracing::debug!(added, "address index updated");
        Ok(())
    }

    fn lease(&self) -> Result<RegistryLease, StoreError> {
        if self
            .lease_held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StoreError::Busy);
        }
        let lock = match self.acquire_write_lock() {
            Ok(f) => f,
            Err(e) => {
                self.lease_held.store(false, Ordering::Release);
                return Err(e);
            }
        };
        let lease = RegistryLease::locked(lock, Arc::clone(&self.lease_held));
        self.reload()?;
        Ok(lease)
    }
}
