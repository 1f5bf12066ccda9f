use super::AddressRecord;
use crate::errors::StoreError;
use std::{
    fs::File,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// The shared set of known addresses, split into watch-only and private-key-backed entries.
///
/// Reads are point-in-time snapshots; `add_addresses` must enforce uniqueness on its own.
pub trait AddressRegistry: Send + Sync + 'static {
    fn contains_watch_only(&self, address: &str) -> bool;

    fn contains_private_key(&self, address: &str) -> bool;

    /// Append `records`. `lease` must come from this registry's [`AddressRegistry::lease`].
    fn add_addresses(
        &self,
        lease: &RegistryLease,
        records: Vec<AddressRecord>,
    ) -> Result<(), StoreError>;

    /// Exclusive write access for the duration of one import pipeline.
    fn lease(&self) -> Result<RegistryLease, StoreError> {
        Ok(RegistryLease::unlocked())
    }
}

/// Held for the lifetime of an import pipeline; releases the registry lock on drop.
#[derive(Debug)]
pub struct RegistryLease {
    lock: Option<File>,
    held: Option<Arc<AtomicBool>>,
}

impl RegistryLease {
    pub const fn unlocked() -> Self {
        Self {
            lock: None,
            held: None,
        }
    }

    /// `held` is cleared when the lease is dropped.
    pub const fn locked(file: File, held: Arc<AtomicBool>) -> Self {
        Self {
            lock: Some(file),
            held: Some(held),
        }
    }

    pub const fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Whether this lease was issued against `held`.
    pub fn is_held_by(&self, held: &Arc<AtomicBool>) -> bool {
        self.lock.is_some() && self.held.as_ref().is_some_and(|h| Arc::ptr_eq(h, held))
    }
}

impl Drop for RegistryLease {
    fn drop(&mut self) {
        if let Some(f) = self.lock.take() {
            if let Err(e) = fs2::FileExt::unlock(&f) {
                tracing::warn!(error = %e, "release registry lock");
            }
        }
        if let Some(held) = self.held.take() {
            held.store(false, Ordering::Release);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateStatus {
    Unique,
    WatchOnlyConflict,
    PrivateKeyConflict,
}

#[derive(Debug)]
pub struct DuplicateGuard<R> {
    registry: Arc<R>,
}

impl<R: AddressRegistry> DuplicateGuard<R> {
    pub const fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }

    /// Watch-only membership wins when an address somehow appears in both sets.
    pub fn check(&self, address: &str) -> DuplicateStatus {
        if self.registry.contains_watch_only(address) {
            DuplicateStatus::WatchOnlyConflict
        } else if self.registry.contains_private_key(address) {
            DuplicateStatus::PrivateKeyConflict
        } else {
            DuplicateStatus::Unique
        }
    }
}
