use super::{AddressRecord, AddressRegistry, RegistryLease};
use crate::errors::StoreError;
use std::sync::Arc;

/// Persists sealed address records through the registry, off the async executor.
#[derive(Debug)]
pub struct SecretStore<R> {
    registry: Arc<R>,
}

impl<R: AddressRegistry> SecretStore<R> {
    pub const fn new(registry: Arc<R>) -> Self {
        Self { registry }
    }

    pub fn lease(&self) -> Result<RegistryLease, StoreError> {
        self.registry.lease()
    }

    /// Write `record` under `lease`. The lease is released once the write returns.
    pub async fn persist(
        &self,
        lease: RegistryLease,
        record: AddressRecord,
    ) -> Result<(), StoreError> {
        let registry = Arc::clone(&self.registry);
        let address = record.address.clone();
        tokio::task::spawn_blocking(move || {
            let res = registry.add_addresses(&lease, vec![record]);
            drop(lease);
            res
        })
        .await
        .map_err(|e| StoreError::Io(format!("persist task: {e}")))??;
        tracing::info!(address = %address, "address record persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::guard::memory::MemoryRegistry;

    #[tokio::test]
    async fn persist_forwards_one_record() -> eyre::Result<()> {
        let reg = Arc::new(MemoryRegistry::default());
        let store = SecretStore::new(Arc::clone(&reg));
        store.persist(store.lease()?, AddressRecord::for_test("1addr")).await?;
        assert_eq!(reg.add_calls(), 1);
        assert_eq!(reg.private_key_addresses(), vec!["1addr".to_owned()]);
        Ok(())
    }

    #[tokio::test]
    async fn registry_errors_surface_unchanged() {
        let reg = Arc::new(MemoryRegistry::failing(StoreError::Io("disk full".into())));
        let store = SecretStore::new(reg);
        let res = store
            .persist(RegistryLease::unlocked(), AddressRecord::for_test("1addr"))
            .await;
        assert_eq!(res, Err(StoreError::Io("disk full".into())));
    }
}
