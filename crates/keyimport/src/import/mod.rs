//! The private-key import workflow.
//!
//! [`ImportCoordinator`] drives one attempt at a time through decode, optional address
//! classification, passphrase entry, sealing, duplicate checks and persistence, and reports a
//! single terminal [`ImportEvent`] per attempt.

pub mod classifier;
pub mod coordinator;
pub mod decoder;
pub mod guard;
pub mod passphrase;
pub mod secret_store;

pub use classifier::{AddressClassifier, HttpClassifier};
pub use coordinator::{
    ImportContext, ImportCoordinator, ImportEvent, ImportSurface, ProgressKind, Step, Submission,
};
pub use decoder::{DecodedKey, KeyDecoder};
pub use guard::{AddressRegistry, RegistryLease};
pub use passphrase::Passphrase;

use crate::keystore::crypto::SealedKey;
use serde::{Deserialize, Serialize};

/// A private-key-backed address as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: String,
    pub address: String,
    pub public_key_hex: String,
    pub encrypted: SealedKey,
    pub imported_at: String,
}

impl AddressRecord {
    pub fn new(key: &DecodedKey, encrypted: SealedKey) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            address: key.address().to_owned(),
            public_key_hex: hex::encode(key.public_key_bytes()),
            encrypted,
            imported_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(address: &str) -> Self {
        use crate::keystore::crypto::CryptoBox;
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            address: address.to_owned(),
            public_key_hex: String::new(),
            encrypted: SealedKey {
                v: crate::keystore::crypto::SEALED_KEY_VERSION,
                kdf: crate::config::KdfConfig::default(),
                salt_b64: String::new(),
                sealed: CryptoBox {
                    nonce_b64: String::new(),
                    ct_b64: String::new(),
                },
            },
            imported_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
