//! The operator passphrase protecting an imported key at rest.
//!
//! A [`Passphrase`] is consumed by exactly one sealing step and wiped right after. Wiping
//! happens in place (the backing buffer keeps its length and is overwritten with zeros), and
//! `Drop` wipes as well, so early returns, errors and unwinding all end with cleared memory.

use secrecy::{ExposeSecret as _, ExposeSecretMut as _, SecretBox};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use zeroize::Zeroize as _;

#[derive(Debug, Default)]
struct ErasureState {
    wipes: AtomicUsize,
    cleared: AtomicBool,
}

/// Observes whether a passphrase has been wiped, without holding any secret material.
#[derive(Debug, Clone)]
pub struct ErasureReceipt(Arc<ErasureState>);

impl ErasureReceipt {
    /// True once the backing buffer was overwritten and verified to be all zeros.
    pub fn is_erased(&self) -> bool {
        self.0.cleared.load(Ordering::Acquire)
    }

    pub fn wipe_count(&self) -> usize {
        self.0.wipes.load(Ordering::Acquire)
    }
}

pub struct Passphrase {
    secret: SecretBox<[u8]>,
    erasure: Arc<ErasureState>,
    wiped: bool,
}

impl Passphrase {
    /// Copy `bytes` into a fresh secret buffer. Callers keep ownership of (and should zeroize)
    /// the source.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            secret: SecretBox::new(Box::<[u8]>::from(bytes)),
            erasure: Arc::new(ErasureState::default()),
            wiped: false,
        }
    }

    pub fn receipt(&self) -> ErasureReceipt {
        ErasureReceipt(Arc::clone(&self.erasure))
    }

    /// Borrow the plaintext. Returns `None` after [`Passphrase::wipe`].
    pub(crate) fn expose(&self) -> Option<&[u8]> {
        (!self.wiped).then(|| self.secret.expose_secret())
    }

    /// Overwrite the plaintext with zeros. Idempotent; only the first call counts.
    pub fn wipe(&mut self) {
        if self.wiped {
            return;
        }
        self.secret.expose_secret_mut().zeroize();
        self.wiped = true;
        let cleared = self.secret.expose_secret().iter().all(|b| *b == 0);
        self.erasure.cleared.store(cleared, Ordering::Release);
        self.erasure.wipes.fetch_add(1, Ordering::AcqRel);
    }
}

impl Drop for Passphrase {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Passphrase")
            .field("len", &self.secret.expose_secret().len())
            .field("wiped", &self.wiped)
            .finish_non_exhaustive()
    }
}
