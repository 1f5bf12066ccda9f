use crate::{config::KdfConfig, errors::DecryptionError, import::Passphrase};
use aes_gcm::{
    aead::{Aead as _, KeyInit as _},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use eyre::Context as _;
use hkdf::Hkdf;
use rand::Rng as _;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

pub const SEALED_KEY_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptoBox {
    pub nonce_b64: String,
    pub ct_b64: String,
}

/// A private key encrypted for storage under a passphrase-derived key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    pub v: u8,
    pub kdf: KdfConfig,
    pub salt_b64: String,
    #[serde(flatten)]
    pub sealed: CryptoBox,
}

fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0_u8; N];
    rand::rng().fill_bytes(&mut out);
    out
}

pub fn derive_passphrase_key(
    passphrase: &[u8],
    salt16: &[u8; 16],
    kdf: &KdfConfig,
) -> eyre::Result<Zeroizing<[u8; 32]>> {
    if !kdf.within_limits() {
        eyre::bail!(
            "kdf parameters out of range: memory_kib={} iterations={} parallelism={}",
            kdf.memory_kib,
            kdf.iterations,
            kdf.parallelism
        );
    }
    let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(32))
        .map_err(|e| eyre::eyre!("argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut out = Zeroizing::new([0_u8; 32]);
    argon2
        .hash_password_into(passphrase, salt16, out.as_mut_slice())
        .map_err(|e| eyre::eyre!("argon2 hash: {e}"))?;
    Ok(out)
}

/// Bind the passphrase key to one address so sealed blobs cannot be swapped between records.
pub fn derive_subkey(
    master: &[u8; 32],
    address: &str,
    purpose: &str,
) -> eyre::Result<Zeroizing<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let info = format!("keyimport:{address}:{purpose}");
    let mut out = Zeroizing::new([0_u8; 32]);
    hk.expand(info.as_bytes(), out.as_mut_slice())
        .map_err(|e| eyre::eyre!("hkdf expand: {e}"))?;
    Ok(out)
}

pub fn encrypt_aes_gcm(key32: &[u8; 32], plaintext: &[u8]) -> eyre::Result<CryptoBox> {
    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    let nonce: [u8; 12] = random_array();
    let ct = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| eyre::eyre!("aes encrypt: {e}"))?;

    Ok(CryptoBox {
        nonce_b64: B64.encode(nonce),
        ct_b64: B64.encode(ct),
    })
}

pub fn decrypt_aes_gcm(key32: &[u8; 32], b: &CryptoBox) -> eyre::Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key32).context("aes init")?;
    let nonce = B64
        .decode(&b.nonce_b64)
        .context("decode nonce")?;
    if nonce.len() != 12 {
        eyre::bail!("invalid nonce length");
    }
    let ct = B64
        .decode(&b.ct_b64)
        .context("decode ciphertext")?;

    let pt = cipher
        .decrypt(Nonce::from_slice(&nonce), ct.as_ref())
        .map_err(|e| eyre::eyre!("aes decrypt: {e}"))?;
    Ok(Zeroizing::new(pt))
}

const PRIVATE_KEY_PURPOSE: &str = "private_key";

/// Seal `secret` for `address` under `passphrase`.
///
/// The passphrase is wiped as soon as the Argon2 derivation returns, whatever the result.
/// `verify` receives the freshly reopened plaintext and must confirm it is the same key.
pub fn seal_private_key(
    passphrase: &mut Passphrase,
    kdf: &KdfConfig,
    address: &str,
    secret: &[u8],
    verify: impl FnOnce(&[u8]) -> bool,
) -> Result<SealedKey, DecryptionError> {
    let salt: [u8; 16] = random_array();
    let Some(base) = passphrase
        .expose()
        .filter(|p| !p.is_empty())
        .map(|p| derive_passphrase_key(p, &salt, kdf))
    else {
        passphrase.wipe();
        return Err(DecryptionError::EmptyPassphrase);
    };
    passphrase.wipe();
    let base = base.map_err(|e| DecryptionError::KeyDerivation(format!("{e:#}")))?;

    let key = derive_subkey(&base, address, PRIVATE_KEY_PURPOSE)
        .map_err(|e| DecryptionError::KeyDerivation(format!("{e:#}")))?;
    let sealed =
        encrypt_aes_gcm(&key, secret).map_err(|e| DecryptionError::Seal(format!("{e:#}")))?;

    let reopened =
        decrypt_aes_gcm(&key, &sealed).map_err(|e| DecryptionError::Seal(format!("{e:#}")))?;
    if !verify(reopened.as_slice()) {
        return Err(DecryptionError::Mismatch);
    }

    Ok(SealedKey {
        v: SEALED_KEY_VERSION,
        kdf: *kdf,
        salt_b64: B64.encode(salt),
        sealed,
    })
}

/// Recover the secret sealed by [`seal_private_key`].
pub fn open_private_key(
    passphrase: &[u8],
    address: &str,
    sealed: &SealedKey,
) -> eyre::Result<Zeroizing<Vec<u8>>> {
    if sealed.v != SEALED_KEY_VERSION {
        eyre::bail!("unsupported sealed key version: {}", sealed.v);
    }
    let salt = B64
        .decode(&sealed.salt_b64)
        .context("decode salt")?;
    let salt: [u8; 16] = salt
        .as_slice()
        .try_into()
        .map_err(|e| eyre::eyre!("salt must decode to 16 bytes: {e}"))?;
    let base = derive_passphrase_key(passphrase, &salt, &sealed.kdf)?;
    let key = derive_subkey(&base, address, PRIVATE_KEY_PURPOSE)?;
    decrypt_aes_gcm(&key, &sealed.sealed)
}

#[cfg(test)]
pub(crate) const TEST_KDF: KdfConfig = KdfConfig {
    memory_kib: 8,
    iterations: 1,
    parallelism: 1,
};

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::ContextCompat as _;

    const ADDR: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";

    #[test]
    fn aes_gcm_wrong_key_fails() -> eyre::Result<()> {
        let key = [7_u8; 32];
        let boxv = encrypt_aes_gcm(&key, b"test plaintext").context("encrypt")?;
        let err = decrypt_aes_gcm(&[8_u8; 32], &boxv)
            .err()
            .context("wrong key must fail")?;
        assert!(err.to_string().contains("aes decrypt"));
        Ok(())
    }

    #[test]
    fn sealed_key_opens_with_the_same_passphrase_only() -> eyre::Result<()> {
        let secret = [0x11_u8; 32];
        let mut pass = Passphrase::from_bytes(b"correct-pass");
        let receipt = pass.receipt();
        let sealed = seal_private_key(&mut pass, &TEST_KDF, ADDR, &secret, |pt| pt == secret)?;
        assert!(receipt.is_erased());
        assert!(pass.expose().is_none());

        let opened = open_private_key(b"correct-pass", ADDR, &sealed)?;
        assert_eq!(opened.as_slice(), &secret);
        assert!(open_private_key(b"wrong-pass", ADDR, &sealed).is_err());
        // Subkey is bound to the address.
        assert!(open_private_key(b"correct-pass", "1other", &sealed).is_err());
        Ok(())
    }

    #[test]
    fn empty_passphrase_is_rejected_and_wiped() {
        let mut pass = Passphrase::from_bytes(b"");
        let receipt = pass.receipt();
        let res = seal_private_key(&mut pass, &TEST_KDF, ADDR, &[1_u8; 32], |_| true);
        assert_eq!(res.err(), Some(DecryptionError::EmptyPassphrase));
        assert_eq!(receipt.wipe_count(), 1);
    }

    #[test]
    fn bad_kdf_params_still_wipe_passphrase() {
        let bad = KdfConfig {
            memory_kib: 0,
            iterations: 0,
            parallelism: 0,
        };
        let mut pass = Passphrase::from_bytes(b"correct-pass");
        let receipt = pass.receipt();
        let res = seal_private_key(&mut pass, &bad, ADDR, &[1_u8; 32], |_| true);
        assert!(matches!(res, Err(DecryptionError::KeyDerivation(_))));
        assert!(receipt.is_erased());
    }

    #[test]
    fn tampered_kdf_costs_are_refused_before_derivation() -> eyre::Result<()> {
        let mut pass = Passphrase::from_bytes(b"correct-pass");
        let mut sealed = seal_private_key(&mut pass, &TEST_KDF, ADDR, &[3_u8; 32], |_| true)?;
        sealed.kdf.memory_kib = u32::MAX;
        let err = open_private_key(b"correct-pass", ADDR, &sealed)
            .err()
            .context("oversized memory cost must be refused")?;
        assert!(format!("{err:#}").contains("out of range"));

        sealed.kdf = KdfConfig {
            iterations: u32::MAX,
            ..TEST_KDF
        };
        assert!(open_private_key(b"correct-pass", ADDR, &sealed).is_err());
        Ok(())
    }

    #[test]
    fn verification_failure_is_a_mismatch() {
        let mut pass = Passphrase::from_bytes(b"correct-pass");
        let res = seal_private_key(&mut pass, &TEST_KDF, ADDR, &[1_u8; 32], |_| false);
        assert_eq!(res.err(), Some(DecryptionError::Mismatch));
    }

    #[test]
    fn sealed_key_json_is_flat() -> eyre::Result<()> {
        let mut pass = Passphrase::from_bytes(b"p");
        let sealed = seal_private_key(&mut pass, &TEST_KDF, ADDR, &[2_u8; 32], |_| true)?;
        let v = serde_json::to_value(&sealed)?;
        assert!(v.get("nonce_b64").is_some());
        assert!(v.get("salt_b64").is_some());
        let back: SealedKey = serde_json::from_value(v)?;
        assert_eq!(back, sealed);
        Ok(())
    }
}
