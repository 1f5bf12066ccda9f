use crate::{config::NetworkMode, errors::FormatError};
use bitcoin::{
    secp256k1::{self, Secp256k1, SecretKey},
    Address, PrivateKey, PublicKey,
};
use zeroize::Zeroizing;

/// Base58 payload: version byte, 32-byte scalar, optional compression flag, 4-byte checksum.
const PAYLOAD_LEN_UNCOMPRESSED: usize = 37;
const PAYLOAD_LEN_COMPRESSED: usize = 38;

/// A WIF private key after decoding. Immutable; the secret scalar is zeroized on drop.
pub struct DecodedKey {
    public_key: PublicKey,
    address: String,
    secret: Zeroizing<[u8; 32]>,
}

impl DecodedKey {
    /// P2PKH address derived from the public key.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key.to_bytes()
    }

    pub const fn is_compressed(&self) -> bool {
        self.public_key.compressed
    }

    pub(crate) fn secret_bytes(&self) -> &[u8] {
        self.secret.as_slice()
    }

    /// Whether `candidate` is the secret scalar behind this key's public point.
    pub fn matches_secret(&self, candidate: &[u8]) -> bool {
        let Ok(sk) = SecretKey::from_slice(candidate) else {
            return false;
        };
        let secp = Secp256k1::new();
        secp256k1::PublicKey::from_secret_key(&secp, &sk) == self.public_key.inner
    }
}

impl std::fmt::Debug for DecodedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedKey")
            .field("address", &self.address)
            .field("compressed", &self.public_key.compressed)
            .finish_non_exhaustive()
    }
}

/// WIF prefix + length for the configured network, checked before any Base58 work.
fn has_wif_shape(raw: &str, network: NetworkMode) -> bool {
    let Some(first) = raw.chars().next() else {
        return false;
    };
    match (network, raw.len()) {
        (NetworkMode::Mainnet, 51) => first == '5',
        (NetworkMode::Mainnet, 52) => matches!(first, 'K' | 'L'),
        (NetworkMode::Testnet, 51) => first == '9',
        (NetworkMode::Testnet, 52) => first == 'c',
        _ => false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyDecoder {
    network: NetworkMode,
}

impl KeyDecoder {
    pub const fn new(network: NetworkMode) -> Self {
        Self { network }
    }

    /// Decode a WIF string without applying the compression policy.
    pub fn parse(&self, raw: &str) -> Result<DecodedKey, FormatError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FormatError::Empty);
        }
        if !has_wif_shape(raw, self.network) {
            return Err(FormatError::InvalidEncoding);
        }
        let payload = bs58::decode(raw)
            .into_vec()
            .ok()
            .map(Zeroizing::new)
            .ok_or(FormatError::InvalidEncoding)?;
        if !matches!(
            payload.len(),
            PAYLOAD_LEN_UNCOMPRESSED | PAYLOAD_LEN_COMPRESSED
        ) {
            return Err(FormatError::InvalidEncoding);
        }

        // Checksum, version byte and scalar range.
        let mut key = PrivateKey::from_wif(raw)
            .ok()
            .ok_or(FormatError::InvalidEncoding)?;
        if key.network != self.network.kind() {
            return Err(FormatError::InvalidEncoding);
        }

        let secp = Secp256k1::new();
        let public_key = key.public_key(&secp);
        let address = Address::p2pkh(public_key.pubkey_hash(), key.network).to_string();
        let secret = Zeroizing::new(key.inner.secret_bytes());
        key.inner.non_secure_erase();

        Ok(DecodedKey {
            public_key,
            address,
            secret,
        })
    }

    /// Decode a WIF string, rejecting keys that are not flagged compressed.
    pub fn decode(&self, raw: &str) -> Result<DecodedKey, FormatError> {
        let key = self.parse(raw)?;
        if !key.is_compressed() {
            return Err(FormatError::Uncompressed);
        }
        Ok(key)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Secret scalar 1, compressed, mainnet.
    pub const COMPRESSED_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
    pub const COMPRESSED_ADDRESS: &str = "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH";
    /// Secret scalar 1, uncompressed, mainnet.
    pub const UNCOMPRESSED_WIF: &str = "5HpHagT65TZzG1PH3CSu63k8DbpvD8s5ip4nEB3kEsreAnchuDf";
    pub const UNCOMPRESSED_ADDRESS: &str = "1EHNa6Q4Jz2uvNExL497mE43ikXhwF6kZm";
    /// Widely published uncompressed mainnet vector.
    pub const LEGACY_WIF: &str = "5Kb8kLf9zgWQnogidDA76MzPL6TsZZY36hWXMssSzNydYXYB9KF";
}
