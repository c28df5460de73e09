//! Password-derived envelope encryption
//!
//! A [`LockSpec`] describes how to turn a password into a symmetric
//! [`KeySet`]: a random salt and an iterated-digest key derivation, plus the
//! AEAD cipher the key set seals with. The encoded spec is self-describing,
//! so a store (or an exported entry) can carry its own lock header and
//! re-derive the key set from nothing but the password.

use aes_gcm::{aead::Aead, Aes256Gcm, KeyInit, Nonce};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{KeyStoreError, Result};

/// Salt length for password key derivation
pub const SALT_LENGTH: usize = 32;

/// Iteration count for the password key derivation
pub const KDF_ITERATIONS: u32 = 10_000;

/// AEAD key length
pub const KEY_LENGTH: usize = 32;

/// AEAD nonce length
const NONCE_LENGTH: usize = 12;

/// AEAD cipher named by a lock specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherId {
    Aes256Gcm,
    ChaCha20Poly1305,
}

/// Self-describing lock specification: everything needed to re-derive the
/// key set except the password itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSpec {
    version: u16,
    cipher: CipherId,
    salt: Vec<u8>,
    iterations: u32,
}

impl LockSpec {
    /// Create a fresh lock specification with a random salt
    pub fn generate() -> Self {
        Self::generate_with_cipher(CipherId::Aes256Gcm)
    }

    pub fn generate_with_cipher(cipher: CipherId) -> Self {
        let mut salt = vec![0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        Self {
            version: 1,
            cipher,
            salt,
            iterations: KDF_ITERATIONS,
        }
    }

    pub fn cipher(&self) -> CipherId {
        self.cipher
    }

    /// Encode the spec as a self-describing header blob
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a spec from its header blob
    pub fn decode(header: &[u8]) -> Result<Self> {
        let spec: LockSpec = bincode::deserialize(header)
            .map_err(|e| KeyStoreError::DecodeError(format!("Malformed lock header: {e}")))?;
        if spec.version != 1 {
            return Err(KeyStoreError::DecodeError(format!(
                "Unsupported lock version: {}",
                spec.version
            )));
        }
        Ok(spec)
    }

    /// Derive the key set for this lock from a password.
    ///
    /// Key = SHA-256(password ‖ salt), self-digested `iterations - 1` more
    /// times. Same construction as the protocol's password-based MAC key.
    pub fn derive_key_set(&self, password: &[u8]) -> KeySet {
        let key = iterated_digest(password, &self.salt, self.iterations);
        KeySet {
            cipher: self.cipher,
            key,
        }
    }
}

/// Iterated-digest password hardening shared by locks and the PKMAC
pub(crate) fn iterated_digest(
    secret: &[u8],
    salt: &[u8],
    iterations: u32,
) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update(salt);
    let mut key: [u8; KEY_LENGTH] = hasher.finalize().into();
    for _ in 1..iterations {
        let next: [u8; KEY_LENGTH] = Sha256::digest(key).into();
        key.zeroize();
        key = next;
    }
    Zeroizing::new(key)
}

/// A symmetric key set: one AEAD key plus the cipher it seals with.
///
/// Secures (encrypts) opaque secrets and later derives (decrypts) them
/// again. The key bytes are wiped on drop.
pub struct KeySet {
    cipher: CipherId,
    key: Zeroizing<[u8; KEY_LENGTH]>,
}

impl std::fmt::Debug for KeySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeySet")
            .field("cipher", &self.cipher)
            .finish_non_exhaustive()
    }
}

impl KeySet {
    /// Generate a fresh random key set
    pub fn generate() -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        rand::thread_rng().fill_bytes(key.as_mut());
        Self {
            cipher: CipherId::Aes256Gcm,
            key,
        }
    }

    /// Rebuild a key set from a raw 32-byte seed (the seed is not consumed;
    /// the caller remains responsible for wiping it)
    pub fn from_seed(seed: &[u8]) -> Result<Self> {
        if seed.len() != KEY_LENGTH {
            return Err(KeyStoreError::InvalidKeyFormat(format!(
                "Key set seed must be {KEY_LENGTH} bytes"
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
        key.copy_from_slice(seed);
        Ok(Self {
            cipher: CipherId::Aes256Gcm,
            key,
        })
    }

    /// Raw key bytes, for wrapping the key set to a recipient
    pub fn seed(&self) -> &[u8] {
        self.key.as_ref()
    }

    /// Encrypt and serialize an opaque secret
    pub fn secure(&self, secret: &[u8]) -> Result<Vec<u8>> {
        seal_with_key(self.cipher, self.key.as_ref(), secret)
    }

    /// Decrypt and reconstruct a previously secured secret
    pub fn derive(&self, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        open_with_key(self.cipher, self.key.as_ref(), blob)
    }
}

/// AEAD seal with a random nonce prepended to the ciphertext
pub(crate) fn seal_with_key(cipher: CipherId, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_LENGTH {
        return Err(KeyStoreError::EncryptionError(format!(
            "Key must be {KEY_LENGTH} bytes"
        )));
    }
    let mut nonce = [0u8; NONCE_LENGTH];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = match cipher {
        CipherId::Aes256Gcm => {
            let aead = Aes256Gcm::new_from_slice(key)
                .map_err(|e| KeyStoreError::EncryptionError(format!("Failed to create cipher: {e}")))?;
            aead.encrypt(Nonce::from_slice(&nonce), data)
                .map_err(|e| KeyStoreError::EncryptionError(format!("AEAD encryption failed: {e}")))?
        }
        CipherId::ChaCha20Poly1305 => {
            let aead = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| KeyStoreError::EncryptionError(format!("Failed to create cipher: {e}")))?;
            aead.encrypt(chacha20poly1305::Nonce::from_slice(&nonce), data)
                .map_err(|e| KeyStoreError::EncryptionError(format!("AEAD encryption failed: {e}")))?
        }
    };

    let mut result = nonce.to_vec();
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// AEAD open of a nonce-prefixed blob
pub(crate) fn open_with_key(
    cipher: CipherId,
    key: &[u8],
    blob: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    if key.len() != KEY_LENGTH {
        return Err(KeyStoreError::DecryptionError(format!(
            "Key must be {KEY_LENGTH} bytes"
        )));
    }
    if blob.len() < NONCE_LENGTH {
        return Err(KeyStoreError::DecryptionError(
            "Encrypted data too short (missing nonce)".to_string(),
        ));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LENGTH);

    let plaintext = match cipher {
        CipherId::Aes256Gcm => {
            let aead = Aes256Gcm::new_from_slice(key)
                .map_err(|e| KeyStoreError::DecryptionError(format!("Failed to create cipher: {e}")))?;
            aead.decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|e| KeyStoreError::DecryptionError(format!("AEAD decryption failed: {e}")))?
        }
        CipherId::ChaCha20Poly1305 => {
            let aead = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| KeyStoreError::DecryptionError(format!("Failed to create cipher: {e}")))?;
            aead.decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
                .map_err(|e| KeyStoreError::DecryptionError(format!("AEAD decryption failed: {e}")))?
        }
    };

    Ok(Zeroizing::new(plaintext))
}
