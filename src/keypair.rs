//! Key pairs and their capabilities
//!
//! The store handles two key-pair algorithms: ECDSA P-256 (signing, ECIES
//! key transport and ECDH agreement) and Ed25519 (signing only). The
//! [`KeyPairSpec`] capability table is what the manager validates requested
//! key usage against before generating any material.

use hkdf::Hkdf;
use p256::ecdh::{diffie_hellman, EphemeralSecret};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{KeyStoreError, Result};
use crate::lock::{self, CipherId, KEY_LENGTH};

/// HKDF label for ECIES key transport
const TRANSPORT_LABEL: &[u8] = b"certstore-key-transport";

/// Key-pair algorithm specification with its capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPairSpec {
    EcdsaP256,
    Ed25519,
}

impl KeyPairSpec {
    pub fn can_sign(&self) -> bool {
        true
    }

    /// Key-transport (ECIES) capability
    pub fn can_encrypt(&self) -> bool {
        matches!(self, KeyPairSpec::EcdsaP256)
    }

    /// Key-agreement (ECDH) capability
    pub fn can_agree(&self) -> bool {
        matches!(self, KeyPairSpec::EcdsaP256)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPairSpec::EcdsaP256 => "ECDSA-P256",
            KeyPairSpec::Ed25519 => "Ed25519",
        }
    }
}

/// An asymmetric key pair (private plus public component)
#[derive(Clone)]
pub enum KeyPair {
    EcdsaP256 { signing_key: SigningKey },
    Ed25519 { signing_key: ed25519_dalek::SigningKey },
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("spec", &self.spec())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a new key pair for the given spec
    pub fn generate(spec: KeyPairSpec) -> Self {
        match spec {
            KeyPairSpec::EcdsaP256 => KeyPair::EcdsaP256 {
                signing_key: SigningKey::random(&mut rand::thread_rng()),
            },
            KeyPairSpec::Ed25519 => KeyPair::Ed25519 {
                signing_key: ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()),
            },
        }
    }

    pub fn spec(&self) -> KeyPairSpec {
        match self {
            KeyPair::EcdsaP256 { .. } => KeyPairSpec::EcdsaP256,
            KeyPair::Ed25519 { .. } => KeyPairSpec::Ed25519,
        }
    }

    /// Public key as raw bytes (uncompressed SEC1 point for P-256,
    /// 32 bytes for Ed25519)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        match self {
            KeyPair::EcdsaP256 { signing_key } => VerifyingKey::from(signing_key)
                .to_encoded_point(false)
                .as_bytes()
                .to_vec(),
            KeyPair::Ed25519 { signing_key } => {
                signing_key.verifying_key().to_bytes().to_vec()
            }
        }
    }

    /// Private key in PKCS#8 DER format; the buffer is wiped on drop
    pub fn private_key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let der = match self {
            KeyPair::EcdsaP256 { signing_key } => signing_key
                .to_pkcs8_der()
                .map_err(|e| KeyStoreError::InvalidKeyFormat(format!("PKCS#8 encoding error: {e}")))?,
            KeyPair::Ed25519 { signing_key } => signing_key
                .to_pkcs8_der()
                .map_err(|e| KeyStoreError::InvalidKeyFormat(format!("PKCS#8 encoding error: {e}")))?,
        };
        Ok(Zeroizing::new(der.as_bytes().to_vec()))
    }

    /// Public key in SubjectPublicKeyInfo DER format
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        let der = match self {
            KeyPair::EcdsaP256 { signing_key } => VerifyingKey::from(signing_key)
                .to_public_key_der()
                .map_err(|e| {
                    KeyStoreError::InvalidKeyFormat(format!("Public key DER encoding error: {e}"))
                })?,
            KeyPair::Ed25519 { signing_key } => signing_key
                .verifying_key()
                .to_public_key_der()
                .map_err(|e| {
                    KeyStoreError::InvalidKeyFormat(format!("Public key DER encoding error: {e}"))
                })?,
        };
        Ok(der.as_bytes().to_vec())
    }

    /// Reconstruct a key pair from PKCS#8 DER (algorithm detected from the
    /// encoded algorithm identifier)
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        if let Ok(signing_key) = SigningKey::from_pkcs8_der(der) {
            return Ok(KeyPair::EcdsaP256 { signing_key });
        }
        if let Ok(signing_key) = ed25519_dalek::SigningKey::from_pkcs8_der(der) {
            return Ok(KeyPair::Ed25519 { signing_key });
        }
        Err(KeyStoreError::InvalidKeyFormat(
            "Unrecognised PKCS#8 private key".to_string(),
        ))
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::EcdsaP256 { signing_key } => {
                PublicKey::EcdsaP256(VerifyingKey::from(signing_key))
            }
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Sign with this key pair's default signature algorithm (DER-encoded
    /// ECDSA signature for P-256, 64 raw bytes for Ed25519)
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            KeyPair::EcdsaP256 { signing_key } => {
                let signature: Signature = signing_key.sign(data);
                signature.to_der().as_bytes().to_vec()
            }
            KeyPair::Ed25519 { signing_key } => signing_key.sign(data).to_bytes().to_vec(),
        }
    }

    /// Convert to rcgen KeyPair for self-signed certificate generation
    pub fn to_rcgen_key_pair(&self) -> Result<rcgen::KeyPair> {
        let private_key_der = self.private_key_der()?;
        rcgen::KeyPair::from_der(&private_key_der).map_err(|e| {
            KeyStoreError::InvalidKeyFormat(format!("rcgen KeyPair conversion error: {e}"))
        })
    }

    /// ECDH key agreement against a peer's raw public key, returning the
    /// raw shared secret
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match self {
            KeyPair::EcdsaP256 { signing_key } => {
                let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|e| {
                    KeyStoreError::InvalidKeyFormat(format!("Failed to parse peer public key: {e}"))
                })?;
                let secret_key = p256::SecretKey::from_bytes(&signing_key.to_bytes())
                    .map_err(|e| KeyStoreError::KeyDerivationError(e.to_string()))?;
                let shared = diffie_hellman(secret_key.to_nonzero_scalar(), peer.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            KeyPair::Ed25519 { .. } => Err(KeyStoreError::UnsupportedUsage(
                "Ed25519 key pairs have no agreement capability".to_string(),
            )),
        }
    }
}

impl Serialize for KeyPair {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let private_key_der = self.private_key_der().map_err(|e| {
            serde::ser::Error::custom(format!("Failed to serialize private key: {e}"))
        })?;
        private_key_der.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for KeyPair {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let private_key_der = Zeroizing::new(Vec::<u8>::deserialize(deserializer)?);
        Self::from_pkcs8_der(&private_key_der).map_err(|e| {
            serde::de::Error::custom(format!("Failed to deserialize private key: {e}"))
        })
    }
}

/// A public key of either supported algorithm
#[derive(Debug, Clone)]
pub enum PublicKey {
    EcdsaP256(VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn spec(&self) -> KeyPairSpec {
        match self {
            PublicKey::EcdsaP256(_) => KeyPairSpec::EcdsaP256,
            PublicKey::Ed25519(_) => KeyPairSpec::Ed25519,
        }
    }

    /// Parse a raw public key: 65-byte uncompressed SEC1 point (P-256) or
    /// 32 bytes (Ed25519)
    pub fn from_raw_bytes(bytes: &[u8]) -> Result<Self> {
        match bytes.len() {
            65 if bytes[0] == 0x04 => {
                let point = p256::EncodedPoint::from_bytes(bytes).map_err(|e| {
                    KeyStoreError::InvalidKeyFormat(format!("Invalid P-256 point: {e}"))
                })?;
                let key = VerifyingKey::from_encoded_point(&point).map_err(|e| {
                    KeyStoreError::InvalidKeyFormat(format!("Failed to create verifying key: {e}"))
                })?;
                Ok(PublicKey::EcdsaP256(key))
            }
            32 => {
                let array: [u8; 32] = bytes.try_into()?;
                let key = ed25519_dalek::VerifyingKey::from_bytes(&array).map_err(|e| {
                    KeyStoreError::InvalidKeyFormat(format!("Invalid Ed25519 public key: {e}"))
                })?;
                Ok(PublicKey::Ed25519(key))
            }
            n => Err(KeyStoreError::InvalidKeyFormat(format!(
                "Unrecognised public key length: {n}"
            ))),
        }
    }

    /// Parse a SubjectPublicKeyInfo DER public key
    pub fn from_spki_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::EcdsaP256(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(der) {
            return Ok(PublicKey::Ed25519(key));
        }
        Err(KeyStoreError::InvalidKeyFormat(
            "Unrecognised SubjectPublicKeyInfo".to_string(),
        ))
    }

    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::EcdsaP256(key) => key.to_encoded_point(false).as_bytes().to_vec(),
            PublicKey::Ed25519(key) => key.to_bytes().to_vec(),
        }
    }

    /// Verify a signature produced by [`KeyPair::sign`]
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        match self {
            PublicKey::EcdsaP256(key) => {
                let signature = Signature::from_der(signature).map_err(|e| {
                    KeyStoreError::ProofOfPossession(format!("Invalid signature format: {e}"))
                })?;
                key.verify(data, &signature).map_err(|e| {
                    KeyStoreError::ProofOfPossession(format!("Signature verification failed: {e}"))
                })
            }
            PublicKey::Ed25519(key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature).map_err(|e| {
                    KeyStoreError::ProofOfPossession(format!("Invalid signature format: {e}"))
                })?;
                key.verify(data, &signature).map_err(|e| {
                    KeyStoreError::ProofOfPossession(format!("Signature verification failed: {e}"))
                })
            }
        }
    }
}

/// Derive an AEAD key from a raw shared secret
pub(crate) fn derive_shared_key(shared: &[u8], label: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let hk = Hkdf::<Sha256>::new(None, shared);
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    hk.expand(label, key.as_mut())
        .map_err(|e| KeyStoreError::KeyDerivationError(format!("HKDF expansion failed: {e}")))?;
    Ok(key)
}

/// ECIES key transport: ephemeral ECDH against the recipient's P-256 public
/// key, HKDF key derivation, AEAD seal. Output is the uncompressed
/// ephemeral public point followed by the nonce-prefixed ciphertext.
pub fn ecies_encrypt(recipient_public: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let recipient = p256::PublicKey::from_sec1_bytes(recipient_public).map_err(|e| {
        KeyStoreError::InvalidKeyFormat(format!("Failed to parse recipient public key: {e}"))
    })?;

    let ephemeral_secret = EphemeralSecret::random(&mut rand::thread_rng());
    let ephemeral_public = ephemeral_secret.public_key();

    let shared = ephemeral_secret.diffie_hellman(&recipient);
    let key = derive_shared_key(shared.raw_secret_bytes(), TRANSPORT_LABEL)?;

    let sealed = lock::seal_with_key(CipherId::Aes256Gcm, key.as_ref(), data)?;

    let mut result = ephemeral_public.to_encoded_point(false).as_bytes().to_vec();
    result.extend_from_slice(&sealed);
    Ok(result)
}

/// Reverse of [`ecies_encrypt`], using our long-term P-256 private key
pub fn ecies_decrypt(key_pair: &KeyPair, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if blob.len() < 65 {
        return Err(KeyStoreError::DecryptionError(
            "Encrypted data too short for ECIES".to_string(),
        ));
    }
    let (ephemeral_public, sealed) = blob.split_at(65);

    let shared = key_pair.agree(ephemeral_public)?;
    let key = derive_shared_key(&shared, TRANSPORT_LABEL)?;

    lock::open_with_key(CipherId::Aes256Gcm, key.as_ref(), sealed)
}

/// One half of an anonymous key agreement: an ephemeral key pair agreed
/// against the peer's long-term public key. Returns the ephemeral public
/// point (to transmit) and the derived AEAD key.
pub fn agree_ephemeral(
    peer_public: &[u8],
    label: &[u8],
) -> Result<(Vec<u8>, Zeroizing<[u8; KEY_LENGTH]>)> {
    let peer = p256::PublicKey::from_sec1_bytes(peer_public).map_err(|e| {
        KeyStoreError::InvalidKeyFormat(format!("Failed to parse peer public key: {e}"))
    })?;
    let ephemeral_secret = EphemeralSecret::random(&mut rand::thread_rng());
    let ephemeral_public = ephemeral_secret
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    let shared = ephemeral_secret.diffie_hellman(&peer);
    let key = derive_shared_key(shared.raw_secret_bytes(), label)?;
    Ok((ephemeral_public, key))
}
