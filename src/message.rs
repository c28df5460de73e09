//! Certificate-request protocol messages
//!
//! The wire structures exchanged between a requester and an issuing CA:
//! request/response/ack bodies, the proof-of-possession union, password-based
//! MAC values and the key envelopes used to move private keys and encrypted
//! certificates. Everything here is a plain serde struct encoded with
//! bincode; framing into textual blocks is the armor module's job.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::certificate::{normalize_dn, KeyUsage};
use crate::error::{KeyStoreError, Result};
use crate::keypair::{self, KeyPair, KeyPairSpec, PublicKey};
use crate::lock::{self, CipherId, KeySet, KDF_ITERATIONS, KEY_LENGTH, SALT_LENGTH};

type HmacSha256 = Hmac<Sha256>;

/// HKDF label for agreement-wrapped proof-of-possession envelopes
const POP_AGREEMENT_LABEL: &[u8] = b"certstore-pop-agreement";
/// HKDF label for agreement-wrapped certificate envelopes
const CERT_AGREEMENT_LABEL: &[u8] = b"certstore-cert-agreement";
/// HKDF label for private-key agreement self-tests
const VALIDATE_LABEL: &[u8] = b"certstore-key-validate";

// ---------------------------------------------------------------------
// Password-based MAC
// ---------------------------------------------------------------------

/// A password-based MAC value: random salt, iteration count, MAC bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkMacValue {
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub mac: Vec<u8>,
}

/// Compute a PKMAC over `data`: derive a MAC key by iterated digesting of
/// (secret ‖ salt), then HMAC-SHA256 the data with it.
pub fn create_pkmac_value(secret: &[u8], data: &[u8]) -> Result<PkMacValue> {
    let mut salt = vec![0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = lock::iterated_digest(secret, &salt, KDF_ITERATIONS);
    let mut hmac = HmacSha256::new_from_slice(key.as_ref())
        .map_err(|e| KeyStoreError::KeyDerivationError(format!("HMAC key error: {e}")))?;
    hmac.update(data);
    let mac = hmac.finalize().into_bytes().to_vec();

    Ok(PkMacValue {
        salt,
        iterations: KDF_ITERATIONS,
        mac,
    })
}

/// Recompute and compare a PKMAC, byte-exact
pub fn check_pkmac_value(secret: &[u8], data: &[u8], value: &PkMacValue) -> bool {
    if value.iterations == 0 {
        return false;
    }
    let key = lock::iterated_digest(secret, &value.salt, value.iterations);
    let Ok(mut hmac) = HmacSha256::new_from_slice(key.as_ref()) else {
        return false;
    };
    hmac.update(data);
    hmac.verify_slice(&value.mac).is_ok()
}

/// Acknowledgement digest over a certificate encoding: SHA-256(secret ‖
/// cert). The secret bytes are entirely omitted when no MAC secret is
/// registered, not replaced by a placeholder.
pub fn ack_digest(secret: Option<&[u8]>, certificate_der: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    if let Some(secret) = secret {
        hasher.update(secret);
    }
    hasher.update(certificate_der);
    hasher.finalize().to_vec()
}

// ---------------------------------------------------------------------
// Key envelopes
// ---------------------------------------------------------------------

/// How the envelope's key reaches the recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KeyTransport {
    /// Random key-set seed wrapped to the recipient with ECIES
    Transport { wrapped_seed: Vec<u8> },
    /// Anonymous ECDH: the recipient re-derives the key from our ephemeral
    /// public point
    Agreement { ephemeral_public: Vec<u8> },
}

/// An opaque secret encrypted under a fresh key-set whose key is wrapped to
/// a designated recipient
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub transport: KeyTransport,
    pub sealed: Vec<u8>,
}

impl KeyEnvelope {
    /// Seal `data` for a recipient public key. Prefers key transport
    /// (ECIES), falls back to anonymous agreement, and fails when the
    /// recipient's key spec supports neither.
    pub fn seal_for(recipient: &PublicKey, data: &[u8], label: &[u8]) -> Result<Self> {
        let raw = recipient.raw_bytes();
        let spec = recipient.spec();
        if spec.can_encrypt() {
            let mut seed = Zeroizing::new([0u8; KEY_LENGTH]);
            rand::thread_rng().fill_bytes(seed.as_mut());
            let key_set = KeySet::from_seed(seed.as_ref())?;
            let sealed = key_set.secure(data)?;
            let wrapped_seed = keypair::ecies_encrypt(&raw, seed.as_ref())?;
            Ok(Self {
                transport: KeyTransport::Transport { wrapped_seed },
                sealed,
            })
        } else if spec.can_agree() {
            let (ephemeral_public, key) = keypair::agree_ephemeral(&raw, label)?;
            let sealed = lock::seal_with_key(CipherId::Aes256Gcm, key.as_ref(), data)?;
            Ok(Self {
                transport: KeyTransport::Agreement { ephemeral_public },
                sealed,
            })
        } else {
            Err(KeyStoreError::UnsupportedUsage(format!(
                "{} supports neither key transport nor agreement",
                spec.as_str()
            )))
        }
    }

    /// Unwrap with the recipient's key pair and decrypt
    pub fn open(&self, key_pair: &KeyPair, label: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        match &self.transport {
            KeyTransport::Transport { wrapped_seed } => {
                let seed = keypair::ecies_decrypt(key_pair, wrapped_seed)?;
                let key_set = KeySet::from_seed(&seed)?;
                key_set.derive(&self.sealed)
            }
            KeyTransport::Agreement { ephemeral_public } => {
                let shared = key_pair.agree(ephemeral_public)?;
                let key = keypair::derive_shared_key(&shared, label)?;
                lock::open_with_key(CipherId::Aes256Gcm, key.as_ref(), &self.sealed)
            }
        }
    }
}

// ---------------------------------------------------------------------
// Proof of possession
// ---------------------------------------------------------------------

/// Private key plus the subject identity it belongs to, for the encrypted
/// proof envelope
#[derive(Serialize, Deserialize)]
struct PrivateKeyPackage {
    subject_name: String,
    private_key_der: Vec<u8>,
}

/// Evidence that the requester holds the private key for the requested
/// public key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProofOfPossession {
    /// Signature over the encoded request body with the key pair's default
    /// signature algorithm
    Signed {
        spec: KeyPairSpec,
        signature: Vec<u8>,
    },
    /// The private key itself, encrypted to the CA's encryption target
    EncryptedKey { envelope: KeyEnvelope },
    /// No key material; the requester will only accept an
    /// encrypted-certificate response, deferring confirmation to the ack
    SubsequentEncryptedCert,
}

/// Sign the encoded request body with the requester's private key
pub fn build_signed_proof(
    key_pair: &KeyPair,
    body: &CertificateRequestBody,
) -> Result<ProofOfPossession> {
    let encoded = bincode::serialize(body)?;
    Ok(ProofOfPossession::Signed {
        spec: key_pair.spec(),
        signature: key_pair.sign(&encoded),
    })
}

/// Verify a signed proof against the public key claimed in the body
pub fn verify_signed_proof(body: &CertificateRequestBody, signature: &[u8]) -> Result<()> {
    let public = PublicKey::from_spki_der(&body.public_key_der)?;
    let encoded = bincode::serialize(body)?;
    public.verify(&encoded, signature)
}

/// Build an encrypted proof: export the private key, bind it to the subject
/// name, and seal the package for the CA's encryption target certificate.
pub fn build_encrypted_key_proof(
    key_pair: &KeyPair,
    subject_name: &str,
    target: &PublicKey,
) -> Result<ProofOfPossession> {
    let mut package = PrivateKeyPackage {
        subject_name: subject_name.to_string(),
        private_key_der: key_pair.private_key_der()?.to_vec(),
    };
    let encoded = Zeroizing::new(bincode::serialize(&package)?);
    package.private_key_der.zeroize();

    let envelope = KeyEnvelope::seal_for(target, &encoded, POP_AGREEMENT_LABEL)?;
    Ok(ProofOfPossession::EncryptedKey { envelope })
}

/// CA side: decrypt an encrypted proof, check the bound identity and public
/// key, and independently confirm the private key is usable.
pub fn open_encrypted_key_proof(
    envelope: &KeyEnvelope,
    target_key_pair: &KeyPair,
    expected_subject: &str,
    expected_public_key_der: &[u8],
) -> Result<KeyPair> {
    let encoded = envelope.open(target_key_pair, POP_AGREEMENT_LABEL)?;
    let mut package: PrivateKeyPackage = bincode::deserialize(&encoded)
        .map_err(|e| KeyStoreError::DecodeError(format!("Malformed private key package: {e}")))?;

    let outcome = (|| {
        if normalize_dn(&package.subject_name) != normalize_dn(expected_subject) {
            return Err(KeyStoreError::ProofOfPossession(
                "Mismatch on subjectName".to_string(),
            ));
        }
        let key_pair = KeyPair::from_pkcs8_der(&package.private_key_der)?;
        if key_pair.public_key_der()? != expected_public_key_der {
            return Err(KeyStoreError::ProofOfPossession(
                "Mismatch on publicKey".to_string(),
            ));
        }
        validate_private_key(&key_pair)?;
        Ok(key_pair)
    })();

    package.private_key_der.zeroize();
    outcome
}

/// Confirm a decrypted private key is usable: round-trip a random buffer
/// through the key's encryption capability, or perform a two-party
/// agreement and compare the derived secrets.
pub fn validate_private_key(key_pair: &KeyPair) -> Result<()> {
    let spec = key_pair.spec();
    if spec.can_encrypt() {
        let mut probe = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(probe.as_mut());
        let sealed = keypair::ecies_encrypt(&key_pair.public_key_bytes(), probe.as_ref())?;
        let opened = keypair::ecies_decrypt(key_pair, &sealed)?;
        if opened.as_slice() != probe.as_ref() {
            return Err(KeyStoreError::ProofOfPossession(
                "Private key failed encryption round-trip".to_string(),
            ));
        }
        Ok(())
    } else if spec.can_agree() {
        let (ephemeral_public, ours) =
            keypair::agree_ephemeral(&key_pair.public_key_bytes(), VALIDATE_LABEL)?;
        let shared = key_pair.agree(&ephemeral_public)?;
        let theirs = keypair::derive_shared_key(&shared, VALIDATE_LABEL)?;
        if ours.as_ref() != theirs.as_ref() {
            return Err(KeyStoreError::ProofOfPossession(
                "Private key failed agreement round-trip".to_string(),
            ));
        }
        Ok(())
    } else {
        Err(KeyStoreError::ProofOfPossession(format!(
            "Cannot validate a {} private key by encryption or agreement",
            spec.as_str()
        )))
    }
}

// ---------------------------------------------------------------------
// Protocol messages
// ---------------------------------------------------------------------

/// The signed-over portion of a certificate request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequestBody {
    pub request_id: u64,
    pub subject_name: String,
    /// Requested public key, SubjectPublicKeyInfo DER
    pub public_key_der: Vec<u8>,
    /// Requested key-usage extensions
    pub usage: KeyUsage,
}

/// A certificate request, as emitted by the requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub body: CertificateRequestBody,
    pub proof: ProofOfPossession,
    /// Present iff a MAC secret is registered for the subject name,
    /// computed over the requested public key
    pub mac_value: Option<PkMacValue>,
}

/// Response certificate, in the clear or encrypted for the requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    Plain { certificate_der: Vec<u8> },
    Encrypted { envelope: KeyEnvelope },
}

/// A certificate response, as emitted by the issuing CA
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub request_id: u64,
    pub response_id: u64,
    pub payload: ResponsePayload,
    /// The CA's own chain, leaf first, for chain assembly at the requester
    pub ca_chain_der: Vec<Vec<u8>>,
    /// Present iff the CA resolved a MAC secret for the subject, computed
    /// over the issued certificate's DER encoding
    pub mac_value: Option<PkMacValue>,
}

/// Final acknowledgement from the requester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateAck {
    pub response_id: u64,
    pub digest: Vec<u8>,
}

/// Seal an issued certificate for the requester (indirect confirmation)
pub fn seal_certificate(recipient: &PublicKey, certificate_der: &[u8]) -> Result<KeyEnvelope> {
    KeyEnvelope::seal_for(recipient, certificate_der, CERT_AGREEMENT_LABEL)
}

/// Decrypt an encrypted-certificate response payload
pub fn open_certificate(envelope: &KeyEnvelope, key_pair: &KeyPair) -> Result<Vec<u8>> {
    Ok(envelope.open(key_pair, CERT_AGREEMENT_LABEL)?.to_vec())
}
