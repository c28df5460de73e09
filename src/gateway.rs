//! Certificate-management gateway
//!
//! `KeyStoreGateway` drives the four-step certification exchange between a
//! requester and an issuing CA, and moves individual entries between stores
//! as armored blocks. One gateway instance can play either role; pending
//! request and response state lives in the gateway, the certificates and
//! keys themselves in the [`KeyStore`] passed to each call.
//!
//! Passwords and shared secrets are never held by the gateway. They are
//! pulled on demand from injected resolver closures: the password resolver
//! answers for store aliases, the MAC-secret resolver for protocol subject
//! names, and the lock resolver for the passwords protecting exported
//! blocks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::armor::{self, BlockKind};
use crate::certificate::{
    normalize_dn, CertificateSigner, X509Certificate, DEFAULT_VALIDITY_DAYS,
};
use crate::error::{KeyStoreError, Result};
use crate::keypair::{KeyPair, PublicKey};
use crate::lock::LockSpec;
use crate::logging::Logger;
use crate::message::{
    self, CertificateAck, CertificateRequest, CertificateRequestBody, CertificateResponse,
    ProofOfPossession, ResponsePayload,
};
use crate::store::{KeyStore, StoreEntry, StoreSecret, SymKeyType};

/// Resolves the store password for an alias
pub type PasswordResolver = Box<dyn Fn(&str) -> Option<Vec<u8>>>;
/// Resolves the out-of-band MAC secret shared with a protocol peer, by
/// subject name
pub type MacSecretResolver = Box<dyn Fn(&str) -> Option<Vec<u8>>>;
/// Resolves the password protecting an exported or imported block, by alias
pub type LockResolver = Box<dyn Fn(&str) -> Option<Vec<u8>>>;

/// How the requester proves possession of the private key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofMethod {
    /// Sign the request body with the key being certified
    Signature,
    /// Encrypt the private key to the CA's encryption target
    EncryptedKey,
    /// No proof up front; only an encrypted response is acceptable and
    /// possession is confirmed by the ack
    IndirectConfirmation,
}

/// Requester-side state between request and response
struct PendingRequest {
    alias: String,
    subject_name: String,
    key_pair: KeyPair,
}

/// Issuer-side state between response and ack
struct PendingCertificate {
    subject_name: String,
    certificate: X509Certificate,
    /// Already stored (plain responses); encrypted responses land only
    /// once the ack confirms receipt
    installed: bool,
}

/// Alias an issued certificate is stored under on the issuer side
fn allocation_alias(response_id: u64) -> String {
    format!("AllocatedCertificate_{response_id}")
}

/// A lock-encrypted export block: the self-describing lock header followed
/// by the sealed payload
#[derive(Serialize, Deserialize)]
struct SealedBlock {
    lock_header: Vec<u8>,
    payload: Vec<u8>,
}

/// Private key export: PKCS#8 plus the full chain, leaf first
#[derive(Serialize, Deserialize)]
struct ExportedKeyPair {
    private_key_der: Vec<u8>,
    chain_der: Vec<Vec<u8>>,
}

/// Symmetric key export
#[derive(Serialize, Deserialize)]
struct ExportedKey {
    key_type: SymKeyType,
    bytes: Vec<u8>,
}

pub struct KeyStoreGateway {
    logger: Arc<Logger>,
    password_resolver: Option<PasswordResolver>,
    mac_secret_resolver: Option<MacSecretResolver>,
    lock_resolver: Option<LockResolver>,
    /// Alias of the CA key pair used to sign issued certificates
    certifier: Option<String>,
    /// Alias of the encryption target: on the requester a trusted
    /// certificate of the CA's encryption identity, on the issuer the
    /// matching key pair
    encryption_target: Option<String>,
    next_id: u64,
    pending_requests: HashMap<u64, PendingRequest>,
    pending_certificates: HashMap<u64, PendingCertificate>,
}

impl KeyStoreGateway {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            logger,
            password_resolver: None,
            mac_secret_resolver: None,
            lock_resolver: None,
            certifier: None,
            encryption_target: None,
            next_id: 1,
            pending_requests: HashMap::new(),
            pending_certificates: HashMap::new(),
        }
    }

    pub fn set_password_resolver(&mut self, resolver: PasswordResolver) {
        self.password_resolver = Some(resolver);
    }

    pub fn set_mac_secret_resolver(&mut self, resolver: MacSecretResolver) {
        self.mac_secret_resolver = Some(resolver);
    }

    pub fn set_lock_resolver(&mut self, resolver: LockResolver) {
        self.lock_resolver = Some(resolver);
    }

    pub fn set_certifier(&mut self, alias: &str) {
        self.certifier = Some(alias.to_string());
    }

    pub fn set_encryption_target(&mut self, alias: &str) {
        self.encryption_target = Some(alias.to_string());
    }

    fn store_password(&self, alias: &str) -> Result<Zeroizing<Vec<u8>>> {
        let resolver = self.password_resolver.as_ref().ok_or_else(|| {
            KeyStoreError::MissingConfiguration("No password resolver configured".to_string())
        })?;
        resolver(alias).map(Zeroizing::new).ok_or_else(|| {
            KeyStoreError::MissingConfiguration(format!("No password known for alias '{alias}'"))
        })
    }

    fn mac_secret(&self, subject_name: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.mac_secret_resolver
            .as_ref()
            .and_then(|resolver| resolver(subject_name))
            .map(Zeroizing::new)
    }

    fn lock_password(&self, alias: &str) -> Result<Zeroizing<Vec<u8>>> {
        let resolver = self.lock_resolver.as_ref().ok_or_else(|| {
            KeyStoreError::MissingConfiguration("No lock resolver configured".to_string())
        })?;
        resolver(alias).map(Zeroizing::new).ok_or_else(|| {
            KeyStoreError::MissingConfiguration(format!(
                "No lock password known for alias '{alias}'"
            ))
        })
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // -----------------------------------------------------------------
    // Step 1: requester builds a certificate request
    // -----------------------------------------------------------------

    /// Build an armored certificate request for the key pair stored under
    /// `alias`, choosing the proof of possession automatically: a
    /// signature when the key can sign, the encrypted private key when an
    /// encryption target is configured, indirect confirmation otherwise.
    pub fn create_certificate_request(&mut self, store: &KeyStore, alias: &str) -> Result<String> {
        self.build_request(store, alias, None)
    }

    /// Like [`create_certificate_request`](Self::create_certificate_request)
    /// but with an explicit proof method.
    pub fn create_certificate_request_using(
        &mut self,
        store: &KeyStore,
        alias: &str,
        method: ProofMethod,
    ) -> Result<String> {
        self.build_request(store, alias, Some(method))
    }

    fn build_request(
        &mut self,
        store: &KeyStore,
        alias: &str,
        method: Option<ProofMethod>,
    ) -> Result<String> {
        let password = self.store_password(alias)?;
        let key_pair = store.get_key_pair(alias, &password)?;
        let chain = store
            .get_certificate_chain(alias)?
            .ok_or_else(|| KeyStoreError::UnknownAlias(alias.to_string()))?;
        let leaf = &chain[0];

        // Request the usage the current leaf carries, extensionless leaves
        // included; the issued certificate mirrors it.
        let subject_name = leaf.subject().to_string();
        let usage = leaf.key_usage()?;

        let request_id = self.take_id();
        let body = CertificateRequestBody {
            request_id,
            subject_name: subject_name.clone(),
            public_key_der: key_pair.public_key_der()?,
            usage,
        };

        let method = match method {
            Some(method) => method,
            None if key_pair.spec().can_sign() => ProofMethod::Signature,
            None if self.encryption_target.is_some() => ProofMethod::EncryptedKey,
            None => ProofMethod::IndirectConfirmation,
        };

        let proof = match method {
            ProofMethod::Signature => {
                if !key_pair.spec().can_sign() {
                    return Err(KeyStoreError::UnsupportedUsage(format!(
                        "{} cannot sign a proof of possession",
                        key_pair.spec().as_str()
                    )));
                }
                message::build_signed_proof(&key_pair, &body)?
            }
            ProofMethod::EncryptedKey => {
                let target = self.encryption_target_public(store)?.ok_or_else(|| {
                    KeyStoreError::MissingConfiguration(
                        "No encryption target configured".to_string(),
                    )
                })?;
                message::build_encrypted_key_proof(&key_pair, &subject_name, &target)?
            }
            ProofMethod::IndirectConfirmation => {
                let spec = key_pair.spec();
                if !spec.can_encrypt() && !spec.can_agree() {
                    return Err(KeyStoreError::UnsupportedUsage(format!(
                        "{} cannot receive an encrypted response",
                        spec.as_str()
                    )));
                }
                ProofOfPossession::SubsequentEncryptedCert
            }
        };

        let mac_value = match self.mac_secret(&subject_name) {
            Some(secret) => Some(message::create_pkmac_value(&secret, &body.public_key_der)?),
            None => None,
        };

        let request = CertificateRequest {
            body,
            proof,
            mac_value,
        };

        self.pending_requests.insert(
            request_id,
            PendingRequest {
                alias: alias.to_string(),
                subject_name,
                key_pair,
            },
        );
        self.logger
            .info(format!("Created certificate request {request_id} for '{alias}'"));

        let encoded = bincode::serialize(&request)?;
        Ok(armor::enarmor(BlockKind::CertificateRequest, &encoded))
    }

    /// Public key of the configured encryption target certificate, if any
    fn encryption_target_public(&self, store: &KeyStore) -> Result<Option<PublicKey>> {
        let Some(alias) = &self.encryption_target else {
            return Ok(None);
        };
        match store.entry(alias) {
            Some(StoreEntry::TrustedCertificate { key, .. }) => {
                let cert = store.certificate(key).ok_or_else(|| {
                    KeyStoreError::CertificateNotFound(format!(
                        "Encryption target '{alias}' has no certificate in the graph"
                    ))
                })?;
                Ok(Some(cert.public_key()?))
            }
            Some(other) => Err(KeyStoreError::InvalidOperation(format!(
                "Encryption target '{alias}' is a {} entry, not a trusted certificate",
                other.variant_name()
            ))),
            None => Err(KeyStoreError::UnknownAlias(alias.clone())),
        }
    }

    // -----------------------------------------------------------------
    // Step 2: issuer processes the request and answers
    // -----------------------------------------------------------------

    /// Verify a certificate request, issue the certificate with the
    /// configured certifier and return the armored response.
    pub fn process_certificate_request(
        &mut self,
        store: &mut KeyStore,
        armored: &str,
    ) -> Result<String> {
        let encoded = armor::dearmor_expect(BlockKind::CertificateRequest, armored)?;
        let request: CertificateRequest = bincode::deserialize(&encoded)
            .map_err(|e| KeyStoreError::DecodeError(format!("Malformed request: {e}")))?;
        let body = &request.body;

        let certifier = self
            .certifier
            .clone()
            .ok_or_else(|| KeyStoreError::MissingConfiguration("No certifier configured".to_string()))?;

        let secret = self.mac_secret(&body.subject_name);
        match (&secret, &request.mac_value) {
            (Some(secret), Some(mac)) => {
                if !message::check_pkmac_value(secret, &body.public_key_der, mac) {
                    return Err(KeyStoreError::MacMismatch(
                        "Mismatch on PKMAC Security".to_string(),
                    ));
                }
            }
            (None, None) => {}
            _ => {
                return Err(KeyStoreError::MacMismatch(
                    "Mismatch on PKMAC Security".to_string(),
                ))
            }
        }

        let encrypt_response = match &request.proof {
            ProofOfPossession::Signed { signature, .. } => {
                message::verify_signed_proof(body, signature)?;
                false
            }
            ProofOfPossession::EncryptedKey { envelope } => {
                let target_alias = self.encryption_target.clone().ok_or_else(|| {
                    KeyStoreError::MissingConfiguration(
                        "No encryption target configured".to_string(),
                    )
                })?;
                let target_password = self.store_password(&target_alias)?;
                let target_key_pair = store.get_key_pair(&target_alias, &target_password)?;
                message::open_encrypted_key_proof(
                    envelope,
                    &target_key_pair,
                    &body.subject_name,
                    &body.public_key_der,
                )?;
                false
            }
            ProofOfPossession::SubsequentEncryptedCert => true,
        };

        let ca_password = self.store_password(&certifier)?;
        let ca_key_pair = store.get_key_pair(&certifier, &ca_password)?;
        let ca_chain = store
            .get_certificate_chain(&certifier)?
            .ok_or_else(|| KeyStoreError::UnknownAlias(certifier.clone()))?;
        let ca_cert = &ca_chain[0];

        let signer = CertificateSigner::new(&ca_key_pair, ca_cert);
        let certificate = signer.issue(
            &body.subject_name,
            &body.public_key_der,
            body.usage,
            DEFAULT_VALIDITY_DAYS,
        )?;

        let response_id = self.take_id();
        let payload = if encrypt_response {
            let recipient = PublicKey::from_spki_der(&body.public_key_der)?;
            let envelope = message::seal_certificate(&recipient, certificate.der_bytes())?;
            ResponsePayload::Encrypted { envelope }
        } else {
            // Direct confirmation: the issued certificate is stored under
            // its allocation alias now, the ack only closes the exchange.
            store.set_certificate(&allocation_alias(response_id), &certificate)?;
            ResponsePayload::Plain {
                certificate_der: certificate.der_bytes().to_vec(),
            }
        };

        let mac_value = match &secret {
            Some(secret) => Some(message::create_pkmac_value(
                secret,
                certificate.der_bytes(),
            )?),
            None => None,
        };

        let response = CertificateResponse {
            request_id: body.request_id,
            response_id,
            payload,
            ca_chain_der: ca_chain.iter().map(|c| c.der_bytes().to_vec()).collect(),
            mac_value,
        };

        self.pending_certificates.insert(
            response_id,
            PendingCertificate {
                subject_name: body.subject_name.clone(),
                certificate,
                installed: !encrypt_response,
            },
        );
        self.logger.info(format!(
            "Issued certificate for '{}' (response {response_id})",
            body.subject_name
        ));

        let encoded = bincode::serialize(&response)?;
        Ok(armor::enarmor(BlockKind::CertificateResponse, &encoded))
    }

    // -----------------------------------------------------------------
    // Step 3: requester installs the certificate and acknowledges
    // -----------------------------------------------------------------

    /// Verify a certificate response, install the new chain on the pending
    /// alias and return the armored acknowledgement. On any failure the
    /// pending request stays cached so a corrected response can be retried.
    pub fn process_certificate_response(
        &mut self,
        store: &mut KeyStore,
        armored: &str,
    ) -> Result<String> {
        let encoded = armor::dearmor_expect(BlockKind::CertificateResponse, armored)?;
        let response: CertificateResponse = bincode::deserialize(&encoded)
            .map_err(|e| KeyStoreError::DecodeError(format!("Malformed response: {e}")))?;

        let pending = self
            .pending_requests
            .get(&response.request_id)
            .ok_or_else(|| {
                KeyStoreError::UnrecognisedId(format!(
                    "Request id {} not recognised",
                    response.request_id
                ))
            })?;

        let certificate_der = match &response.payload {
            ResponsePayload::Plain { certificate_der } => certificate_der.clone(),
            ResponsePayload::Encrypted { envelope } => {
                message::open_certificate(envelope, &pending.key_pair)?
            }
        };
        let certificate = X509Certificate::from_der(certificate_der)?;

        let secret = self.mac_secret(&pending.subject_name);
        match (&secret, &response.mac_value) {
            (Some(secret), Some(mac)) => {
                if !message::check_pkmac_value(secret, certificate.der_bytes(), mac) {
                    return Err(KeyStoreError::MacMismatch(
                        "Mismatch on PKMAC Security".to_string(),
                    ));
                }
            }
            (None, None) => {}
            _ => {
                return Err(KeyStoreError::MacMismatch(
                    "Mismatch on PKMAC Security".to_string(),
                ))
            }
        }

        if certificate.public_key_bytes() != pending.key_pair.public_key_bytes() {
            return Err(KeyStoreError::ProofOfPossession(
                "Mismatch on publicKey".to_string(),
            ));
        }
        if normalize_dn(certificate.subject()) != normalize_dn(&pending.subject_name) {
            return Err(KeyStoreError::ProofOfPossession(
                "Mismatch on subjectName".to_string(),
            ));
        }

        let mut chain = vec![certificate.clone()];
        for der in &response.ca_chain_der {
            chain.push(X509Certificate::from_der(der.clone())?);
        }
        store.update_certificate_chain(&pending.alias, &chain)?;

        let digest =
            message::ack_digest(secret.as_deref().map(Vec::as_slice), certificate.der_bytes());
        let ack = CertificateAck {
            response_id: response.response_id,
            digest,
        };

        let alias = pending.alias.clone();
        self.pending_requests.remove(&response.request_id);
        self.logger.info(format!(
            "Installed issued certificate on '{alias}' (request {})",
            response.request_id
        ));

        let encoded = bincode::serialize(&ack)?;
        Ok(armor::enarmor(BlockKind::CertificateAck, &encoded))
    }

    // -----------------------------------------------------------------
    // Step 4: issuer confirms receipt
    // -----------------------------------------------------------------

    /// Verify the acknowledgement digest for a pending response. A valid
    /// ack installs an encrypted-response certificate into the graph and
    /// clears the pending entry; an invalid digest leaves it cached.
    pub fn process_certificate_ack(&mut self, store: &mut KeyStore, armored: &str) -> Result<()> {
        let encoded = armor::dearmor_expect(BlockKind::CertificateAck, armored)?;
        let ack: CertificateAck = bincode::deserialize(&encoded)
            .map_err(|e| KeyStoreError::DecodeError(format!("Malformed ack: {e}")))?;

        let pending = self.pending_certificates.get(&ack.response_id).ok_or_else(|| {
            KeyStoreError::UnrecognisedId(format!(
                "Response id {} not recognised",
                ack.response_id
            ))
        })?;

        let secret = self.mac_secret(&pending.subject_name);
        let expected = message::ack_digest(
            secret.as_deref().map(Vec::as_slice),
            pending.certificate.der_bytes(),
        );
        if expected != ack.digest {
            return Err(KeyStoreError::InvalidDigest("Invalid Digest".to_string()));
        }

        if !pending.installed {
            store.set_certificate(&allocation_alias(ack.response_id), &pending.certificate)?;
        }
        let subject = pending.subject_name.clone();
        self.pending_certificates.remove(&ack.response_id);
        self.logger.info(format!(
            "Acknowledged certificate for '{subject}' (response {})",
            ack.response_id
        ));
        Ok(())
    }

    // -----------------------------------------------------------------
    // Entry export / import
    // -----------------------------------------------------------------

    /// Export a store entry as an armored block. Certificates travel in
    /// the clear; key material is re-encrypted under a fresh lock derived
    /// from the lock resolver's password for the alias. Standalone locks
    /// hold no portable secret and cannot be exported.
    pub fn export_entry(&self, store: &KeyStore, alias: &str) -> Result<String> {
        match store.entry(alias) {
            None => Err(KeyStoreError::UnknownAlias(alias.to_string())),
            Some(StoreEntry::TrustedCertificate { key, .. }) => {
                let cert = store.certificate(key).ok_or_else(|| {
                    KeyStoreError::CertificateNotFound(format!(
                        "Alias '{alias}' references a certificate missing from the graph"
                    ))
                })?;
                Ok(armor::enarmor(BlockKind::Certificate, cert.der_bytes()))
            }
            Some(StoreEntry::KeyPair { .. }) => {
                let password = self.store_password(alias)?;
                let key_pair = store.get_key_pair(alias, &password)?;
                let chain = store
                    .get_certificate_chain(alias)?
                    .ok_or_else(|| KeyStoreError::UnknownAlias(alias.to_string()))?;
                let exported = ExportedKeyPair {
                    private_key_der: key_pair.private_key_der()?.to_vec(),
                    chain_der: chain.iter().map(|c| c.der_bytes().to_vec()).collect(),
                };
                let block = self.seal_block(alias, &bincode::serialize(&exported)?)?;
                Ok(armor::enarmor(BlockKind::EncryptedPrivateKey, &block))
            }
            Some(StoreEntry::Key { .. }) => {
                let password = self.store_password(alias)?;
                let StoreSecret::Key { key_type, bytes } = store.get_entry(alias, &password)?
                else {
                    return Err(KeyStoreError::InvalidOperation(format!(
                        "Alias '{alias}' is not a symmetric key"
                    )));
                };
                let exported = ExportedKey {
                    key_type,
                    bytes: bytes.to_vec(),
                };
                let block = self.seal_block(alias, &bincode::serialize(&exported)?)?;
                Ok(armor::enarmor(BlockKind::EncryptedKey, &block))
            }
            Some(StoreEntry::KeySet { .. }) => {
                let password = self.store_password(alias)?;
                let StoreSecret::KeySet(key_set) = store.get_entry(alias, &password)? else {
                    return Err(KeyStoreError::InvalidOperation(format!(
                        "Alias '{alias}' is not a key set"
                    )));
                };
                let block = self.seal_block(alias, key_set.seed())?;
                Ok(armor::enarmor(BlockKind::EncryptedKeySet, &block))
            }
            Some(StoreEntry::KeySetLock { .. }) => Err(KeyStoreError::InvalidOperation(format!(
                "Alias '{alias}' is a standalone lock and cannot be exported"
            ))),
        }
    }

    /// Import a single armored block under the given alias
    pub fn import_entry(&self, store: &mut KeyStore, alias: &str, armored: &str) -> Result<()> {
        let (kind, payload) = armor::dearmor(armored)?;
        match kind {
            BlockKind::Certificate => {
                let cert = X509Certificate::from_der(payload)?;
                store.set_certificate(alias, &cert)
            }
            BlockKind::EncryptedPrivateKey => {
                let opened = self.open_block(alias, &payload)?;
                let exported: ExportedKeyPair = bincode::deserialize(&opened)
                    .map_err(|e| KeyStoreError::DecodeError(format!("Malformed key export: {e}")))?;
                let key_pair = KeyPair::from_pkcs8_der(&exported.private_key_der)?;
                let mut chain = Vec::with_capacity(exported.chain_der.len());
                for der in &exported.chain_der {
                    chain.push(X509Certificate::from_der(der.clone())?);
                }
                let password = self.store_password(alias)?;
                store.set_key_pair(alias, &key_pair, &password, &chain)
            }
            BlockKind::EncryptedKey => {
                let opened = self.open_block(alias, &payload)?;
                let exported: ExportedKey = bincode::deserialize(&opened)
                    .map_err(|e| KeyStoreError::DecodeError(format!("Malformed key export: {e}")))?;
                let password = self.store_password(alias)?;
                store.set_key(alias, exported.key_type, &exported.bytes, &password)
            }
            BlockKind::EncryptedKeySet => {
                let opened = self.open_block(alias, &payload)?;
                let key_set = crate::lock::KeySet::from_seed(&opened)?;
                let password = self.store_password(alias)?;
                store.set_key_set(alias, &key_set, &password)
            }
            other => Err(KeyStoreError::InvalidOperation(format!(
                "A {} block cannot be imported as a store entry",
                other.tag()
            ))),
        }
    }

    /// Import every certificate block in a text as a trusted entry, each
    /// under its own subject name. Returns the number imported.
    pub fn import_certificates(&self, store: &mut KeyStore, armored: &str) -> Result<usize> {
        let mut imported = 0;
        for (kind, payload) in armor::dearmor_all(armored)? {
            if kind != BlockKind::Certificate {
                return Err(KeyStoreError::InvalidOperation(format!(
                    "Expected only CERTIFICATE blocks, found {}",
                    kind.tag()
                )));
            }
            let cert = X509Certificate::from_der(payload)?;
            let alias = cert.subject().to_string();
            store.set_certificate(&alias, &cert)?;
            imported += 1;
        }
        Ok(imported)
    }

    fn seal_block(&self, alias: &str, secret: &[u8]) -> Result<Vec<u8>> {
        let password = self.lock_password(alias)?;
        let lock = LockSpec::generate();
        let payload = lock.derive_key_set(&password).secure(secret)?;
        let block = SealedBlock {
            lock_header: lock.encode()?,
            payload,
        };
        Ok(bincode::serialize(&block)?)
    }

    fn open_block(&self, alias: &str, block: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let block: SealedBlock = bincode::deserialize(block)
            .map_err(|e| KeyStoreError::DecodeError(format!("Malformed sealed block: {e}")))?;
        let lock = LockSpec::decode(&block.lock_header)?;
        let password = self.lock_password(alias)?;
        lock.derive_key_set(&password).derive(&block.payload)
    }
}
