//! The persistent entry store
//!
//! Maps aliases to entries (trusted certificates, key pairs, symmetric keys,
//! key sets and standalone locks) and maintains the bidirectional
//! certificate graph the entries reference. All structural invariants are
//! checked before any mutation: a failed operation never leaves
//! partially-applied state.
//!
//! A store instance is meant for single-threaded, synchronous use; callers
//! sharing one instance across threads are responsible for serializing
//! access.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::Zeroizing;

use crate::certificate::{normalize_dn, CertificateId, CertificateKey, X509Certificate};
use crate::error::{KeyStoreError, Result};
use crate::keypair::KeyPair;
use crate::lock::{KeySet, LockSpec};
use crate::logging::Logger;

/// Symmetric key types a `Key` entry can be tagged with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymKeyType {
    Aes256,
    ChaCha20,
}

/// One stored entry. Every variant carries its creation date (unix seconds);
/// encrypted variants carry the lock their payload was secured under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreEntry {
    /// A trust anchor: a bare reference into the certificate graph
    TrustedCertificate {
        created_at: u64,
        key: CertificateKey,
    },
    /// A private key (lock-encrypted PKCS#8) with its certificate chain,
    /// leaf first
    KeyPair {
        created_at: u64,
        secured_key: Vec<u8>,
        lock: LockSpec,
        chain: Vec<CertificateKey>,
    },
    /// A symmetric key, lock-encrypted, tagged with its key type
    Key {
        created_at: u64,
        key_type: SymKeyType,
        secured_key: Vec<u8>,
        lock: LockSpec,
    },
    /// A composite key set, lock-encrypted
    KeySet {
        created_at: u64,
        secured_key: Vec<u8>,
        lock: LockSpec,
    },
    /// A standalone password lock: no stored secret, but a sealed marker
    /// so an unlock attempt with the wrong password fails
    KeySetLock {
        created_at: u64,
        lock: LockSpec,
        verifier: Vec<u8>,
    },
}

/// Marker sealed into a `KeySetLock` entry at creation and opened again on
/// unlock; AEAD authentication rejects a wrong password.
const LOCK_VERIFIER: &[u8] = b"certstore lock verifier v1";

impl StoreEntry {
    pub fn created_at(&self) -> u64 {
        match self {
            StoreEntry::TrustedCertificate { created_at, .. }
            | StoreEntry::KeyPair { created_at, .. }
            | StoreEntry::Key { created_at, .. }
            | StoreEntry::KeySet { created_at, .. }
            | StoreEntry::KeySetLock { created_at, .. } => *created_at,
        }
    }

    pub(crate) fn variant_name(&self) -> &'static str {
        match self {
            StoreEntry::TrustedCertificate { .. } => "TrustedCertificate",
            StoreEntry::KeyPair { .. } => "PrivateKeyPair",
            StoreEntry::Key { .. } => "Key",
            StoreEntry::KeySet { .. } => "KeySet",
            StoreEntry::KeySetLock { .. } => "KeySetLock",
        }
    }
}

/// A decrypted entry, as handed back by [`KeyStore::get_entry`]
#[derive(Debug)]
pub enum StoreSecret {
    Certificate(X509Certificate),
    KeyPair(KeyPair),
    Key {
        key_type: SymKeyType,
        bytes: Zeroizing<Vec<u8>>,
    },
    KeySet(KeySet),
}

pub(crate) fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The certificate keystore
pub struct KeyStore {
    /// Alias → entry, aliases unique
    aliases: HashMap<String, StoreEntry>,
    /// subject id → issuer id → certificate
    subject_certs: HashMap<CertificateId, HashMap<CertificateId, X509Certificate>>,
    /// issuer id → subject id → certificate (kept symmetric with the above)
    issuer_certs: HashMap<CertificateId, HashMap<CertificateId, X509Certificate>>,
    logger: Arc<Logger>,
}

impl KeyStore {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self {
            aliases: HashMap::new(),
            subject_certs: HashMap::new(),
            issuer_certs: HashMap::new(),
            logger,
        }
    }

    pub(crate) fn from_parts(
        aliases: HashMap<String, StoreEntry>,
        certificates: Vec<(CertificateKey, X509Certificate)>,
        logger: Arc<Logger>,
    ) -> Self {
        let mut store = Self::new(logger);
        for (key, cert) in certificates {
            store.insert_certificate(key, cert);
        }
        store.aliases = aliases;
        store
    }

    // -----------------------------------------------------------------
    // Alias surface
    // -----------------------------------------------------------------

    pub fn aliases(&self) -> Vec<&str> {
        self.aliases.keys().map(String::as_str).collect()
    }

    pub fn entry(&self, alias: &str) -> Option<&StoreEntry> {
        self.aliases.get(alias)
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    /// Store a trusted certificate under an alias, replacing any previous
    /// certificate entry with the same alias.
    pub fn set_certificate(&mut self, alias: &str, certificate: &X509Certificate) -> Result<()> {
        if let Some(existing) = self.aliases.get(alias) {
            if !matches!(existing, StoreEntry::TrustedCertificate { .. }) {
                return Err(KeyStoreError::AliasConflict(format!(
                    "Alias '{alias}' already holds a {} entry",
                    existing.variant_name()
                )));
            }
        }

        let key = self.resolve_certificate_key(certificate)?;

        if self.aliases.contains_key(alias) {
            self.delete_entry(alias)?;
        }

        self.insert_certificate(key.clone(), certificate.clone());
        self.aliases.insert(
            alias.to_string(),
            StoreEntry::TrustedCertificate {
                created_at: unix_timestamp(),
                key,
            },
        );
        self.logger
            .debug(format!("Stored trusted certificate under alias '{alias}'"));
        Ok(())
    }

    /// Store a key pair under an alias: validates the chain, encrypts the
    /// private key under a freshly derived password lock, and stores every
    /// chain certificate into the graph.
    pub fn set_key_pair(
        &mut self,
        alias: &str,
        key_pair: &KeyPair,
        password: &[u8],
        chain: &[X509Certificate],
    ) -> Result<()> {
        if let Some(existing) = self.aliases.get(alias) {
            if !matches!(existing, StoreEntry::KeyPair { .. }) {
                return Err(KeyStoreError::AliasConflict(format!(
                    "Alias '{alias}' already holds a {} entry",
                    existing.variant_name()
                )));
            }
        }

        self.check_chain(&key_pair.public_key_bytes(), chain)?;

        let lock = LockSpec::generate();
        let key_set = lock.derive_key_set(password);
        let private_key_der = key_pair.private_key_der()?;
        let secured_key = key_set.secure(&private_key_der)?;

        if self.aliases.contains_key(alias) {
            self.delete_entry(alias)?;
        }

        let chain_keys = self.insert_chain(chain);
        self.aliases.insert(
            alias.to_string(),
            StoreEntry::KeyPair {
                created_at: unix_timestamp(),
                secured_key,
                lock,
                chain: chain_keys,
            },
        );
        self.logger.debug(format!(
            "Stored key pair under alias '{alias}' with a {}-certificate chain",
            chain.len()
        ));
        Ok(())
    }

    /// Replace a key pair's certificate chain, re-validating the new chain
    /// against the existing key pair's public key.
    pub fn update_certificate_chain(
        &mut self,
        alias: &str,
        new_chain: &[X509Certificate],
    ) -> Result<()> {
        let old_chain = match self.aliases.get(alias) {
            None => return Err(KeyStoreError::UnknownAlias(alias.to_string())),
            Some(StoreEntry::KeyPair { chain, .. }) => chain.clone(),
            Some(other) => {
                return Err(KeyStoreError::AliasConflict(format!(
                    "Alias '{alias}' holds a {} entry, not a key pair",
                    other.variant_name()
                )))
            }
        };

        let leaf_key = old_chain.first().ok_or_else(|| {
            KeyStoreError::ChainValidation(format!("Alias '{alias}' has an empty chain"))
        })?;
        let public_key = self
            .certificate(leaf_key)
            .ok_or_else(|| {
                KeyStoreError::CertificateNotFound(format!(
                    "Leaf certificate missing from graph for alias '{alias}'"
                ))
            })?
            .public_key_bytes()
            .to_vec();

        self.check_chain(&public_key, new_chain)?;

        let chain_keys = self.insert_chain(new_chain);
        if let Some(StoreEntry::KeyPair { chain, .. }) = self.aliases.get_mut(alias) {
            *chain = chain_keys;
        }

        // Purge old-chain certificates that nothing references any more
        for key in &old_chain {
            if !self.is_referenced(key) {
                self.cascade_remove(key);
            }
        }
        self.logger
            .debug(format!("Updated certificate chain for alias '{alias}'"));
        Ok(())
    }

    /// Store a symmetric key, encrypted under a fresh password lock
    pub fn set_key(
        &mut self,
        alias: &str,
        key_type: SymKeyType,
        key_bytes: &[u8],
        password: &[u8],
    ) -> Result<()> {
        self.check_replaceable(alias, "Key")?;
        let lock = LockSpec::generate();
        let secured_key = lock.derive_key_set(password).secure(key_bytes)?;
        self.aliases.insert(
            alias.to_string(),
            StoreEntry::Key {
                created_at: unix_timestamp(),
                key_type,
                secured_key,
                lock,
            },
        );
        Ok(())
    }

    /// Store a key set, its seed encrypted under a fresh password lock
    pub fn set_key_set(&mut self, alias: &str, key_set: &KeySet, password: &[u8]) -> Result<()> {
        self.check_replaceable(alias, "KeySet")?;
        let lock = LockSpec::generate();
        let secured_key = lock.derive_key_set(password).secure(key_set.seed())?;
        self.aliases.insert(
            alias.to_string(),
            StoreEntry::KeySet {
                created_at: unix_timestamp(),
                secured_key,
                lock,
            },
        );
        Ok(())
    }

    /// Store a standalone password lock artifact
    pub fn set_key_set_lock(&mut self, alias: &str, password: &[u8]) -> Result<()> {
        self.check_replaceable(alias, "KeySetLock")?;
        let lock = LockSpec::generate();
        let verifier = lock.derive_key_set(password).secure(LOCK_VERIFIER)?;
        self.aliases.insert(
            alias.to_string(),
            StoreEntry::KeySetLock {
                created_at: unix_timestamp(),
                lock,
                verifier,
            },
        );
        Ok(())
    }

    fn check_replaceable(&self, alias: &str, variant: &str) -> Result<()> {
        if let Some(existing) = self.aliases.get(alias) {
            if existing.variant_name() != variant {
                return Err(KeyStoreError::AliasConflict(format!(
                    "Alias '{alias}' already holds a {} entry",
                    existing.variant_name()
                )));
            }
        }
        Ok(())
    }

    /// Delete an entry. Certificates referenced by the deleted entry are
    /// removed from the graph (with orphan cascade) unless another alias
    /// still references them.
    pub fn delete_entry(&mut self, alias: &str) -> Result<()> {
        let entry = self
            .aliases
            .remove(alias)
            .ok_or_else(|| KeyStoreError::UnknownAlias(alias.to_string()))?;

        match entry {
            StoreEntry::TrustedCertificate { key, .. } => {
                if !self.is_referenced(&key) {
                    self.cascade_remove(&key);
                }
            }
            StoreEntry::KeyPair { chain, .. } => {
                for key in &chain {
                    if !self.is_referenced(key) {
                        self.cascade_remove(key);
                    }
                }
            }
            _ => {}
        }
        self.logger.debug(format!("Deleted entry '{alias}'"));
        Ok(())
    }

    /// Resolve and decrypt an entry. Encrypted variants re-derive the lock
    /// with the given password and fail with a decryption error on mismatch.
    pub fn get_entry(&self, alias: &str, password: &[u8]) -> Result<StoreSecret> {
        let entry = self
            .aliases
            .get(alias)
            .ok_or_else(|| KeyStoreError::UnknownAlias(alias.to_string()))?;

        match entry {
            StoreEntry::TrustedCertificate { key, .. } => {
                let cert = self.certificate(key).ok_or_else(|| {
                    KeyStoreError::CertificateNotFound(format!(
                        "Certificate missing from graph for alias '{alias}'"
                    ))
                })?;
                Ok(StoreSecret::Certificate(cert.clone()))
            }
            StoreEntry::KeyPair {
                secured_key, lock, ..
            } => {
                let key_set = lock.derive_key_set(password);
                let private_key_der = key_set.derive(secured_key)?;
                let key_pair = KeyPair::from_pkcs8_der(&private_key_der)?;
                Ok(StoreSecret::KeyPair(key_pair))
            }
            StoreEntry::Key {
                key_type,
                secured_key,
                lock,
                ..
            } => {
                let key_set = lock.derive_key_set(password);
                let bytes = key_set.derive(secured_key)?;
                Ok(StoreSecret::Key {
                    key_type: *key_type,
                    bytes,
                })
            }
            StoreEntry::KeySet {
                secured_key, lock, ..
            } => {
                let key_set = lock.derive_key_set(password);
                let seed = key_set.derive(secured_key)?;
                Ok(StoreSecret::KeySet(KeySet::from_seed(&seed)?))
            }
            StoreEntry::KeySetLock { lock, verifier, .. } => {
                let key_set = lock.derive_key_set(password);
                key_set.derive(verifier)?;
                Ok(StoreSecret::KeySet(key_set))
            }
        }
    }

    /// Decrypt a key-pair entry, failing on any other variant
    pub fn get_key_pair(&self, alias: &str, password: &[u8]) -> Result<KeyPair> {
        match self.get_entry(alias, password)? {
            StoreSecret::KeyPair(key_pair) => Ok(key_pair),
            _ => Err(KeyStoreError::InvalidOperation(format!(
                "Alias '{alias}' is not a key pair"
            ))),
        }
    }

    /// Resolve a key-pair entry's chain into actual certificates. Returns
    /// `None` when the alias does not name a key pair.
    pub fn get_certificate_chain(&self, alias: &str) -> Result<Option<Vec<X509Certificate>>> {
        let chain_keys = match self.aliases.get(alias) {
            Some(StoreEntry::KeyPair { chain, .. }) => chain,
            _ => return Ok(None),
        };
        let mut chain = Vec::with_capacity(chain_keys.len());
        for key in chain_keys {
            let cert = self.certificate(key).ok_or_else(|| {
                KeyStoreError::CertificateNotFound(format!(
                    "Chain certificate missing from graph for alias '{alias}'"
                ))
            })?;
            chain.push(cert.clone());
        }
        Ok(Some(chain))
    }

    /// Locate the key-pair alias whose leaf certificate matches the given
    /// issuer name and serial number. Used to find the decrypting identity
    /// for an inbound key-transport envelope.
    pub fn find_issuer_cert(
        &self,
        issuer_name: &str,
        serial: &[u8],
    ) -> Result<(String, X509Certificate)> {
        let wanted = normalize_dn(issuer_name);
        for (alias, entry) in &self.aliases {
            if let StoreEntry::KeyPair { chain, .. } = entry {
                let Some(leaf_key) = chain.first() else {
                    continue;
                };
                if let Some(cert) = self.certificate(leaf_key) {
                    if normalize_dn(cert.issuer()) == wanted && cert.serial() == serial {
                        return Ok((alias.clone(), cert.clone()));
                    }
                }
            }
        }
        Err(KeyStoreError::CertificateNotFound(format!(
            "No key pair certificate issued by '{issuer_name}' with the given serial"
        )))
    }

    // -----------------------------------------------------------------
    // Certificate graph
    // -----------------------------------------------------------------

    pub fn certificate(&self, key: &CertificateKey) -> Option<&X509Certificate> {
        self.subject_certs
            .get(&key.subject)
            .and_then(|by_issuer| by_issuer.get(&key.issuer))
    }

    /// All certificates currently in the graph, with their keys
    pub fn certificates(&self) -> Vec<(CertificateKey, &X509Certificate)> {
        let mut result = Vec::new();
        for (subject, by_issuer) in &self.subject_certs {
            for (issuer, cert) in by_issuer {
                result.push((
                    CertificateKey {
                        issuer: issuer.clone(),
                        subject: subject.clone(),
                    },
                    cert,
                ));
            }
        }
        result
    }

    /// Certificates issued by the given entity (for graph inspection)
    pub fn certificates_by_issuer(&self, issuer: &CertificateId) -> Vec<&X509Certificate> {
        self.issuer_certs
            .get(issuer)
            .map(|by_subject| by_subject.values().collect())
            .unwrap_or_default()
    }

    /// Both graph indices hold the certificate, inserted as one step
    fn insert_certificate(&mut self, key: CertificateKey, cert: X509Certificate) {
        self.subject_certs
            .entry(key.subject.clone())
            .or_default()
            .insert(key.issuer.clone(), cert.clone());
        self.issuer_certs
            .entry(key.issuer)
            .or_default()
            .insert(key.subject, cert);
    }

    fn insert_chain(&mut self, chain: &[X509Certificate]) -> Vec<CertificateKey> {
        let mut keys = Vec::with_capacity(chain.len());
        for (i, cert) in chain.iter().enumerate() {
            let key = match chain.get(i + 1) {
                Some(issuer) => cert.key_under(issuer),
                None => cert.self_key(),
            };
            self.insert_certificate(key.clone(), cert.clone());
            keys.push(key);
        }
        keys
    }

    /// True when any alias still references the certificate, directly or
    /// through a key-pair chain
    fn is_referenced(&self, key: &CertificateKey) -> bool {
        self.aliases.values().any(|entry| match entry {
            StoreEntry::TrustedCertificate { key: k, .. } => k == key,
            StoreEntry::KeyPair { chain, .. } => chain.contains(key),
            _ => false,
        })
    }

    /// Remove a certificate from both indices; if its issuer no longer
    /// issues any non-self-signed certificate, the issuer's own unreferenced
    /// certificates are purged recursively.
    fn cascade_remove(&mut self, key: &CertificateKey) {
        if let Some(by_issuer) = self.subject_certs.get_mut(&key.subject) {
            by_issuer.remove(&key.issuer);
            if by_issuer.is_empty() {
                self.subject_certs.remove(&key.subject);
            }
        }
        if let Some(by_subject) = self.issuer_certs.get_mut(&key.issuer) {
            by_subject.remove(&key.subject);
            if by_subject.is_empty() {
                self.issuer_certs.remove(&key.issuer);
            }
        }

        if key.is_self_signed() {
            return;
        }

        let issuer_id = &key.issuer;
        let still_issuing = self
            .issuer_certs
            .get(issuer_id)
            .map(|by_subject| by_subject.keys().any(|subject| subject != issuer_id))
            .unwrap_or(false);
        if still_issuing {
            return;
        }

        // The issuer certificate itself is now an orphan candidate
        let orphan_keys: Vec<CertificateKey> = self
            .subject_certs
            .get(issuer_id)
            .map(|by_issuer| {
                by_issuer
                    .keys()
                    .map(|parent| CertificateKey {
                        issuer: parent.clone(),
                        subject: issuer_id.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        for orphan in orphan_keys {
            if !self.is_referenced(&orphan) {
                self.cascade_remove(&orphan);
            }
        }
    }

    /// Work out the graph key for a certificate inserted on its own: a
    /// self-signed certificate validates itself; anything else must chain to
    /// an issuer certificate already in the graph.
    fn resolve_certificate_key(&self, cert: &X509Certificate) -> Result<CertificateKey> {
        if cert.is_self_signed() {
            cert.validate_self_signed()?;
            return Ok(cert.self_key());
        }

        let issuer_name = normalize_dn(cert.issuer());
        for (candidate_id, by_issuer) in &self.subject_certs {
            if normalize_dn(&candidate_id.name) != issuer_name {
                continue;
            }
            if let Some(issuer_cert) = by_issuer.values().next() {
                if cert.validate_issued_by(issuer_cert).is_ok() {
                    return Ok(cert.key_under(issuer_cert));
                }
            }
        }
        Err(KeyStoreError::Certificate(format!(
            "Unknown issuer certificate for '{}'",
            cert.subject()
        )))
    }

    // -----------------------------------------------------------------
    // Chain validation
    // -----------------------------------------------------------------

    /// Validate a certificate chain (leaf first) for a key pair's public key
    /// without mutating anything.
    ///
    /// Same-subject certificates already in the store are key-matched for
    /// chain issuers only; a fresh leaf from a different issuer is accepted
    /// (cross-CA re-issuance).
    pub fn check_chain(&self, public_key: &[u8], chain: &[X509Certificate]) -> Result<()> {
        if chain.is_empty() {
            return Err(KeyStoreError::ChainValidation(
                "Certificate chain is empty".to_string(),
            ));
        }

        if chain[0].public_key_bytes() != public_key {
            return Err(KeyStoreError::ChainValidation(
                "Mismatch on publicKey".to_string(),
            ));
        }

        for i in 0..chain.len() - 1 {
            let issuer = &chain[i + 1];
            chain[i].validate_issued_by(issuer)?;

            // A same-named issuer already on file must carry the same key
            let issuer_id = issuer.subject_id();
            let issuer_name = normalize_dn(&issuer_id.name);
            for existing in self.subject_certs.keys() {
                if normalize_dn(&existing.name) == issuer_name
                    && existing.key_id != issuer_id.key_id
                {
                    return Err(KeyStoreError::ChainValidation(format!(
                        "Mismatch on publicKey for issuer '{}'",
                        issuer.subject()
                    )));
                }
            }
        }

        let root = &chain[chain.len() - 1];
        root.validate_self_signed()?;

        if chain.len() > 1 {
            let root_key = root.self_key();
            let trusted = self.aliases.values().any(|entry| {
                matches!(entry, StoreEntry::TrustedCertificate { key, .. } if *key == root_key)
            });
            if !trusted {
                return Err(KeyStoreError::ChainValidation(
                    "Root certificate is not trusted".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Persist the store to a password-locked container file
    pub fn save_to_path(&self, path: &Path, password: &[u8]) -> Result<()> {
        crate::persist::save_to_path(self, path, password)
    }

    /// Load a store from a password-locked container file
    pub fn load_from_path(path: &Path, password: &[u8], logger: Arc<Logger>) -> Result<Self> {
        crate::persist::load_from_path(path, password, logger)
    }

    pub(crate) fn alias_map(&self) -> &HashMap<String, StoreEntry> {
        &self.aliases
    }

    pub(crate) fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("aliases", &self.aliases.len())
            .field("subjects", &self.subject_certs.len())
            .finish()
    }
}
