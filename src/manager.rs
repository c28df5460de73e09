//! Creation operations for the keystore
//!
//! Generates fresh key pairs, keys and key sets, issues certificates by
//! signing with a chosen CA entry, and enforces the usage/capability
//! compatibility rules before any key material is generated.

use rand::RngCore;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::certificate::{
    create_self_signed, CertificateSigner, KeyUsage, X509Certificate, DEFAULT_VALIDITY_DAYS,
    ROOT_VALIDITY_DAYS,
};
use crate::error::{KeyStoreError, Result};
use crate::keypair::{KeyPair, KeyPairSpec};
use crate::lock::KeySet;
use crate::logging::Logger;
use crate::store::{KeyStore, SymKeyType};

pub struct KeyStoreManager {
    logger: Arc<Logger>,
}

impl KeyStoreManager {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }

    /// Check that `spec` can satisfy every capability implied by `usage`
    pub fn validate_usage(spec: KeyPairSpec, usage: KeyUsage) -> Result<()> {
        if usage.is_empty() {
            return Err(KeyStoreError::UnsupportedUsage(
                "No key usage requested".to_string(),
            ));
        }
        if (usage.contains(KeyUsage::CERTIFICATE) || usage.contains(KeyUsage::SIGNATURE))
            && !spec.can_sign()
        {
            return Err(KeyStoreError::UnsupportedUsage(format!(
                "{} cannot satisfy signature usage",
                spec.as_str()
            )));
        }
        if (usage.contains(KeyUsage::KEY_ENCRYPT) || usage.contains(KeyUsage::DATA_ENCRYPT))
            && !spec.can_encrypt()
        {
            return Err(KeyStoreError::UnsupportedUsage(format!(
                "{} cannot satisfy encryption usage",
                spec.as_str()
            )));
        }
        if usage.contains(KeyUsage::AGREEMENT) && !spec.can_agree() {
            return Err(KeyStoreError::UnsupportedUsage(format!(
                "{} cannot satisfy agreement usage",
                spec.as_str()
            )));
        }
        Ok(())
    }

    /// Generate a self-signed root (CA) key pair and store it. A root must
    /// be able to sign.
    pub fn create_root_key_pair(
        &self,
        store: &mut KeyStore,
        spec: KeyPairSpec,
        subject_name: &str,
        alias: &str,
        password: &[u8],
    ) -> Result<()> {
        if !spec.can_sign() {
            return Err(KeyStoreError::UnsupportedUsage(format!(
                "{} cannot sign; a root key pair must sign",
                spec.as_str()
            )));
        }
        let key_pair = KeyPair::generate(spec);
        let certificate = create_self_signed(&key_pair, subject_name, ROOT_VALIDITY_DAYS)?;
        store.set_key_pair(alias, &key_pair, password, &[certificate])?;
        self.logger.info(format!(
            "Created {} root key pair '{alias}' for '{subject_name}' (key {})",
            spec.as_str(),
            hex::encode(key_pair.public_key_bytes())
        ));
        Ok(())
    }

    /// Generate a fresh key pair, certify it with the signer entry, and
    /// store it with the signer's chain prepended by the new certificate.
    #[allow(clippy::too_many_arguments)]
    pub fn create_key_pair(
        &self,
        store: &mut KeyStore,
        spec: KeyPairSpec,
        subject_name: &str,
        usage: KeyUsage,
        signer_alias: &str,
        signer_password: &[u8],
        alias: &str,
        password: &[u8],
    ) -> Result<()> {
        Self::validate_usage(spec, usage)?;
        let key_pair = KeyPair::generate(spec);
        let chain = self.certify(store, &key_pair, subject_name, usage, signer_alias, signer_password)?;
        store.set_key_pair(alias, &key_pair, password, &chain)?;
        self.logger.info(format!(
            "Created {} key pair '{alias}' for '{subject_name}' signed by '{signer_alias}'",
            spec.as_str()
        ));
        Ok(())
    }

    /// Issue a new certificate for an existing key pair under a different
    /// usage/signer, without generating new key material.
    #[allow(clippy::too_many_arguments)]
    pub fn create_alternate(
        &self,
        store: &mut KeyStore,
        source_alias: &str,
        source_password: &[u8],
        subject_name: &str,
        usage: KeyUsage,
        signer_alias: &str,
        signer_password: &[u8],
        alias: &str,
        password: &[u8],
    ) -> Result<()> {
        let key_pair = store.get_key_pair(source_alias, source_password)?;
        Self::validate_usage(key_pair.spec(), usage)?;
        let chain = self.certify(store, &key_pair, subject_name, usage, signer_alias, signer_password)?;
        store.set_key_pair(alias, &key_pair, password, &chain)?;
        self.logger.info(format!(
            "Created alternate certificate '{alias}' for key pair '{source_alias}'"
        ));
        Ok(())
    }

    /// Generate and store a fresh symmetric key
    pub fn create_key(
        &self,
        store: &mut KeyStore,
        key_type: SymKeyType,
        alias: &str,
        password: &[u8],
    ) -> Result<()> {
        let mut key_bytes = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(key_bytes.as_mut());
        store.set_key(alias, key_type, key_bytes.as_ref(), password)?;
        self.logger.info(format!("Created symmetric key '{alias}'"));
        Ok(())
    }

    /// Generate and store a fresh key set
    pub fn create_key_set(&self, store: &mut KeyStore, alias: &str, password: &[u8]) -> Result<()> {
        let key_set = KeySet::generate();
        store.set_key_set(alias, &key_set, password)?;
        self.logger.info(format!("Created key set '{alias}'"));
        Ok(())
    }

    /// Create and store a standalone password lock
    pub fn create_key_set_lock(
        &self,
        store: &mut KeyStore,
        alias: &str,
        password: &[u8],
    ) -> Result<()> {
        store.set_key_set_lock(alias, password)?;
        self.logger.info(format!("Created key set lock '{alias}'"));
        Ok(())
    }

    /// Sign a certificate for `key_pair` with the signer entry and return
    /// the full new chain, leaf first.
    fn certify(
        &self,
        store: &KeyStore,
        key_pair: &KeyPair,
        subject_name: &str,
        usage: KeyUsage,
        signer_alias: &str,
        signer_password: &[u8],
    ) -> Result<Vec<X509Certificate>> {
        let signer_key_pair = store.get_key_pair(signer_alias, signer_password)?;
        let signer_chain = store.get_certificate_chain(signer_alias)?.ok_or_else(|| {
            KeyStoreError::InvalidOperation(format!(
                "Signer '{signer_alias}' is not a key pair entry"
            ))
        })?;
        let signer_leaf = signer_chain.first().ok_or_else(|| {
            KeyStoreError::InvalidOperation(format!("Signer '{signer_alias}' has no certificate"))
        })?;
        if !signer_leaf.key_usage()?.contains(KeyUsage::CERTIFICATE) {
            return Err(KeyStoreError::InvalidOperation(format!(
                "Signer '{signer_alias}' is not certified for certificate signing"
            )));
        }

        let signer = CertificateSigner::new(&signer_key_pair, signer_leaf);
        let certificate = signer.issue(
            subject_name,
            &key_pair.public_key_der()?,
            usage,
            DEFAULT_VALIDITY_DAYS,
        )?;

        let mut chain = Vec::with_capacity(signer_chain.len() + 1);
        chain.push(certificate);
        chain.extend(signer_chain);
        Ok(chain)
    }
}
