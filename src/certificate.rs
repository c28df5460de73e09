//! Certificate operations and X.509 certificate management
//!
//! Wraps DER-encoded X.509 certificates with the identity types the store's
//! certificate graph is keyed on, and provides the signing side: CA issuance
//! of certificates (OpenSSL) and self-signed roots (rcgen).

use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use std::time::{Duration, SystemTime};

// Certificate generation and parsing
use rcgen::{Certificate as RcgenCertificate, CertificateParams};
use x509_parser::prelude::*;

// OpenSSL for proper CA operations
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::{X509Builder, X509Extension, X509NameBuilder, X509};

use sha2::{Digest, Sha256};

use crate::error::{KeyStoreError, Result};
use crate::keypair::{KeyPair, KeyPairSpec, PublicKey};

/// Identifies an entity: a distinguished name plus a unique id derived from
/// the entity's public key (SHA-256 over the raw subject public key bits).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateId {
    pub name: String,
    pub key_id: Vec<u8>,
}

/// Composite lookup key for one certificate in the store's graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertificateKey {
    pub issuer: CertificateId,
    pub subject: CertificateId,
}

impl CertificateKey {
    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject
    }
}

/// Requested key usage, mapped onto X.509v3 keyUsage bits at issuance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyUsage {
    bits: u8,
}

impl KeyUsage {
    pub const NONE: KeyUsage = KeyUsage { bits: 0 };
    /// keyCertSign + cRLSign
    pub const CERTIFICATE: KeyUsage = KeyUsage { bits: 1 };
    /// digitalSignature
    pub const SIGNATURE: KeyUsage = KeyUsage { bits: 2 };
    /// keyEncipherment
    pub const KEY_ENCRYPT: KeyUsage = KeyUsage { bits: 4 };
    /// dataEncipherment
    pub const DATA_ENCRYPT: KeyUsage = KeyUsage { bits: 8 };
    /// keyAgreement
    pub const AGREEMENT: KeyUsage = KeyUsage { bits: 16 };

    pub fn contains(&self, other: KeyUsage) -> bool {
        self.bits & other.bits == other.bits
    }

    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// The openssl keyUsage extension value for these flags
    pub(crate) fn to_openssl_usage(&self) -> String {
        let mut parts = Vec::new();
        if self.contains(KeyUsage::CERTIFICATE) {
            parts.push("keyCertSign");
            parts.push("cRLSign");
        }
        if self.contains(KeyUsage::SIGNATURE) {
            parts.push("digitalSignature");
        }
        if self.contains(KeyUsage::KEY_ENCRYPT) {
            parts.push("keyEncipherment");
        }
        if self.contains(KeyUsage::DATA_ENCRYPT) {
            parts.push("dataEncipherment");
        }
        if self.contains(KeyUsage::AGREEMENT) {
            parts.push("keyAgreement");
        }
        parts.join(",")
    }
}

impl BitOr for KeyUsage {
    type Output = KeyUsage;
    fn bitor(self, rhs: KeyUsage) -> KeyUsage {
        KeyUsage {
            bits: self.bits | rhs.bits,
        }
    }
}

/// Standard X.509 certificate wrapper
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509Certificate {
    /// DER-encoded certificate bytes
    der_bytes: Vec<u8>,
    /// Certificate subject
    subject: String,
    /// Certificate issuer
    issuer: String,
    /// Raw serial number bytes
    serial: Vec<u8>,
    /// Raw subject public key bits
    public_key_bytes: Vec<u8>,
}

impl X509Certificate {
    /// Create from DER-encoded bytes
    pub fn from_der(der_bytes: Vec<u8>) -> Result<Self> {
        let (_, parsed) = x509_parser::certificate::X509Certificate::from_der(&der_bytes)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to parse certificate: {e}")))?;

        let subject = parsed.subject().to_string();
        let issuer = parsed.issuer().to_string();
        let serial = parsed.tbs_certificate.raw_serial().to_vec();
        let public_key_bytes = parsed.public_key().subject_public_key.data.to_vec();

        Ok(Self {
            der_bytes,
            subject,
            issuer,
            serial,
            public_key_bytes,
        })
    }

    /// Get DER-encoded bytes
    pub fn der_bytes(&self) -> &[u8] {
        &self.der_bytes
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Raw serial number bytes
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Raw subject public key bits (SEC1 point or Ed25519 key)
    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public_key_bytes
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_raw_bytes(&self.public_key_bytes)
    }

    /// Identity of the certified subject
    pub fn subject_id(&self) -> CertificateId {
        CertificateId {
            name: self.subject.clone(),
            key_id: Sha256::digest(&self.public_key_bytes).to_vec(),
        }
    }

    /// Graph key of a self-signed certificate
    pub fn self_key(&self) -> CertificateKey {
        let id = self.subject_id();
        CertificateKey {
            issuer: id.clone(),
            subject: id,
        }
    }

    /// Graph key of this certificate given its issuer's certificate
    pub fn key_under(&self, issuer: &X509Certificate) -> CertificateKey {
        CertificateKey {
            issuer: issuer.subject_id(),
            subject: self.subject_id(),
        }
    }

    /// Subject and issuer name match (necessary, not sufficient, for a root)
    pub fn is_self_signed(&self) -> bool {
        normalize_dn(&self.subject) == normalize_dn(&self.issuer)
    }

    /// Parse the certificate for validation
    pub fn parsed(&self) -> Result<x509_parser::certificate::X509Certificate> {
        let (_, cert) = x509_parser::certificate::X509Certificate::from_der(&self.der_bytes)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to parse certificate: {e}")))?;
        Ok(cert)
    }

    /// The keyUsage flags carried by this certificate
    pub fn key_usage(&self) -> Result<KeyUsage> {
        let parsed = self.parsed()?;
        let mut usage = KeyUsage::NONE;
        for ext in parsed.extensions() {
            if let ParsedExtension::KeyUsage(ku) = ext.parsed_extension() {
                if ku.key_cert_sign() {
                    usage = usage | KeyUsage::CERTIFICATE;
                }
                if ku.digital_signature() {
                    usage = usage | KeyUsage::SIGNATURE;
                }
                if ku.key_encipherment() {
                    usage = usage | KeyUsage::KEY_ENCRYPT;
                }
                if ku.data_encipherment() {
                    usage = usage | KeyUsage::DATA_ENCRYPT;
                }
                if ku.key_agreement() {
                    usage = usage | KeyUsage::AGREEMENT;
                }
            }
        }
        Ok(usage)
    }

    fn check_time_bounds(parsed: &x509_parser::certificate::X509Certificate) -> Result<()> {
        let now = SystemTime::now();
        let validity = parsed.validity();

        let not_before: SystemTime = validity.not_before.to_datetime().into();
        let not_after: SystemTime = validity.not_after.to_datetime().into();

        if now < not_before {
            return Err(KeyStoreError::ChainValidation(
                "Certificate not yet valid".to_string(),
            ));
        }
        if now > not_after {
            return Err(KeyStoreError::ChainValidation(
                "Certificate expired".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate time bounds and the signature against the issuing
    /// certificate's public key
    pub fn validate_issued_by(&self, issuer: &X509Certificate) -> Result<()> {
        let parsed = self.parsed()?;
        Self::check_time_bounds(&parsed)?;

        let issuer_parsed = issuer.parsed()?;
        parsed
            .verify_signature(Some(issuer_parsed.public_key()))
            .map_err(|e| {
                KeyStoreError::ChainValidation(format!("Signature verification failed: {e}"))
            })
    }

    /// Validate this certificate as a self-signed root
    pub fn validate_self_signed(&self) -> Result<()> {
        if !self.is_self_signed() {
            return Err(KeyStoreError::ChainValidation(
                "Invalid root certificate".to_string(),
            ));
        }
        let parsed = self.parsed()?;
        Self::check_time_bounds(&parsed)?;
        parsed
            .verify_signature(None)
            .map_err(|_| KeyStoreError::ChainValidation("Invalid root certificate".to_string()))
    }
}

impl Serialize for X509Certificate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.der_bytes.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for X509Certificate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let der_bytes: Vec<u8> = Vec::deserialize(deserializer)?;
        Self::from_der(der_bytes).map_err(|e| {
            serde::de::Error::custom(format!("Failed to deserialize certificate: {e}"))
        })
    }
}

/// Normalize a DN string to tolerate component order/spacing differences
/// between the OpenSSL and rcgen name builders
pub(crate) fn normalize_dn(dn: &str) -> String {
    let mut components: Vec<&str> = dn
        .split(',')
        .map(|component| component.trim())
        .filter(|component| !component.is_empty())
        .collect();
    components.sort_unstable();
    components.join(",")
}

/// Default validity for issued certificates
pub const DEFAULT_VALIDITY_DAYS: u32 = 365;

/// Default validity for self-signed roots
pub const ROOT_VALIDITY_DAYS: u32 = 3650;

/// Certificate issuance with a CA key pair and its certificate
pub struct CertificateSigner<'a> {
    key_pair: &'a KeyPair,
    certificate: &'a X509Certificate,
}

impl<'a> CertificateSigner<'a> {
    pub fn new(key_pair: &'a KeyPair, certificate: &'a X509Certificate) -> Self {
        Self {
            key_pair,
            certificate,
        }
    }

    /// Issue a certificate binding `subject_public_key_der` (SPKI) to
    /// `subject_name`, signed with the CA private key.
    ///
    /// The issuer name is copied from the CA certificate at the DER level so
    /// subject/issuer strings compare equal after reparsing.
    pub fn issue(
        &self,
        subject_name: &str,
        subject_public_key_der: &[u8],
        usage: KeyUsage,
        validity_days: u32,
    ) -> Result<X509Certificate> {
        let subject_public_key = PKey::public_key_from_der(subject_public_key_der).map_err(|e| {
            KeyStoreError::Certificate(format!("Failed to parse subject public key: {e}"))
        })?;

        let private_key_der = self.key_pair.private_key_der()?;
        let ca_private_key = PKey::private_key_from_der(&private_key_der).map_err(|e| {
            KeyStoreError::InvalidKeyFormat(format!("Failed to convert key to OpenSSL format: {e}"))
        })?;

        let ca_cert = X509::from_der(self.certificate.der_bytes()).map_err(|e| {
            KeyStoreError::Certificate(format!("Failed to parse CA certificate: {e}"))
        })?;

        let mut cert_builder = X509Builder::new().map_err(|e| {
            KeyStoreError::Certificate(format!("Failed to create certificate builder: {e}"))
        })?;

        cert_builder
            .set_version(2)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set version: {e}")))?;

        cert_builder
            .set_pubkey(&subject_public_key)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set public key: {e}")))?;

        let subject = build_name(subject_name)?;
        cert_builder
            .set_subject_name(&subject)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set subject name: {e}")))?;

        cert_builder
            .set_issuer_name(ca_cert.subject_name())
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set issuer name: {e}")))?;

        let not_before = openssl::asn1::Asn1Time::days_from_now(0).map_err(|e| {
            KeyStoreError::Certificate(format!("Failed to create not_before time: {e}"))
        })?;
        let not_after = openssl::asn1::Asn1Time::days_from_now(validity_days).map_err(|e| {
            KeyStoreError::Certificate(format!("Failed to create not_after time: {e}"))
        })?;
        cert_builder
            .set_not_before(&not_before)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set not_before: {e}")))?;
        cert_builder
            .set_not_after(&not_after)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set not_after: {e}")))?;

        let serial_number = {
            let mut bn = BigNum::new()
                .map_err(|e| KeyStoreError::Certificate(format!("Failed to create BigNum: {e}")))?;
            bn.rand(64, MsbOption::MAYBE_ZERO, false).map_err(|e| {
                KeyStoreError::Certificate(format!("Failed to generate random serial: {e}"))
            })?;
            bn.to_asn1_integer().map_err(|e| {
                KeyStoreError::Certificate(format!("Failed to convert serial to ASN1: {e}"))
            })?
        };
        cert_builder
            .set_serial_number(&serial_number)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to set serial number: {e}")))?;

        if !usage.is_empty() {
            let usage_value = usage.to_openssl_usage();
            cert_builder
                .append_extension(
                    X509Extension::new_nid(None, None, Nid::KEY_USAGE, &usage_value).map_err(
                        |e| {
                            KeyStoreError::Certificate(format!(
                                "Failed to create key usage extension: {e}"
                            ))
                        },
                    )?,
                )
                .map_err(|e| {
                    KeyStoreError::Certificate(format!("Failed to add key usage extension: {e}"))
                })?;
        }

        if usage.contains(KeyUsage::CERTIFICATE) {
            cert_builder
                .append_extension(
                    X509Extension::new_nid(None, None, Nid::BASIC_CONSTRAINTS, "critical,CA:TRUE")
                        .map_err(|e| {
                            KeyStoreError::Certificate(format!(
                                "Failed to create basic constraints extension: {e}"
                            ))
                        })?,
                )
                .map_err(|e| {
                    KeyStoreError::Certificate(format!(
                        "Failed to add basic constraints extension: {e}"
                    ))
                })?;
        }

        // Ed25519 signing uses the EdDSA internal digest
        let digest = match self.key_pair.spec() {
            KeyPairSpec::EcdsaP256 => MessageDigest::sha256(),
            KeyPairSpec::Ed25519 => MessageDigest::null(),
        };
        cert_builder
            .sign(&ca_private_key, digest)
            .map_err(|e| KeyStoreError::Certificate(format!("Failed to sign certificate: {e}")))?;

        let cert_der = cert_builder.build().to_der().map_err(|e| {
            KeyStoreError::Certificate(format!("Failed to convert certificate to DER: {e}"))
        })?;

        X509Certificate::from_der(cert_der)
    }
}

/// Build an OpenSSL name from a `CN=...,O=...` style DN string
fn build_name(dn: &str) -> Result<openssl::x509::X509Name> {
    let mut name_builder = X509NameBuilder::new()
        .map_err(|e| KeyStoreError::Certificate(format!("Failed to create name builder: {e}")))?;

    for component in dn.split(',') {
        let component = component.trim();
        if let Some((key, value)) = component.split_once('=') {
            let nid = match key.trim() {
                "CN" => Nid::COMMONNAME,
                "O" => Nid::ORGANIZATIONNAME,
                "C" => Nid::COUNTRYNAME,
                "ST" => Nid::STATEORPROVINCENAME,
                "L" => Nid::LOCALITYNAME,
                "OU" => Nid::ORGANIZATIONALUNITNAME,
                // Unknown DN components are skipped
                _ => continue,
            };
            name_builder
                .append_entry_by_nid(nid, value.trim())
                .map_err(|e| {
                    KeyStoreError::Certificate(format!("Failed to set name component: {e}"))
                })?;
        }
    }

    Ok(name_builder.build())
}

/// Create a self-signed CA root certificate for a key pair
pub fn create_self_signed(
    key_pair: &KeyPair,
    subject_name: &str,
    validity_days: u32,
) -> Result<X509Certificate> {
    let mut params = CertificateParams::new(vec![]);

    let mut distinguished_name = rcgen::DistinguishedName::new();
    for component in subject_name.split(',') {
        let component = component.trim();
        if let Some((key, value)) = component.split_once('=') {
            let dn_type = match key.trim() {
                "CN" => rcgen::DnType::CommonName,
                "O" => rcgen::DnType::OrganizationName,
                "C" => rcgen::DnType::CountryName,
                "ST" => rcgen::DnType::StateOrProvinceName,
                "L" => rcgen::DnType::LocalityName,
                "OU" => rcgen::DnType::OrganizationalUnitName,
                _ => continue,
            };
            distinguished_name.push(dn_type, value.trim());
        }
    }
    params.distinguished_name = distinguished_name;

    params.alg = match key_pair.spec() {
        KeyPairSpec::EcdsaP256 => &rcgen::PKCS_ECDSA_P256_SHA256,
        KeyPairSpec::Ed25519 => &rcgen::PKCS_ED25519,
    };

    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![
        rcgen::KeyUsagePurpose::KeyCertSign,
        rcgen::KeyUsagePurpose::CrlSign,
    ];
    params.serial_number = Some(rcgen::SerialNumber::from(rand::random::<u64>()));

    let not_before = SystemTime::now();
    let not_after = not_before + Duration::from_secs(u64::from(validity_days) * 24 * 60 * 60);
    params.not_before = not_before.into();
    params.not_after = not_after.into();

    let rcgen_key_pair = key_pair.to_rcgen_key_pair()?;
    params.key_pair = Some(rcgen_key_pair);

    let cert = RcgenCertificate::from_params(params)
        .map_err(|e| KeyStoreError::Certificate(format!("Failed to build root params: {e}")))?;
    let cert_der = cert
        .serialize_der()
        .map_err(|e| KeyStoreError::Certificate(format!("Failed to serialize root: {e}")))?;

    X509Certificate::from_der(cert_der)
}
