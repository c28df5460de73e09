//! Store and manager integration tests
//!
//! Exercises the alias surface, the certificate graph invariants (chain
//! validation, symmetry, orphan cascade) and the encrypted entry
//! round-trips with real keys and certificates throughout.

use certstore::{
    error::{ErrorKind, Result},
    logging::{Component, Logger},
    store::{StoreSecret, SymKeyType},
    CertificateSigner, KeyPairSpec, KeyStore, KeyStoreManager, KeyUsage, X509Certificate,
};
use std::sync::Arc;

fn create_test_logger(scope: &str) -> Arc<Logger> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Logger::new_root(Component::Custom("Test"), scope))
}

/// Store with a root key pair under "root" and its certificate trusted
/// under "root-cert"
fn store_with_root(scope: &str) -> Result<(KeyStore, KeyStoreManager)> {
    let logger = create_test_logger(scope);
    let mut store = KeyStore::new(logger.clone());
    let manager = KeyStoreManager::new(logger);

    manager.create_root_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Test Root CA, O=Certstore",
        "root",
        b"root-pw",
    )?;
    let root_cert = root_certificate(&store)?;
    store.set_certificate("root-cert", &root_cert)?;
    Ok((store, manager))
}

fn root_certificate(store: &KeyStore) -> Result<X509Certificate> {
    let chain = store
        .get_certificate_chain("root")?
        .expect("root must be a key pair");
    Ok(chain[0].clone())
}

#[test]
fn test_root_key_pair_round_trip() -> Result<()> {
    let (store, _) = store_with_root("root-round-trip")?;

    let key_pair = store.get_key_pair("root", b"root-pw")?;
    assert_eq!(key_pair.spec(), KeyPairSpec::EcdsaP256);

    let chain = store.get_certificate_chain("root")?.expect("chain");
    assert_eq!(chain.len(), 1);
    chain[0].validate_self_signed()?;
    assert_eq!(chain[0].public_key_bytes(), key_pair.public_key_bytes());

    // Wrong password fails AEAD verification, never returns a key
    let err = store.get_key_pair("root", b"wrong").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    Ok(())
}

#[test]
fn test_issued_chain_requires_trusted_root() -> Result<()> {
    let logger = create_test_logger("untrusted-root");
    let mut store = KeyStore::new(logger.clone());
    let manager = KeyStoreManager::new(logger);

    manager.create_root_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Test Root CA, O=Certstore",
        "root",
        b"root-pw",
    )?;

    // Root exists as a key pair but is not yet a trusted certificate
    let err = manager
        .create_key_pair(
            &mut store,
            KeyPairSpec::EcdsaP256,
            "CN=Leaf One, O=Certstore",
            KeyUsage::SIGNATURE,
            "root",
            b"root-pw",
            "leaf1",
            b"leaf-pw",
        )
        .unwrap_err();
    assert!(err.to_string().contains("not trusted"), "got: {err}");
    assert!(!store.contains_alias("leaf1"));

    // After trusting the root the same call goes through
    let root_cert = root_certificate(&store)?;
    store.set_certificate("root-cert", &root_cert)?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;

    let chain = store.get_certificate_chain("leaf1")?.expect("chain");
    assert_eq!(chain.len(), 2);
    chain[0].validate_issued_by(&chain[1])?;
    Ok(())
}

#[test]
fn test_certificate_graph_symmetry() -> Result<()> {
    let (mut store, manager) = store_with_root("graph-symmetry")?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;

    // Every certificate reachable by subject is reachable by issuer too
    for (key, cert) in store.certificates() {
        let issued = store.certificates_by_issuer(&key.issuer);
        assert!(
            issued.iter().any(|c| c.der_bytes() == cert.der_bytes()),
            "certificate for '{}' missing from issuer index",
            cert.subject()
        );
    }

    let root_cert = root_certificate(&store)?;
    let issued = store.certificates_by_issuer(&root_cert.subject_id());
    // The root issued itself and the leaf
    assert_eq!(issued.len(), 2);
    Ok(())
}

#[test]
fn test_ed25519_key_pair() -> Result<()> {
    let logger = create_test_logger("ed25519");
    let mut store = KeyStore::new(logger.clone());
    let manager = KeyStoreManager::new(logger);

    manager.create_root_key_pair(
        &mut store,
        KeyPairSpec::Ed25519,
        "CN=Ed Root, O=Certstore",
        "ed-root",
        b"pw",
    )?;
    let key_pair = store.get_key_pair("ed-root", b"pw")?;
    assert_eq!(key_pair.spec(), KeyPairSpec::Ed25519);
    assert_eq!(key_pair.public_key_bytes().len(), 32);

    let chain = store.get_certificate_chain("ed-root")?.expect("chain");
    chain[0].validate_self_signed()?;

    // Ed25519 cannot satisfy encryption usage
    let err = KeyStoreManager::validate_usage(KeyPairSpec::Ed25519, KeyUsage::KEY_ENCRYPT)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Logic);
    Ok(())
}

#[test]
fn test_alias_conflicts_across_variants() -> Result<()> {
    let (mut store, manager) = store_with_root("alias-conflict")?;
    manager.create_key(&mut store, SymKeyType::Aes256, "shared", b"pw")?;

    let root_cert = root_certificate(&store)?;
    let err = store.set_certificate("shared", &root_cert).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("Key"), "got: {err}");

    // Same-variant replacement is allowed
    manager.create_key(&mut store, SymKeyType::ChaCha20, "shared", b"pw2")?;
    match store.get_entry("shared", b"pw2")? {
        StoreSecret::Key { key_type, bytes } => {
            assert_eq!(key_type, SymKeyType::ChaCha20);
            assert_eq!(bytes.len(), 32);
        }
        _ => panic!("expected a symmetric key entry"),
    }
    Ok(())
}

#[test]
fn test_symmetric_entries_round_trip() -> Result<()> {
    let (mut store, manager) = store_with_root("symmetric-entries")?;

    manager.create_key(&mut store, SymKeyType::Aes256, "aes", b"key-pw")?;
    manager.create_key_set(&mut store, "keyset", b"set-pw")?;
    manager.create_key_set_lock(&mut store, "lock", b"lk")?;

    match store.get_entry("aes", b"key-pw")? {
        StoreSecret::Key { key_type, bytes } => {
            assert_eq!(key_type, SymKeyType::Aes256);
            assert_eq!(bytes.len(), 32);
        }
        _ => panic!("expected a symmetric key entry"),
    }

    // A stored key set encrypts and decrypts after the round trip
    match store.get_entry("keyset", b"set-pw")? {
        StoreSecret::KeySet(key_set) => {
            let sealed = key_set.secure(b"payload")?;
            assert_eq!(key_set.derive(&sealed)?.as_slice(), b"payload");
        }
        _ => panic!("expected a key set entry"),
    }

    // A standalone lock derives the same key set for the same password
    let (a, b) = match (store.get_entry("lock", b"lk")?, store.get_entry("lock", b"lk")?) {
        (StoreSecret::KeySet(a), StoreSecret::KeySet(b)) => (a, b),
        _ => panic!("expected key sets from the lock entry"),
    };
    let sealed = a.secure(b"locked")?;
    assert_eq!(b.derive(&sealed)?.as_slice(), b"locked");

    // A wrong password does not unlock the entry
    let err = store.get_entry("lock", b"not-lk").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    Ok(())
}

#[test]
fn test_delete_cascade_removes_orphans() -> Result<()> {
    let (mut store, manager) = store_with_root("delete-cascade")?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf Two, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf2",
        b"leaf-pw",
    )?;
    assert_eq!(store.certificates().len(), 3);

    // Removing one leaf leaves the root (still referenced) and the other
    store.delete_entry("leaf1")?;
    assert_eq!(store.certificates().len(), 2);

    // Removing the root key pair keeps the root certificate: the trusted
    // alias and leaf2's chain still reference it
    store.delete_entry("root")?;
    assert_eq!(store.certificates().len(), 2);

    // With leaf2 and the trust anchor gone the graph empties out
    store.delete_entry("leaf2")?;
    store.delete_entry("root-cert")?;
    assert!(store.certificates().is_empty());
    Ok(())
}

#[test]
fn test_update_chain_rejects_foreign_key() -> Result<()> {
    let (mut store, manager) = store_with_root("foreign-key")?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;

    // A chain certifying a different key must be rejected
    let other = certstore::KeyPair::generate(KeyPairSpec::EcdsaP256);
    let other_cert =
        certstore::create_self_signed(&other, "CN=Leaf One, O=Certstore", 365)?;
    let err = store
        .update_certificate_chain("leaf1", &[other_cert])
        .unwrap_err();
    assert!(err.to_string().contains("publicKey"), "got: {err}");

    // Original chain untouched
    let chain = store.get_certificate_chain("leaf1")?.expect("chain");
    assert_eq!(chain.len(), 2);
    Ok(())
}

#[test]
fn test_cross_ca_reissuance_is_allowed() -> Result<()> {
    let (mut store, manager) = store_with_root("cross-ca")?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;

    // A second, unrelated CA re-issues a certificate for the same subject
    // and the same key
    let second_ca = certstore::KeyPair::generate(KeyPairSpec::EcdsaP256);
    let second_root =
        certstore::create_self_signed(&second_ca, "CN=Second Root CA, O=Certstore", 3650)?;
    store.set_certificate("second-root", &second_root)?;

    let leaf_key = store.get_key_pair("leaf1", b"leaf-pw")?;
    let signer = CertificateSigner::new(&second_ca, &second_root);
    let reissued = signer.issue(
        "CN=Leaf One, O=Certstore",
        &leaf_key.public_key_der()?,
        KeyUsage::SIGNATURE,
        365,
    )?;

    store.update_certificate_chain("leaf1", &[reissued, second_root.clone()])?;
    let chain = store.get_certificate_chain("leaf1")?.expect("chain");
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[1].der_bytes(), second_root.der_bytes());
    Ok(())
}

#[test]
fn test_reordered_issuer_dn_does_not_bypass_key_match() -> Result<()> {
    // "root" holds CN=Test Root CA, O=Certstore
    let (mut store, manager) = store_with_root("reordered-dn")?;

    // A second root names the same components in a different order but
    // carries a different key
    let impostor = certstore::KeyPair::generate(KeyPairSpec::EcdsaP256);
    let impostor_root =
        certstore::create_self_signed(&impostor, "O=Certstore, CN=Test Root CA", 3650)?;
    store.set_certificate("impostor-root", &impostor_root)?;

    let leaf = certstore::KeyPair::generate(KeyPairSpec::EcdsaP256);
    let leaf_cert = CertificateSigner::new(&impostor, &impostor_root).issue(
        "CN=Impostor Leaf, O=Certstore",
        &leaf.public_key_der()?,
        KeyUsage::SIGNATURE,
        365,
    )?;

    let err = store
        .set_key_pair("impostor-leaf", &leaf, b"pw", &[leaf_cert, impostor_root])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("publicKey"), "got: {err}");
    Ok(())
}

#[test]
fn test_find_issuer_cert() -> Result<()> {
    let (mut store, manager) = store_with_root("find-issuer")?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;

    let chain = store.get_certificate_chain("leaf1")?.expect("chain");
    let leaf = &chain[0];
    let (alias, cert) = store.find_issuer_cert(leaf.issuer(), leaf.serial())?;
    assert_eq!(alias, "leaf1");
    assert_eq!(cert.der_bytes(), leaf.der_bytes());

    let err = store
        .find_issuer_cert("CN=Nobody, O=Certstore", &[1, 2, 3])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    Ok(())
}

#[test]
fn test_create_alternate_reuses_key() -> Result<()> {
    let (mut store, manager) = store_with_root("alternate")?;
    manager.create_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        "CN=Leaf One, O=Certstore",
        KeyUsage::SIGNATURE,
        "root",
        b"root-pw",
        "leaf1",
        b"leaf-pw",
    )?;
    manager.create_alternate(
        &mut store,
        "leaf1",
        b"leaf-pw",
        "CN=Leaf One Alt, O=Certstore",
        KeyUsage::SIGNATURE | KeyUsage::AGREEMENT,
        "root",
        b"root-pw",
        "leaf1-alt",
        b"alt-pw",
    )?;

    let original = store.get_key_pair("leaf1", b"leaf-pw")?;
    let alternate = store.get_key_pair("leaf1-alt", b"alt-pw")?;
    assert_eq!(original.public_key_bytes(), alternate.public_key_bytes());

    let chain = store.get_certificate_chain("leaf1-alt")?.expect("chain");
    let usage = chain[0].key_usage()?;
    assert!(usage.contains(KeyUsage::AGREEMENT));
    Ok(())
}
