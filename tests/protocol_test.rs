//! End-to-end certificate-management protocol tests
//!
//! Simulates a requester and an issuing CA as two stores with their own
//! gateways. In a real deployment the armored messages would travel over
//! some transport; here they are handed across directly.

use certstore::{
    armor::{self, BlockKind},
    error::{ErrorKind, Result},
    logging::{Component, Logger},
    message::{self, CertificateAck, CertificateRequest},
    KeyPairSpec, KeyStore, KeyStoreGateway, KeyStoreManager, KeyUsage, ProofMethod,
    X509Certificate,
};
use std::sync::Arc;

fn create_test_logger(scope: &str) -> Arc<Logger> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(Logger::new_root(Component::Custom("Test"), scope))
}

const CA_NAME: &str = "CN=Protocol CA, O=Certstore";
const NODE_NAME: &str = "CN=Node One, O=Certstore";

struct Party {
    store: KeyStore,
    gateway: KeyStoreGateway,
}

fn passwords(pairs: &[(&str, &[u8])]) -> Box<dyn Fn(&str) -> Option<Vec<u8>>> {
    let pairs: Vec<(String, Vec<u8>)> = pairs
        .iter()
        .map(|(alias, pw)| (alias.to_string(), pw.to_vec()))
        .collect();
    Box::new(move |alias| {
        pairs
            .iter()
            .find(|(a, _)| a == alias)
            .map(|(_, pw)| pw.clone())
    })
}

/// CA party with a root key pair under "ca"
fn make_issuer(scope: &str) -> Result<Party> {
    let logger = create_test_logger(scope);
    let mut store = KeyStore::new(logger.clone());
    let manager = KeyStoreManager::new(logger.clone());
    manager.create_root_key_pair(&mut store, KeyPairSpec::EcdsaP256, CA_NAME, "ca", b"ca-pw")?;

    let mut gateway = KeyStoreGateway::new(logger);
    gateway.set_certifier("ca");
    gateway.set_password_resolver(passwords(&[("ca", b"ca-pw"), ("ca-enc", b"enc-pw")]));
    Ok(Party { store, gateway })
}

/// Requester party with a self-signed key pair under "node" that already
/// trusts the issuer's root
fn make_requester(scope: &str, issuer: &Party) -> Result<Party> {
    let logger = create_test_logger(scope);
    let mut store = KeyStore::new(logger.clone());
    let manager = KeyStoreManager::new(logger.clone());
    manager.create_root_key_pair(
        &mut store,
        KeyPairSpec::EcdsaP256,
        NODE_NAME,
        "node",
        b"node-pw",
    )?;

    let ca_chain = issuer
        .store
        .get_certificate_chain("ca")?
        .expect("issuer root chain");
    store.set_certificate("trusted-ca", &ca_chain[0])?;

    let mut gateway = KeyStoreGateway::new(logger);
    gateway.set_password_resolver(passwords(&[("node", b"node-pw")]));
    Ok(Party { store, gateway })
}

fn run_exchange(requester: &mut Party, issuer: &mut Party, alias: &str) -> Result<()> {
    let request = requester
        .gateway
        .create_certificate_request(&requester.store, alias)?;
    let response = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)?;
    let ack = requester
        .gateway
        .process_certificate_response(&mut requester.store, &response)?;
    issuer
        .gateway
        .process_certificate_ack(&mut issuer.store, &ack)
}

#[test]
fn test_protocol_happy_path() -> Result<()> {
    let mut issuer = make_issuer("happy-issuer")?;
    let mut requester = make_requester("happy-requester", &issuer)?;

    run_exchange(&mut requester, &mut issuer, "node")?;

    // The requester's alias now carries the CA-issued chain
    let chain = requester
        .store
        .get_certificate_chain("node")?
        .expect("chain");
    assert_eq!(chain.len(), 2);
    chain[0].validate_issued_by(&chain[1])?;
    assert!(chain[1].subject().contains("Protocol CA"));

    // The issuer recorded the issued certificate in its own graph, under
    // its allocation alias
    let ca_chain = issuer.store.get_certificate_chain("ca")?.expect("chain");
    let issued = issuer
        .store
        .certificates_by_issuer(&ca_chain[0].subject_id());
    assert!(issued.iter().any(|c| c.subject().contains("Node One")));
    assert!(issuer
        .store
        .aliases()
        .iter()
        .any(|a| a.starts_with("AllocatedCertificate_")));
    Ok(())
}

#[test]
fn test_response_with_changed_subject_is_rejected() -> Result<()> {
    let mut issuer = make_issuer("changed-subject-issuer")?;
    let mut requester = make_requester("changed-subject-requester", &issuer)?;

    let request = requester.gateway.create_certificate_request_using(
        &requester.store,
        "node",
        ProofMethod::IndirectConfirmation,
    )?;

    // A dishonest CA binds the requester's key to another identity
    let payload = armor::dearmor_expect(BlockKind::CertificateRequest, &request)?;
    let mut decoded: CertificateRequest =
        bincode::deserialize(&payload).expect("request decodes");
    decoded.body.subject_name = "CN=Administrator, O=Certstore".to_string();
    let tampered = armor::enarmor(
        BlockKind::CertificateRequest,
        &bincode::serialize(&decoded).expect("request encodes"),
    );
    let response = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &tampered)?;

    let err = requester
        .gateway
        .process_certificate_response(&mut requester.store, &response)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("subjectName"), "got: {err}");

    // The alias still carries its original self-signed chain
    let chain = requester
        .store
        .get_certificate_chain("node")?
        .expect("chain");
    assert_eq!(chain.len(), 1);
    Ok(())
}

#[test]
fn test_request_carries_leaf_usage_verbatim() -> Result<()> {
    let mut issuer = make_issuer("usage-issuer")?;
    let mut requester = make_requester("usage-requester", &issuer)?;

    // A key pair whose leaf carries no keyUsage extension at all
    let manager = KeyStoreManager::new(create_test_logger("usage-manager"));
    let node_chain = requester
        .store
        .get_certificate_chain("node")?
        .expect("chain");
    requester.store.set_certificate("node-root", &node_chain[0])?;
    manager.create_key_pair(
        &mut requester.store,
        KeyPairSpec::EcdsaP256,
        "CN=Plain Node, O=Certstore",
        KeyUsage::NONE,
        "node",
        b"node-pw",
        "plain",
        b"plain-pw",
    )?;
    requester
        .gateway
        .set_password_resolver(passwords(&[("node", b"node-pw"), ("plain", b"plain-pw")]));

    run_exchange(&mut requester, &mut issuer, "plain")?;

    // The issued certificate mirrors the requested (empty) usage
    let chain = requester
        .store
        .get_certificate_chain("plain")?
        .expect("chain");
    assert_eq!(chain.len(), 2);
    assert!(chain[0].key_usage()?.is_empty());
    Ok(())
}

#[test]
fn test_protocol_with_pkmac() -> Result<()> {
    let mut issuer = make_issuer("pkmac-issuer")?;
    let mut requester = make_requester("pkmac-requester", &issuer)?;

    let shared = b"out-of-band secret".to_vec();
    let secret = shared.clone();
    requester
        .gateway
        .set_mac_secret_resolver(Box::new(move |_| Some(secret.clone())));
    let secret = shared;
    issuer
        .gateway
        .set_mac_secret_resolver(Box::new(move |_| Some(secret.clone())));

    run_exchange(&mut requester, &mut issuer, "node")?;
    assert_eq!(
        requester
            .store
            .get_certificate_chain("node")?
            .expect("chain")
            .len(),
        2
    );
    Ok(())
}

#[test]
fn test_pkmac_secret_mismatch_rejects_request() -> Result<()> {
    let mut issuer = make_issuer("mismatch-issuer")?;
    let mut requester = make_requester("mismatch-requester", &issuer)?;

    requester
        .gateway
        .set_mac_secret_resolver(Box::new(|_| Some(b"alpha".to_vec())));
    issuer
        .gateway
        .set_mac_secret_resolver(Box::new(|_| Some(b"bravo".to_vec())));

    let request = requester
        .gateway
        .create_certificate_request(&requester.store, "node")?;
    let err = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("PKMAC"), "got: {err}");
    Ok(())
}

#[test]
fn test_pkmac_presence_mismatch_is_hard_error() -> Result<()> {
    let mut issuer = make_issuer("presence-issuer")?;
    let mut requester = make_requester("presence-requester", &issuer)?;

    // Only the issuer expects a MAC
    issuer
        .gateway
        .set_mac_secret_resolver(Box::new(|_| Some(b"secret".to_vec())));

    let request = requester
        .gateway
        .create_certificate_request(&requester.store, "node")?;
    let err = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)
        .unwrap_err();
    assert!(err.to_string().contains("PKMAC"), "got: {err}");
    Ok(())
}

#[test]
fn test_pkmac_value_rejects_bit_flips() -> Result<()> {
    let mut value = message::create_pkmac_value(b"secret", b"some signed data")?;
    assert!(message::check_pkmac_value(
        b"secret",
        b"some signed data",
        &value
    ));
    assert!(!message::check_pkmac_value(
        b"secret",
        b"some other data",
        &value
    ));
    assert!(!message::check_pkmac_value(
        b"wrong",
        b"some signed data",
        &value
    ));

    value.mac[0] ^= 0x01;
    assert!(!message::check_pkmac_value(
        b"secret",
        b"some signed data",
        &value
    ));
    Ok(())
}

#[test]
fn test_tampered_ack_digest_keeps_pending_entry() -> Result<()> {
    let mut issuer = make_issuer("tamper-issuer")?;
    let mut requester = make_requester("tamper-requester", &issuer)?;

    let request = requester
        .gateway
        .create_certificate_request(&requester.store, "node")?;
    let response = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)?;
    let ack = requester
        .gateway
        .process_certificate_response(&mut requester.store, &response)?;

    // Flip one digest byte inside the armored ack
    let payload = armor::dearmor_expect(BlockKind::CertificateAck, &ack)?;
    let mut decoded: CertificateAck =
        bincode::deserialize(&payload).expect("ack decodes");
    decoded.digest[0] ^= 0x01;
    let tampered = armor::enarmor(
        BlockKind::CertificateAck,
        &bincode::serialize(&decoded).expect("ack encodes"),
    );

    let err = issuer
        .gateway
        .process_certificate_ack(&mut issuer.store, &tampered)
        .unwrap_err();
    assert!(err.to_string().contains("Invalid digest"), "got: {err}");

    // The pending entry survived: the genuine ack still completes
    issuer
        .gateway
        .process_certificate_ack(&mut issuer.store, &ack)?;
    Ok(())
}

#[test]
fn test_unknown_ids_are_rejected() -> Result<()> {
    let mut issuer = make_issuer("unknown-issuer")?;
    let mut requester = make_requester("unknown-requester", &issuer)?;

    let ack = armor::enarmor(
        BlockKind::CertificateAck,
        &bincode::serialize(&CertificateAck {
            response_id: 999,
            digest: vec![0; 32],
        })
        .expect("ack encodes"),
    );
    let err = issuer
        .gateway
        .process_certificate_ack(&mut issuer.store, &ack)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Data);
    assert!(err.to_string().contains("not recognised"), "got: {err}");

    // A response for a request this gateway never made is refused too
    let request = requester
        .gateway
        .create_certificate_request(&requester.store, "node")?;
    let response = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)?;
    let mut stranger = make_requester("unknown-stranger", &issuer)?;
    let err = stranger
        .gateway
        .process_certificate_response(&mut stranger.store, &response)
        .unwrap_err();
    assert!(err.to_string().contains("not recognised"), "got: {err}");
    Ok(())
}

#[test]
fn test_encrypted_key_proof_flow() -> Result<()> {
    let mut issuer = make_issuer("enc-proof-issuer")?;

    // The CA's encryption identity: an encryption-capable key pair signed
    // by the CA root
    let manager = KeyStoreManager::new(create_test_logger("enc-proof-manager"));
    let ca_chain = issuer.store.get_certificate_chain("ca")?.expect("chain");
    issuer.store.set_certificate("ca-trust", &ca_chain[0])?;
    manager.create_key_pair(
        &mut issuer.store,
        KeyPairSpec::EcdsaP256,
        "CN=Protocol CA Encryption, O=Certstore",
        KeyUsage::KEY_ENCRYPT,
        "ca",
        b"ca-pw",
        "ca-enc",
        b"enc-pw",
    )?;
    issuer.gateway.set_encryption_target("ca-enc");

    let mut requester = make_requester("enc-proof-requester", &issuer)?;
    let enc_chain = issuer
        .store
        .get_certificate_chain("ca-enc")?
        .expect("chain");
    requester
        .store
        .set_certificate("ca-enc-cert", &enc_chain[0])?;
    requester.gateway.set_encryption_target("ca-enc-cert");

    let request = requester.gateway.create_certificate_request_using(
        &requester.store,
        "node",
        ProofMethod::EncryptedKey,
    )?;
    let response = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)?;
    let ack = requester
        .gateway
        .process_certificate_response(&mut requester.store, &response)?;
    issuer
        .gateway
        .process_certificate_ack(&mut issuer.store, &ack)?;

    let chain = requester
        .store
        .get_certificate_chain("node")?
        .expect("chain");
    assert_eq!(chain.len(), 2);
    Ok(())
}

#[test]
fn test_indirect_confirmation_installs_after_ack() -> Result<()> {
    let mut issuer = make_issuer("indirect-issuer")?;
    let mut requester = make_requester("indirect-requester", &issuer)?;

    let request = requester.gateway.create_certificate_request_using(
        &requester.store,
        "node",
        ProofMethod::IndirectConfirmation,
    )?;
    let response = issuer
        .gateway
        .process_certificate_request(&mut issuer.store, &request)?;

    // The issued certificate is not in the issuer's graph until the ack
    let ca_chain = issuer.store.get_certificate_chain("ca")?.expect("chain");
    let issued_before = issuer
        .store
        .certificates_by_issuer(&ca_chain[0].subject_id())
        .iter()
        .filter(|c| c.subject().contains("Node One"))
        .count();
    assert_eq!(issued_before, 0);
    assert!(!issuer
        .store
        .aliases()
        .iter()
        .any(|a| a.starts_with("AllocatedCertificate_")));

    let ack = requester
        .gateway
        .process_certificate_response(&mut requester.store, &response)?;
    issuer
        .gateway
        .process_certificate_ack(&mut issuer.store, &ack)?;

    let issued_after = issuer
        .store
        .certificates_by_issuer(&ca_chain[0].subject_id())
        .iter()
        .filter(|c| c.subject().contains("Node One"))
        .count();
    assert_eq!(issued_after, 1);
    assert!(issuer
        .store
        .aliases()
        .iter()
        .any(|a| a.starts_with("AllocatedCertificate_")));

    let chain = requester
        .store
        .get_certificate_chain("node")?
        .expect("chain");
    assert_eq!(chain.len(), 2);
    Ok(())
}

#[test]
fn test_missing_certifier_fails_fast() -> Result<()> {
    let logger = create_test_logger("no-certifier");
    let mut store = KeyStore::new(logger.clone());
    let mut gateway = KeyStoreGateway::new(logger);
    gateway.set_password_resolver(passwords(&[]));

    let issuer = make_issuer("no-certifier-peer")?;
    let mut requester = make_requester("no-certifier-requester", &issuer)?;
    let request = requester
        .gateway
        .create_certificate_request(&requester.store, "node")?;

    let err = gateway
        .process_certificate_request(&mut store, &request)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Logic);
    Ok(())
}

#[test]
fn test_export_import_round_trips() -> Result<()> {
    let mut issuer = make_issuer("export-issuer")?;
    let manager = KeyStoreManager::new(create_test_logger("export-manager"));
    let ca_chain = issuer.store.get_certificate_chain("ca")?.expect("chain");
    issuer.store.set_certificate("ca-trust", &ca_chain[0])?;
    manager.create_key(
        &mut issuer.store,
        certstore::SymKeyType::Aes256,
        "shared-key",
        b"ca-pw",
    )?;

    issuer
        .gateway
        .set_password_resolver(passwords(&[("ca", b"ca-pw"), ("shared-key", b"ca-pw")]));
    issuer
        .gateway
        .set_lock_resolver(Box::new(|_| Some(b"export-pw".to_vec())));

    let cert_block = issuer.gateway.export_entry(&issuer.store, "ca-trust")?;
    let key_pair_block = issuer.gateway.export_entry(&issuer.store, "ca")?;
    let key_block = issuer.gateway.export_entry(&issuer.store, "shared-key")?;

    // Import everything into a fresh store under a different password
    let logger = create_test_logger("import-side");
    let mut target = KeyStore::new(logger.clone());
    let mut gateway = KeyStoreGateway::new(logger);
    gateway.set_password_resolver(passwords(&[
        ("ca-copy", b"new-pw"),
        ("key-copy", b"new-pw"),
    ]));
    gateway.set_lock_resolver(Box::new(|_| Some(b"export-pw".to_vec())));

    gateway.import_entry(&mut target, "trust-copy", &cert_block)?;
    gateway.import_entry(&mut target, "ca-copy", &key_pair_block)?;
    gateway.import_entry(&mut target, "key-copy", &key_block)?;

    let original = issuer.store.get_key_pair("ca", b"ca-pw")?;
    let copied = target.get_key_pair("ca-copy", b"new-pw")?;
    assert_eq!(original.public_key_bytes(), copied.public_key_bytes());

    match target.get_entry("key-copy", b"new-pw")? {
        certstore::StoreSecret::Key { bytes, .. } => assert_eq!(bytes.len(), 32),
        _ => panic!("expected a symmetric key entry"),
    }

    // A certificate block parses as a standard PEM CERTIFICATE
    let (kind, der) = armor::dearmor(&cert_block)?;
    assert_eq!(kind, BlockKind::Certificate);
    assert_eq!(
        X509Certificate::from_der(der)?.subject(),
        ca_chain[0].subject()
    );
    Ok(())
}

#[test]
fn test_import_certificates_bulk() -> Result<()> {
    let issuer = make_issuer("bulk-issuer")?;
    let ca_chain = issuer.store.get_certificate_chain("ca")?.expect("chain");

    let other = certstore::KeyPair::generate(KeyPairSpec::EcdsaP256);
    let other_root = certstore::create_self_signed(&other, "CN=Other Root, O=Certstore", 3650)?;

    let mut text = armor::enarmor(BlockKind::Certificate, ca_chain[0].der_bytes());
    text.push_str(&armor::enarmor(BlockKind::Certificate, other_root.der_bytes()));

    let logger = create_test_logger("bulk-import");
    let mut target = KeyStore::new(logger.clone());
    let gateway = KeyStoreGateway::new(logger);
    let imported = gateway.import_certificates(&mut target, &text)?;
    assert_eq!(imported, 2);
    assert!(target.aliases().iter().any(|a| a.contains("Protocol CA")));
    assert!(target.aliases().iter().any(|a| a.contains("Other Root")));
    Ok(())
}
