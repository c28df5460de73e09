//! certstore – public API facade
//!
//! A password-locked certificate keystore with a four-step certificate
//! management protocol on top. Entries (trusted certificates, private key
//! pairs with chains, symmetric keys, key sets, standalone locks) live
//! under unique aliases; certificates form a bidirectional subject/issuer
//! graph with validated chains.

pub mod armor;
pub mod certificate;
pub mod error;
pub mod gateway;
pub mod keypair;
pub mod lock;
pub mod logging;
pub mod manager;
pub mod message;
pub mod persist;
pub mod store;

pub use error::{ErrorKind, KeyStoreError, Result};

pub use certificate::{
    create_self_signed, CertificateId, CertificateKey, CertificateSigner, KeyUsage,
    X509Certificate, DEFAULT_VALIDITY_DAYS, ROOT_VALIDITY_DAYS,
};

pub use keypair::{KeyPair, KeyPairSpec, PublicKey};

pub use lock::{CipherId, KeySet, LockSpec};

pub use logging::{Component, Logger};

pub use store::{KeyStore, StoreEntry, StoreSecret, SymKeyType};

pub use manager::KeyStoreManager;

pub use message::{
    CertificateAck, CertificateRequest, CertificateRequestBody, CertificateResponse, PkMacValue,
    ProofOfPossession,
};

pub use gateway::{
    KeyStoreGateway, LockResolver, MacSecretResolver, PasswordResolver, ProofMethod,
};

pub use armor::BlockKind;
