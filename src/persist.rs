//! Password-locked store persistence
//!
//! A store is saved as a single file: a bincode [`Container`] holding the
//! self-describing lock header and the lock-encrypted store document. The
//! document carries every alias entry plus the flat certificate list, so
//! the graph is rebuilt on load independently of which aliases reference
//! which certificates. Saves are atomic (temp file, fsync, rename).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::certificate::{CertificateKey, X509Certificate};
use crate::error::{KeyStoreError, Result};
use crate::lock::LockSpec;
use crate::logging::Logger;
use crate::store::{KeyStore, StoreEntry};

/// On-disk envelope: lock header in the clear, document encrypted
#[derive(Serialize, Deserialize)]
struct Container {
    lock_header: Vec<u8>,
    payload: Vec<u8>,
}

/// The serialized store state inside the container
#[derive(Serialize, Deserialize)]
struct StoreDocument {
    aliases: HashMap<String, StoreEntry>,
    certificates: Vec<(CertificateKey, X509Certificate)>,
}

/// Encrypt and write the store to `path`, replacing any previous file
pub fn save_to_path(store: &KeyStore, path: &Path, password: &[u8]) -> Result<()> {
    let document = StoreDocument {
        aliases: store.alias_map().clone(),
        certificates: store
            .certificates()
            .into_iter()
            .map(|(key, cert)| (key, cert.clone()))
            .collect(),
    };
    let encoded = Zeroizing::new(bincode::serialize(&document)?);

    let lock = LockSpec::generate();
    let payload = lock.derive_key_set(password).secure(&encoded)?;
    let container = Container {
        lock_header: lock.encode()?,
        payload,
    };
    let bytes = bincode::serialize(&container)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut f = fs::File::create(&tmp_path)?;
        f.write_all(&bytes)?;
        f.flush()?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;

    store.logger().info(format!(
        "Saved store ({} aliases) to {}",
        store.alias_map().len(),
        path.display()
    ));
    Ok(())
}

/// Read and decrypt a store from `path`. The lock is re-derived from the
/// header embedded in the file; a wrong password fails AEAD verification.
pub fn load_from_path(path: &Path, password: &[u8], logger: Arc<Logger>) -> Result<KeyStore> {
    let bytes = fs::read(path)?;
    let container: Container = bincode::deserialize(&bytes)
        .map_err(|e| KeyStoreError::DecodeError(format!("Malformed store container: {e}")))?;

    let lock = LockSpec::decode(&container.lock_header)?;
    let encoded = lock.derive_key_set(password).derive(&container.payload)?;
    let document: StoreDocument = bincode::deserialize(&encoded)
        .map_err(|e| KeyStoreError::DecodeError(format!("Malformed store document: {e}")))?;

    logger.info(format!(
        "Loaded store ({} aliases) from {}",
        document.aliases.len(),
        path.display()
    ));
    Ok(KeyStore::from_parts(
        document.aliases,
        document.certificates,
        logger,
    ))
}
