//! Textual armoring of binary blobs
//!
//! Wraps bincode-encoded messages and exported entries in PEM-style blocks
//! so they survive copy-and-paste transports. The tag names the block kind;
//! the body is base64 as emitted by the `pem` crate.

use pem::Pem;

use crate::error::{KeyStoreError, Result};

/// What an armored block carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    CertificateRequest,
    CertificateResponse,
    CertificateAck,
    Certificate,
    EncryptedPrivateKey,
    EncryptedKeySet,
    EncryptedKey,
}

impl BlockKind {
    pub fn tag(&self) -> &'static str {
        match self {
            BlockKind::CertificateRequest => "CERTIFICATE REQUEST",
            BlockKind::CertificateResponse => "CERTIFICATE RESPONSE",
            BlockKind::CertificateAck => "CERTIFICATE ACK",
            BlockKind::Certificate => "CERTIFICATE",
            BlockKind::EncryptedPrivateKey => "ENCRYPTED PRIVATE KEY",
            BlockKind::EncryptedKeySet => "ENCRYPTED KEYSET",
            BlockKind::EncryptedKey => "ENCRYPTED KEY",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "CERTIFICATE REQUEST" => Some(BlockKind::CertificateRequest),
            "CERTIFICATE RESPONSE" => Some(BlockKind::CertificateResponse),
            "CERTIFICATE ACK" => Some(BlockKind::CertificateAck),
            "CERTIFICATE" => Some(BlockKind::Certificate),
            "ENCRYPTED PRIVATE KEY" => Some(BlockKind::EncryptedPrivateKey),
            "ENCRYPTED KEYSET" => Some(BlockKind::EncryptedKeySet),
            "ENCRYPTED KEY" => Some(BlockKind::EncryptedKey),
            _ => None,
        }
    }
}

/// Frame binary data as an armored block
pub fn enarmor(kind: BlockKind, data: &[u8]) -> String {
    pem::encode(&Pem::new(kind.tag(), data))
}

/// Parse a single armored block, returning its kind and payload
pub fn dearmor(text: &str) -> Result<(BlockKind, Vec<u8>)> {
    let block = pem::parse(text)
        .map_err(|e| KeyStoreError::DecodeError(format!("Malformed armored block: {e}")))?;
    let kind = BlockKind::from_tag(block.tag()).ok_or_else(|| {
        KeyStoreError::DecodeError(format!("Unknown armored block tag '{}'", block.tag()))
    })?;
    Ok((kind, block.into_contents()))
}

/// Parse a single armored block and require a specific kind
pub fn dearmor_expect(kind: BlockKind, text: &str) -> Result<Vec<u8>> {
    let (found, payload) = dearmor(text)?;
    if found != kind {
        return Err(KeyStoreError::DecodeError(format!(
            "Expected a {} block, found {}",
            kind.tag(),
            found.tag()
        )));
    }
    Ok(payload)
}

/// Parse every armored block in a text, in order. Blocks with unknown tags
/// are an error rather than silently skipped.
pub fn dearmor_all(text: &str) -> Result<Vec<(BlockKind, Vec<u8>)>> {
    let blocks = pem::parse_many(text)
        .map_err(|e| KeyStoreError::DecodeError(format!("Malformed armored block: {e}")))?;
    blocks
        .into_iter()
        .map(|block| {
            let kind = BlockKind::from_tag(block.tag()).ok_or_else(|| {
                KeyStoreError::DecodeError(format!("Unknown armored block tag '{}'", block.tag()))
            })?;
            Ok((kind, block.into_contents()))
        })
        .collect()
}
