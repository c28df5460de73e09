use thiserror::Error;

/// Error types for the certstore crate
#[derive(Error, Debug)]
pub enum KeyStoreError {
    #[error("Chain validation error: {0}")]
    ChainValidation(String),

    #[error("Alias conflict: {0}")]
    AliasConflict(String),

    #[error("Unknown alias: {0}")]
    UnknownAlias(String),

    #[error("Certificate error: {0}")]
    Certificate(String),

    #[error("Certificate not found: {0}")]
    CertificateNotFound(String),

    #[error("MAC mismatch: {0}")]
    MacMismatch(String),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),

    #[error("Id not recognised: {0}")]
    UnrecognisedId(String),

    #[error("Proof of possession error: {0}")]
    ProofOfPossession(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Key derivation error: {0}")]
    KeyDerivationError(String),

    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Unsupported usage: {0}")]
    UnsupportedUsage(String),

    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),
}

/// Coarse classification of an error: bad input data, an I/O or decoding
/// failure, or a programmer/configuration mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Data,
    Io,
    Logic,
}

impl KeyStoreError {
    /// Classify this error so callers can distinguish "bad input" from
    /// "misconfigured system".
    pub fn kind(&self) -> ErrorKind {
        use KeyStoreError::*;
        match self {
            ChainValidation(_) | AliasConflict(_) | UnknownAlias(_) | Certificate(_)
            | CertificateNotFound(_) | MacMismatch(_) | InvalidDigest(_) | UnrecognisedId(_)
            | ProofOfPossession(_) | EncryptionError(_) | DecryptionError(_)
            | KeyDerivationError(_) | InvalidKeyFormat(_) => ErrorKind::Data,
            SerializationError(_) | DecodeError(_) | IoError(_) => ErrorKind::Io,
            InvalidOperation(_) | UnsupportedUsage(_) | MissingConfiguration(_) => ErrorKind::Logic,
        }
    }
}

impl From<std::array::TryFromSliceError> for KeyStoreError {
    fn from(err: std::array::TryFromSliceError) -> Self {
        KeyStoreError::InvalidKeyFormat(err.to_string())
    }
}

impl From<hkdf::InvalidLength> for KeyStoreError {
    fn from(err: hkdf::InvalidLength) -> Self {
        KeyStoreError::KeyDerivationError(format!("HKDF error: {err}"))
    }
}

impl From<bincode::Error> for KeyStoreError {
    fn from(err: bincode::Error) -> Self {
        KeyStoreError::SerializationError(err.to_string())
    }
}

/// Result type for certstore operations
pub type Result<T> = std::result::Result<T, KeyStoreError>;
