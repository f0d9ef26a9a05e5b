//! Error taxonomy for the memory engine.
//!
//! One enum per layer, folded into [`KernelError`] at the crate seams.
//! Policy outcomes (storage denied, consent refused) are not errors;
//! they surface as `stored = false` on `StoreResult`.

/// Storage-layer errors for SQLite operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {message}")]
    Sqlite { message: String },

    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: u32, reason: String },

    #[error("full-text index unavailable: {reason}")]
    IndexUnavailable { reason: String },
}

/// Crypto-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unsupported algorithm: {alg}")]
    UnsupportedAlgorithm { alg: String },

    #[error("envelope authentication failed")]
    AuthenticationFailed,

    #[error("unknown key id: {kid}")]
    UnknownKeyId { kid: String },

    #[error("invalid key material: {reason}")]
    InvalidKey { reason: String },

    /// The only fatal condition in the engine: rules demand encryption
    /// but no cipher can be constructed at startup.
    #[error("encryption required by rules but unavailable: {reason}")]
    EncryptionUnavailable { reason: String },
}

/// Rules / config-plane errors.
#[derive(Debug, thiserror::Error)]
pub enum RulesError {
    #[error("failed to parse rules file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Embedding-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("unknown embedding provider: {provider}")]
    UnknownProvider { provider: String },

    #[error("provider returned wrong shape: got {got} values, expected {expected}")]
    ShapeMismatch { got: usize, expected: usize },
}

/// Retrieval-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {reason}")]
    QueryEmbedding { reason: String },
}

/// Top-level error for the whole engine.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Rules(#[from] RulesError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Shorthand used throughout the storage crate to wrap rusqlite errors.
pub fn to_storage_err(message: impl Into<String>) -> KernelError {
    KernelError::Storage(StorageError::Sqlite {
        message: message.into(),
    })
}
