use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption secret must be 16 or 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Store error: {0}")]
    Store(String),
}
