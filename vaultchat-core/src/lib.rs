pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod models;
pub mod store;
pub mod vault;

pub use crate::config::VaultChatConfig;
pub use crypto::EnvelopeCipher;
pub use db::PgStore;
pub use error::VaultError;
pub use models::{ChatMessage, ClientId, Envelope, SessionRecord};
pub use store::{KvStore, MemoryStore};
pub use vault::SessionVault;
