//! Key-value persistence and the per-user credential store built on top of it.

mod credentials;
mod memory;
mod postgres;

pub use credentials::{CredentialStore, ProjectCredential, StoredCredentials};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Crypto(#[from] crate::crypto::CryptoError),
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Backend(value.to_string())
    }
}

/// Minimal string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
