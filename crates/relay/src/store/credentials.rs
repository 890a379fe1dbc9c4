use super::{KeyValueStore, StoreError};
use crate::crypto::{CredentialCipher, CryptoError};
use std::sync::Arc;

const PROJECT_ID: &str = "projectID";
const SECRET: &str = "secret";
const API_KEY: &str = "apiKey";

/// A project id + secret pair, used both as the default project and as basic-auth credentials
/// for the project API.
#[derive(Clone, PartialEq, Eq)]
pub struct ProjectCredential {
    pub project_id: String,
    pub secret: String,
}

impl std::fmt::Debug for ProjectCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectCredential")
            .field("project_id", &self.project_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Everything stored for one user, decrypted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredCredentials {
    pub project: Option<ProjectCredential>,
    pub api_key: Option<String>,
}

/// Per-user credentials, encrypted at rest.
///
/// Entries live under `{user_id}:{field}`; every value is a [`CredentialCipher`] blob and is
/// decrypted on each read.
#[derive(Clone)]
pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
    cipher: Arc<CredentialCipher>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>, cipher: Arc<CredentialCipher>) -> Self {
        Self { kv, cipher }
    }

    /// Import the encryption key now so a bad key fails at startup.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the configured key is unusable.
    pub fn warm_up(&self) -> Result<(), CryptoError> {
        self.cipher.warm_up()
    }

    /// The user's project credential. A half-written pair reads as unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or a stored blob cannot be decrypted.
    pub async fn project_credential(
        &self,
        user_id: &str,
    ) -> Result<Option<ProjectCredential>, StoreError> {
        let project_id = self.read(user_id, PROJECT_ID).await?;
        let secret = self.read(user_id, SECRET).await?;
        Ok(match (project_id, secret) {
            (Some(project_id), Some(secret)) => Some(ProjectCredential { project_id, secret }),
            _ => None,
        })
    }

    /// # Errors
    ///
    /// Returns an error if encryption or the backend write fails.
    pub async fn put_project_credential(
        &self,
        user_id: &str,
        credential: &ProjectCredential,
    ) -> Result<(), StoreError> {
        self.write(user_id, PROJECT_ID, &credential.project_id)
            .await?;
        self.write(user_id, SECRET, &credential.secret).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    pub async fn clear_project_credential(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&key(user_id, PROJECT_ID)).await?;
        self.kv.delete(&key(user_id, SECRET)).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend fails or the blob cannot be decrypted.
    pub async fn api_key(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        self.read(user_id, API_KEY).await
    }

    /// # Errors
    ///
    /// Returns an error if encryption or the backend write fails.
    pub async fn put_api_key(&self, user_id: &str, api_key: &str) -> Result<(), StoreError> {
        self.write(user_id, API_KEY, api_key).await
    }

    /// # Errors
    ///
    /// Returns an error if the backend delete fails.
    pub async fn clear_api_key(&self, user_id: &str) -> Result<(), StoreError> {
        self.kv.delete(&key(user_id, API_KEY)).await
    }

    /// # Errors
    ///
    /// See [`CredentialStore::project_credential`].
    pub async fn load(&self, user_id: &str) -> Result<StoredCredentials, StoreError> {
        Ok(StoredCredentials {
            project: self.project_credential(user_id).await?,
            api_key: self.api_key(user_id).await?,
        })
    }

    async fn read(&self, user_id: &str, field: &str) -> Result<Option<String>, StoreError> {
        match self.kv.get(&key(user_id, field)).await? {
            Some(blob) => Ok(Some(self.cipher.decrypt(&blob)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, user_id: &str, field: &str, plaintext: &str) -> Result<(), StoreError> {
        let blob = self.cipher.encrypt(plaintext)?;
        self.kv.put(&key(user_id, field), &blob).await
    }
}

fn key(user_id: &str, field: &str) -> String {
    format!("{user_id}:{field}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn store() -> (Arc<MemoryStore>, CredentialStore) {
        let kv = Arc::new(MemoryStore::new());
        let cipher = Arc::new(CredentialCipher::new(crate::crypto::test_key()));
        (kv.clone(), CredentialStore::new(kv, cipher))
    }

    fn pair() -> ProjectCredential {
        ProjectCredential {
            project_id: "project-test-1".to_string(),
            secret: "secret-test-1".to_string(),
        }
    }

    #[tokio::test]
    async fn project_credential_roundtrip_is_encrypted_at_rest() -> anyhow::Result<()> {
        let (kv, store) = store();
        store.put_project_credential("user-1", &pair()).await?;

        let raw = kv.get("user-1:secret").await?.expect("stored");
        assert_ne!(raw, "secret-test-1");

        assert_eq!(store.project_credential("user-1").await?, Some(pair()));
        assert_eq!(store.project_credential("user-2").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn half_pair_reads_as_unset() -> anyhow::Result<()> {
        let (kv, store) = store();
        store.put_project_credential("user-1", &pair()).await?;
        kv.delete("user-1:secret").await?;
        assert_eq!(store.project_credential("user-1").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn clear_removes_only_the_pair() -> anyhow::Result<()> {
        let (kv, store) = store();
        store.put_project_credential("user-1", &pair()).await?;
        store.put_api_key("user-1", "mgmt-key").await?;
        store.clear_project_credential("user-1").await?;

        let loaded = store.load("user-1").await?;
        assert_eq!(loaded.project, None);
        assert_eq!(loaded.api_key.as_deref(), Some("mgmt-key"));
        assert_eq!(kv.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn undecryptable_blob_is_an_error() -> anyhow::Result<()> {
        let (kv, store) = store();
        kv.put("user-1:apiKey", "garbage").await?;
        assert!(matches!(
            store.api_key("user-1").await,
            Err(StoreError::Crypto(_))
        ));
        Ok(())
    }

    #[test]
    fn debug_redacts_secret() {
        let s = format!("{:?}", pair());
        assert!(s.contains("project-test-1"));
        assert!(!s.contains("secret-test-1"));
    }
}
