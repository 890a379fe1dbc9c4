//! Lazy creation of a user's default project and secret.

use crate::store::{CredentialStore, ProjectCredential, StoreError};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PROJECT_ID_POINTERS: [&str; 3] = [
    "/project/test_project_id",
    "/project/project_id",
    "/project_id",
];
const SECRET_POINTERS: [&str; 3] = ["/created_secret/secret", "/secret/secret", "/secret"];

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Error: {reason} - {body}")]
    Upstream { reason: String, body: String },
    #[error("provisioning request failed: {0}")]
    Transport(String),
    #[error("provisioning response has no {0}")]
    MissingField(&'static str),
}

/// Creates a project and secret for users who have neither, at most once per user.
#[derive(Clone)]
pub struct Provisioner {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    management_base: String,
    project_name: String,
    timeout: Duration,
    store: CredentialStore,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Provisioner {
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        management_base: &str,
        project_name: impl Into<String>,
        timeout: Duration,
        store: CredentialStore,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                http,
                management_base: management_base.trim_end_matches('/').to_string(),
                project_name: project_name.into(),
                timeout,
                store,
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The user's stored project, creating one with `session_token` if there is none.
    ///
    /// Concurrent calls for the same user are serialized so only one project is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails, the management API rejects a request, or a
    /// response lacks the project id or secret.
    pub async fn ensure_project(
        &self,
        user_id: &str,
        session_token: &str,
    ) -> Result<ProjectCredential, ProvisionError> {
        if let Some(existing) = self.inner.store.project_credential(user_id).await? {
            return Ok(existing);
        }

        let lock = self.user_lock(user_id);
        let result = {
            let _guard = lock.lock().await;
            self.provision_locked(user_id, session_token).await
        };
        self.release_user_lock(user_id, lock);
        result
    }

    async fn provision_locked(
        &self,
        user_id: &str,
        session_token: &str,
    ) -> Result<ProjectCredential, ProvisionError> {
        if let Some(existing) = self.inner.store.project_credential(user_id).await? {
            return Ok(existing);
        }

        tracing::info!(user_id, "provisioning project on first use");
        let created = self
            .post(
                "/v1/projects",
                session_token,
                Some(json!({ "project_name": self.inner.project_name })),
            )
            .await?;
        let project_id = first_string(&created, &PROJECT_ID_POINTERS)
            .ok_or(ProvisionError::MissingField("project id"))?;

        let secret = self
            .post(
                &format!("/v1/projects/{project_id}/secrets"),
                session_token,
                None,
            )
            .await?;
        let secret = first_string(&secret, &SECRET_POINTERS)
            .ok_or(ProvisionError::MissingField("secret"))?;

        let credential = ProjectCredential { project_id, secret };
        self.inner
            .store
            .put_project_credential(user_id, &credential)
            .await?;
        tracing::info!(user_id, project_id = %credential.project_id, "project provisioned");
        Ok(credential)
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .locks
            .lock()
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the user's lock entry unless another call is holding or waiting on it.
    fn release_user_lock(&self, user_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.inner.locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(user_id);
        }
    }

    async fn post(
        &self,
        path: &str,
        session_token: &str,
        body: Option<Value>,
    ) -> Result<Value, ProvisionError> {
        let url = format!("{}{path}", self.inner.management_base);
        let mut req = self
            .inner
            .http
            .post(url)
            .bearer_auth(session_token)
            .timeout(self.inner.timeout);
        if let Some(body) = &body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ProvisionError::Transport(e.without_url().to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ProvisionError::Transport(e.without_url().to_string()))?;
        if !status.is_success() {
            return Err(ProvisionError::Upstream {
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body: text,
            });
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::Null))
    }
}

fn first_string(v: &Value, pointers: &[&str]) -> Option<String> {
    pointers
        .iter()
        .filter_map(|p| v.pointer(p).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CredentialCipher;
    use crate::store::MemoryStore;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use idp_relay_test_support::TestServer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct Calls {
        projects: Arc<AtomicUsize>,
        secrets: Arc<AtomicUsize>,
    }

    async fn create_project(
        State(calls): State<Calls>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer tok") {
            return Err(StatusCode::UNAUTHORIZED);
        }
        calls.projects.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(Json(json!({
            "project": {
                "project_id": "project-live-1",
                "test_project_id": "project-test-1",
                "name": body["project_name"],
            }
        })))
    }

    async fn create_secret(State(calls): State<Calls>) -> Json<Value> {
        calls.secrets.fetch_add(1, Ordering::SeqCst);
        Json(json!({"created_secret": {"secret_id": "s1", "secret": "secret-test-1"}}))
    }

    fn provisioner(base: &str) -> (CredentialStore, Provisioner) {
        let store = CredentialStore::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CredentialCipher::new(crate::crypto::test_key())),
        );
        let p = Provisioner::new(
            reqwest::Client::new(),
            base,
            "MCP Project",
            Duration::from_secs(5),
            store.clone(),
        );
        (store, p)
    }

    #[tokio::test]
    async fn concurrent_first_calls_create_one_project() -> anyhow::Result<()> {
        let calls = Calls::default();
        let app = Router::new()
            .route("/v1/projects", post(create_project))
            .route("/v1/projects/{id}/secrets", post(create_secret))
            .with_state(calls.clone());
        let server = TestServer::start(app).await?;
        let (store, p) = provisioner(&server.base_url());

        let (a, b) = tokio::join!(
            p.ensure_project("user-1", "tok"),
            p.ensure_project("user-1", "tok")
        );
        let expected = ProjectCredential {
            project_id: "project-test-1".to_string(),
            secret: "secret-test-1".to_string(),
        };
        assert_eq!(a?, expected);
        assert_eq!(b?, expected);
        assert_eq!(calls.projects.load(Ordering::SeqCst), 1);
        assert_eq!(calls.secrets.load(Ordering::SeqCst), 1);
        assert_eq!(store.project_credential("user-1").await?, Some(expected));
        assert!(p.inner.locks.lock().is_empty(), "lock entry left behind");
        Ok(())
    }

    #[tokio::test]
    async fn stored_pair_short_circuits() -> anyhow::Result<()> {
        let (store, p) = provisioner("http://127.0.0.1:1");
        let stored = ProjectCredential {
            project_id: "p".to_string(),
            secret: "s".to_string(),
        };
        store.put_project_credential("user-1", &stored).await?;
        assert_eq!(p.ensure_project("user-1", "tok").await?, stored);
        Ok(())
    }

    #[tokio::test]
    async fn upstream_rejection_is_reported() -> anyhow::Result<()> {
        let app = Router::new()
            .route("/v1/projects", post(create_project))
            .with_state(Calls::default());
        let server = TestServer::start(app).await?;
        let (store, p) = provisioner(&server.base_url());

        let err = p
            .ensure_project("user-1", "wrong")
            .await
            .expect_err("401 must fail");
        assert!(
            matches!(&err, ProvisionError::Upstream { reason, .. } if reason == "Unauthorized"),
            "{err:?}"
        );
        assert_eq!(store.project_credential("user-1").await?, None);
        assert!(p.inner.locks.lock().is_empty(), "lock entry left behind");
        Ok(())
    }

    #[test]
    fn pointers_prefer_test_project() {
        let v = json!({"project": {"project_id": "live", "test_project_id": "test"}});
        assert_eq!(first_string(&v, &PROJECT_ID_POINTERS).as_deref(), Some("test"));
        let v = json!({"project_id": "flat"});
        assert_eq!(first_string(&v, &PROJECT_ID_POINTERS).as_deref(), Some("flat"));
        assert_eq!(first_string(&json!({}), &SECRET_POINTERS), None);
    }
}
