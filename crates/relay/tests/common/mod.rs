#![allow(dead_code)]

pub mod mcp;

use axum::Router;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse as _;
use base64::Engine as _;
use idp_mcp_relay::config::{LogFormat, RelayConfig};
use idp_mcp_relay::store::{KeyValueStore, MemoryStore};
use idp_mcp_relay::{AppState, router};
use idp_relay_test_support::TestServer;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;

pub const PROJECT_ID: &str = "project-test-relay";
pub const KID: &str = "relay-test-key";
const TEST_KEY_PEM: &str = include_str!("../fixtures/jwt_rsa.pem");
const JWK_N: &str = "zK6dOaC89HkjJlgwetjRHO91ehRf41JXuYU0opZR21VFEempjoYWDMo2WfeinlX_fCeTY7TWkOWIAY5K3TSFCl191W7dpk2YUUb-gV7AEi6CRY5LdsPtD6xaSshFU5-fVnD7lMr7ZWM1bd94ccc90YgD3gt45aM38mywuVKk3S0XXRle4WH3rnOP3adoho7ZzNR01hYr9ebkVVyLumGduNxWVCzW9Qf6umOxf0vo027fgYVm6YAfEjx7Cxx_Ber-9_C6vySA6W5KA0IAUbW_Z2AHd9ieLyAMWYJ9VXY0BdlFMRmT8Iu8aQ800NWkiEz1F3Bq9GK4sgFKeLsHj4wkSQ";

/// One request seen by the mock identity platform.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub query: String,
    pub auth: Option<String>,
    pub body: Value,
}

/// Mock identity platform: JWKS, userinfo, management and project APIs, weather.
///
/// Unknown paths echo the request back; paths containing `missing` answer 404.
pub struct MockPlatform {
    pub server: TestServer,
    pub requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockPlatform {
    pub async fn start() -> anyhow::Result<Self> {
        let requests: Arc<Mutex<Vec<Recorded>>> = Arc::default();
        let log = requests.clone();
        let app = Router::new().fallback(
            move |method: Method, uri: Uri, headers: HeaderMap, body: Bytes| {
                let log = log.clone();
                async move { respond(&log, &method, &uri, &headers, &body) }
            },
        );
        Ok(Self {
            server: TestServer::start(app).await?,
            requests,
        })
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// Requests whose path starts with `prefix`, oldest first.
    pub fn requests_to(&self, prefix: &str) -> Vec<Recorded> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.path.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn respond(
    log: &Mutex<Vec<Recorded>>,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &Bytes,
) -> axum::response::Response {
    let path = uri.path().to_string();
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let parsed_body: Value = serde_json::from_slice(body).unwrap_or(Value::Null);
    let recorded = Recorded {
        method: method.to_string(),
        path: path.clone(),
        query: uri.query().unwrap_or_default().to_string(),
        auth: auth.clone(),
        body: parsed_body.clone(),
    };
    log.lock().push(recorded.clone());

    if path == "/jwks" {
        return axum::Json(json!({"keys": [{
            "kty": "RSA", "kid": KID, "use": "sig", "alg": "RS256", "n": JWK_N, "e": "AQAB"
        }]}))
        .into_response();
    }
    if path.ends_with("/oauth2/userinfo") {
        return match auth.as_deref() {
            Some(a) if a.starts_with("Bearer ") => axum::Json(json!({
                "sub": "user-test-alice",
                "email": "alice@example.com",
            }))
            .into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        };
    }
    if path.contains("missing") {
        return (StatusCode::NOT_FOUND, r#"{"error_type":"not_found"}"#).into_response();
    }
    if method == Method::POST && path == "/v1/projects" {
        return axum::Json(json!({"project": {
            "project_id": "project-live-prov",
            "test_project_id": "project-test-prov",
            "name": parsed_body["project_name"],
        }}))
        .into_response();
    }
    if method == Method::POST && path.starts_with("/v1/projects/") && path.ends_with("/secrets") {
        return axum::Json(json!({"created_secret": {
            "secret_id": "secret-id-prov",
            "secret": "secret-test-prov",
        }}))
        .into_response();
    }
    axum::Json(json!({
        "method": recorded.method,
        "path": recorded.path,
        "query": recorded.query,
        "auth": recorded.auth,
        "body": recorded.body,
    }))
    .into_response()
}

pub fn encryption_key() -> String {
    base64::engine::general_purpose::STANDARD.encode([7u8; 32])
}

pub fn config(platform_base: &str) -> RelayConfig {
    RelayConfig {
        bind: "127.0.0.1:0".parse().expect("socket addr"),
        project_id: PROJECT_ID.to_string(),
        encryption_key: encryption_key(),
        api_base_url: Some(platform_base.to_string()),
        management_base_url: platform_base.to_string(),
        weather_base_url: platform_base.to_string(),
        jwks_uri: Some(format!("{platform_base}/jwks")),
        issuer: None,
        jwt_leeway_secs: 0,
        authorize_url: "https://stytch.com/oauth/authorize".to_string(),
        public_url: None,
        database_url: None,
        assets_dir: None,
        upstream_timeout_secs: 5,
        provision_project_name: "MCP Project".to_string(),
        log_level: "info".to_string(),
        log_format: LogFormat::Text,
    }
}

/// A relay wired to a [`MockPlatform`] with an in-memory store.
pub struct Harness {
    pub platform: MockPlatform,
    pub relay: TestServer,
    pub state: AppState,
    pub kv: Arc<MemoryStore>,
}

impl Harness {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(tweak: impl FnOnce(&mut RelayConfig)) -> anyhow::Result<Self> {
        let platform = MockPlatform::start().await?;
        let mut cfg = config(&platform.base_url());
        tweak(&mut cfg);
        let kv = Arc::new(MemoryStore::new());
        let state = AppState::new(cfg, kv.clone() as Arc<dyn KeyValueStore>)?;
        let relay = TestServer::start(router(state.clone())).await?;
        Ok(Self {
            platform,
            relay,
            state,
            kv,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.relay.base_url())
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

/// A project-signed JWT for `sub`, usable as session cookie or access token.
pub fn token_for(sub: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(KID.to_string());
    let claims = json!({
        "sub": sub,
        "iss": format!("stytch.com/{PROJECT_ID}"),
        "aud": [PROJECT_ID],
        "iat": now(),
        "nbf": now(),
        "exp": now() + 600,
        "scope": "openid email profile",
    });
    let key = EncodingKey::from_rsa_pem(TEST_KEY_PEM.as_bytes()).expect("test rsa key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign test token")
}

pub fn session_cookie(sub: &str) -> String {
    format!("stytch_session_jwt={}", token_for(sub))
}
