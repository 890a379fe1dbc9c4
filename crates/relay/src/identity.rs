//! Identity platform client: endpoint derivation, JWT verification, userinfo.

use crate::config::RelayConfig;
use anyhow::Context as _;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_JWKS_REFRESH: Duration = Duration::from_secs(600);

/// Everything the relay asks of the identity platform.
#[derive(Clone)]
pub struct IdentityClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    project_id: String,
    api_base: String,
    http: reqwest::Client,
    verifier: JwksVerifier,
}

#[derive(Debug, thiserror::Error)]
pub enum UserInfoError {
    /// Non-2xx answer; carries the status reason phrase.
    #[error("{0}")]
    Status(String),
    #[error("{0}")]
    Transport(String),
}

impl IdentityClient {
    #[must_use]
    pub fn new(http: reqwest::Client, config: &RelayConfig) -> Self {
        let verifier = JwksVerifier::new(
            http.clone(),
            VerifierConfig {
                issuer: config.issuer(),
                audience: config.project_id.clone(),
                jwks_uri: config.jwks_uri(),
                leeway_secs: config.jwt_leeway_secs,
            },
        );
        Self {
            inner: Arc::new(ClientInner {
                project_id: config.project_id.clone(),
                api_base: config.api_base_url(),
                http,
                verifier,
            }),
        }
    }

    #[must_use]
    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    /// `{api}/v1/public/{project_id}/{endpoint}`
    #[must_use]
    pub fn oauth_endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/v1/public/{}/{}",
            self.inner.api_base,
            self.inner.project_id,
            endpoint.trim_start_matches('/')
        )
    }

    /// Verify a browser session JWT and return the user id.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, expired, or not signed by the project.
    pub async fn authenticate_session(&self, session_jwt: &str) -> anyhow::Result<String> {
        let claims = self.inner.verifier.validate(session_jwt).await?;
        subject(&claims)
    }

    /// Verify an OAuth access token locally and return its subject.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, expired, or not signed by the project.
    pub async fn introspect_access_token(&self, access_token: &str) -> anyhow::Result<String> {
        let claims = self.inner.verifier.validate(access_token).await?;
        subject(&claims)
    }

    /// OIDC userinfo for the holder of `access_token`.
    ///
    /// # Errors
    ///
    /// Returns [`UserInfoError::Status`] on a non-2xx answer, [`UserInfoError::Transport`] when
    /// the platform is unreachable or the body is not JSON.
    pub async fn userinfo(&self, access_token: &str) -> Result<Value, UserInfoError> {
        let resp = self
            .inner
            .http
            .get(self.oauth_endpoint_url("oauth2/userinfo"))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| UserInfoError::Transport(e.without_url().to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(UserInfoError::Status(
                status.canonical_reason().unwrap_or("Unknown").to_string(),
            ));
        }
        resp.json()
            .await
            .map_err(|e| UserInfoError::Transport(e.without_url().to_string()))
    }
}

fn subject(claims: &Value) -> anyhow::Result<String> {
    claims
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("token missing subject"))
}

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub issuer: String,
    pub audience: String,
    pub jwks_uri: String,
    pub leeway_secs: u64,
}

/// RS256 verifier backed by the project's JWKS, with a kid-keyed key cache.
#[derive(Clone)]
pub struct JwksVerifier {
    inner: Arc<VerifierInner>,
}

struct VerifierInner {
    cfg: VerifierConfig,
    http: reqwest::Client,
    jwks: RwLock<JwksCache>,
}

#[derive(Default)]
struct JwksCache {
    next_refresh_after: Option<Instant>,
    last_refresh_attempt: Option<Instant>,
    keys_by_kid: HashMap<String, DecodingKey>,
}

impl JwksVerifier {
    #[must_use]
    pub fn new(http: reqwest::Client, cfg: VerifierConfig) -> Self {
        if !cfg.jwks_uri.starts_with("https://") {
            tracing::warn!(jwks_uri = %cfg.jwks_uri, "jwks uri is not https; use only for local development");
        }
        Self {
            inner: Arc::new(VerifierInner {
                cfg,
                http,
                jwks: RwLock::new(JwksCache::default()),
            }),
        }
    }

    /// Validate a JWT and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed tokens, `crit` headers, non-RS256 algorithms, unknown
    /// key ids, bad signatures, and issuer/audience/lifetime mismatches.
    pub async fn validate(&self, jwt: &str) -> anyhow::Result<Value> {
        let header = jsonwebtoken::decode_header(jwt).context("decode jwt header")?;
        if jwt_has_crit_header(jwt)? {
            anyhow::bail!("unsupported jwt crit header");
        }
        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("missing jwt kid"))?;
        if header.alg != Algorithm::RS256 {
            anyhow::bail!("unsupported jwt alg (expected RS256)");
        }

        if let Some(key) = self.key(kid).await
            && let Ok(claims) = self.decode_with_key(jwt, &key)
        {
            return Ok(claims);
        }

        self.refresh_if_needed(kid).await?;

        let key = self
            .key(kid)
            .await
            .ok_or_else(|| anyhow::anyhow!("unknown jwt kid"))?;
        self.decode_with_key(jwt, &key)
    }

    fn decode_with_key(&self, jwt: &str, key: &DecodingKey) -> anyhow::Result<Value> {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.inner.cfg.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[self.inner.cfg.issuer.as_str()]);
        validation.set_audience(&[self.inner.cfg.audience.as_str()]);

        let data = jsonwebtoken::decode::<Value>(jwt, key, &validation).context("decode jwt")?;
        Ok(data.claims)
    }

    async fn key(&self, kid: &str) -> Option<DecodingKey> {
        self.inner.jwks.read().await.keys_by_kid.get(kid).cloned()
    }

    async fn refresh_if_needed(&self, kid: &str) -> anyhow::Result<()> {
        let now = Instant::now();
        let needs_refresh = |cache: &JwksCache| {
            cache.next_refresh_after.is_none_or(|t| now >= t)
                || !cache.keys_by_kid.contains_key(kid)
        };

        if !needs_refresh(&*self.inner.jwks.read().await) {
            return Ok(());
        }

        let mut cache = self.inner.jwks.write().await;
        if !needs_refresh(&*cache) {
            return Ok(());
        }
        // Random kids must not turn into a refetch per request.
        if let Some(last) = cache.last_refresh_attempt
            && now.duration_since(last) < MIN_REFRESH_INTERVAL
        {
            return Ok(());
        }
        cache.last_refresh_attempt = Some(now);

        let (keys_by_kid, ttl) = fetch_jwks(&self.inner.http, &self.inner.cfg.jwks_uri).await?;
        tracing::debug!(keys = keys_by_kid.len(), "refreshed jwks");
        cache.keys_by_kid = keys_by_kid;
        cache.next_refresh_after = Some(now + ttl.unwrap_or(DEFAULT_JWKS_REFRESH));
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(rename = "use", default)]
    use_: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

async fn fetch_jwks(
    http: &reqwest::Client,
    jwks_uri: &str,
) -> anyhow::Result<(HashMap<String, DecodingKey>, Option<Duration>)> {
    let resp = http
        .get(jwks_uri)
        .send()
        .await
        .with_context(|| format!("GET jwks {jwks_uri}"))?
        .error_for_status()
        .with_context(|| format!("jwks status {jwks_uri}"))?;

    let ttl = parse_cache_control_max_age(resp.headers());
    let jwks: JwksResponse = resp.json().await.context("parse jwks json")?;

    let mut out = HashMap::new();
    for k in jwks.keys {
        if k.kty != "RSA" || k.use_.as_deref().is_some_and(|u| u != "sig") {
            continue;
        }
        let (Some(kid), Some(n), Some(e)) = (k.kid, k.n, k.e) else {
            continue;
        };
        let key = DecodingKey::from_rsa_components(&n, &e).context("build rsa decoding key")?;
        out.insert(kid, key);
    }
    if out.is_empty() {
        anyhow::bail!("jwks contains no usable RSA keys");
    }
    Ok((out, ttl))
}

fn parse_cache_control_max_age(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let v = headers.get(reqwest::header::CACHE_CONTROL)?.to_str().ok()?;
    v.split(',')
        .map(str::trim)
        .filter_map(|part| part.strip_prefix("max-age="))
        .find_map(|secs| secs.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn jwt_has_crit_header(jwt: &str) -> anyhow::Result<bool> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        anyhow::bail!("invalid jwt (expected 3 parts, got {})", parts.len());
    }
    let header_json = URL_SAFE_NO_PAD
        .decode(parts[0])
        .context("base64url decode jwt header")?;
    let header: Value = serde_json::from_slice(&header_json).context("parse jwt header json")?;
    let header = header
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("invalid jwt header (expected JSON object)"))?;
    Ok(header.contains_key("crit"))
}
