//! OAuth discovery documents for MCP clients.

use crate::app::AppState;
use crate::config::RelayConfig;
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

pub const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";
pub const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

pub fn router() -> Router<AppState> {
    Router::new()
        .route(AUTHORIZATION_SERVER_PATH, get(authorization_server))
        .route(PROTECTED_RESOURCE_PATH, get(protected_resource))
}

/// RFC 8414 metadata. Token and registration are handled by the identity platform; the
/// authorization screen is the browser UI.
async fn authorization_server(State(state): State<AppState>) -> Json<Value> {
    let identity = &state.identity;
    Json(json!({
        "issuer": identity.project_id(),
        "authorization_endpoint": state.config.authorize_url,
        "token_endpoint": identity.oauth_endpoint_url("oauth2/token"),
        "registration_endpoint": identity.oauth_endpoint_url("oauth2/register"),
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
        "response_types_supported": ["code"],
        "response_modes_supported": ["query"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none"],
        "code_challenge_methods_supported": ["S256"],
    }))
}

/// RFC 9728 metadata for the MCP endpoint.
async fn protected_resource(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let origin = public_origin(&state.config, &headers);
    Json(json!({
        "resource": format!("{origin}/mcp"),
        "authorization_servers": [origin],
        "scopes_supported": ["openid", "profile", "email", "offline_access"],
        "bearer_methods_supported": ["header"],
    }))
}

/// The configured public URL, or `http://{Host}` when none is set.
#[must_use]
pub fn public_origin(config: &RelayConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map_or_else(|| config.bind.to_string(), str::to_string);
    format!("http://{host}")
}
