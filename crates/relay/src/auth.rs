//! Request authentication for the browser API and the MCP endpoint.

use crate::app::AppState;
use crate::discovery::{PROTECTED_RESOURCE_PATH, public_origin};
use crate::error::RelayError;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;

pub const SESSION_COOKIE: &str = "stytch_session_jwt";

/// The logged-in browser user, set by [`require_session`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub user_id: String,
}

/// The OAuth client's principal, set by [`require_bearer`].
#[derive(Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub subject: String,
    pub access_token: String,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

/// Require a valid session JWT cookie.
///
/// # Errors
///
/// Returns 401 `Unauthenticated` when the cookie is missing or does not verify.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let jwt = cookie_value(req.headers(), SESSION_COOKIE).unwrap_or_default();
    let user_id = match state.identity.authenticate_session(&jwt).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "session jwt rejected");
            return Err(RelayError::unauthenticated());
        }
    };
    req.extensions_mut().insert(SessionUser { user_id });
    Ok(next.run(req).await)
}

/// Require an OAuth access token issued by the project.
///
/// # Errors
///
/// Returns 401 with a `WWW-Authenticate` challenge when no bearer token is present and
/// 401 `Unauthenticated` when it does not verify.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, RelayError> {
    let Some(access_token) = bearer_token(req.headers()) else {
        let metadata = format!(
            "{}{PROTECTED_RESOURCE_PATH}",
            public_origin(&state.config, req.headers())
        );
        return Err(RelayError::Unauthorized {
            message: "Missing or invalid access token",
            challenge: Some(format!("Bearer resource_metadata=\"{metadata}\"")),
        });
    };
    let subject = match state.identity.introspect_access_token(&access_token).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "access token rejected");
            return Err(RelayError::unauthenticated());
        }
    };
    req.extensions_mut().insert(AuthContext {
        subject,
        access_token,
    });
    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let authz = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())?;
    let token = authz.strip_prefix("Bearer ").map(str::trim)?;
    (!token.is_empty()).then(|| token.to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::{bearer_token, cookie_value};
    use axum::http::{HeaderMap, HeaderValue, header};

    #[test]
    fn finds_cookie_among_many() {
        let mut h = HeaderMap::new();
        h.append(header::COOKIE, HeaderValue::from_static("theme=dark"));
        h.append(
            header::COOKIE,
            HeaderValue::from_static("a=1; stytch_session_jwt=abc.def.ghi; b=2"),
        );
        assert_eq!(
            cookie_value(&h, "stytch_session_jwt").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(cookie_value(&h, "missing"), None);
    }

    #[test]
    fn bearer_requires_scheme_and_value() {
        let mut h = HeaderMap::new();
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&h), None);
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(bearer_token(&h).as_deref(), Some("tok"));
    }
}
