use crate::store::StoreError;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Errors surfaced by the relay's HTTP handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("{message}")]
    Unauthorized {
        message: &'static str,
        /// Value for `WWW-Authenticate`, if the client should be pointed somewhere.
        challenge: Option<String>,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::Unauthorized {
            message: "Unauthenticated",
            challenge: None,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        match self {
            Self::Unauthorized { message, challenge } => {
                let mut resp = (StatusCode::UNAUTHORIZED, message).into_response();
                if let Some(v) = challenge.and_then(|c| HeaderValue::from_str(&c).ok()) {
                    resp.headers_mut().insert(header::WWW_AUTHENTICATE, v);
                }
                resp
            }
            Self::Store(e) => {
                tracing::error!(error = %e, "credential store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
            Self::Internal(e) => {
                tracing::error!(error = %format!("{e:#}"), "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}
