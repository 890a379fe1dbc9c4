//! Browser-facing credential API, behind session auth.

use crate::app::AppState;
use crate::auth::{SessionUser, require_session};
use crate::error::RelayError;
use crate::store::ProjectCredential;
use axum::extract::{Extension, State};
use axum::routing::get;
use axum::{Json, Router, middleware};
use serde::{Deserialize, Deserializer, Serialize};

#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiKeyPayload {
    #[serde(rename = "projectID", default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Body of `POST /api/apikey`.
///
/// The outer `Option` tells an absent field (leave stored value alone) from an explicit
/// `null` (clear it).
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SaveCredentials {
    #[serde(rename = "projectID", default, deserialize_with = "present")]
    pub project_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub secret: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub api_key: Option<Option<String>>,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Serialize)]
pub struct Saved {
    pub success: bool,
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/apikey", get(get_api_key).post(put_api_key))
        .route_layer(middleware::from_fn_with_state(state, require_session))
}

async fn get_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
) -> Result<Json<ApiKeyPayload>, RelayError> {
    let stored = state.credentials.load(&user.user_id).await?;
    let (project_id, secret) = match stored.project {
        Some(p) => (Some(p.project_id), Some(p.secret)),
        None => (None, None),
    };
    Ok(Json(ApiKeyPayload {
        project_id,
        secret,
        api_key: stored.api_key,
    }))
}

/// Update the user's stored credentials.
///
/// The pair is left alone when neither half is sent; otherwise a null or empty half removes
/// it. `apiKey` is left alone when absent and removed when null or empty.
async fn put_api_key(
    State(state): State<AppState>,
    Extension(user): Extension<SessionUser>,
    Json(body): Json<SaveCredentials>,
) -> Result<Json<Saved>, RelayError> {
    let store = &state.credentials;
    if body.project_id.is_some() || body.secret.is_some() {
        match (
            non_empty(body.project_id.flatten()),
            non_empty(body.secret.flatten()),
        ) {
            (Some(project_id), Some(secret)) => {
                store
                    .put_project_credential(
                        &user.user_id,
                        &ProjectCredential { project_id, secret },
                    )
                    .await?;
            }
            _ => store.clear_project_credential(&user.user_id).await?,
        }
    }
    if let Some(api_key) = body.api_key {
        match non_empty(api_key) {
            Some(key) => store.put_api_key(&user.user_id, &key).await?,
            None => store.clear_api_key(&user.user_id).await?,
        }
    }
    tracing::info!(user_id = %user.user_id, "stored credentials updated");
    Ok(Json(Saved { success: true }))
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::{ApiKeyPayload, SaveCredentials};

    #[test]
    fn payload_uses_browser_field_names() {
        let p: ApiKeyPayload =
            serde_json::from_str(r#"{"projectID":"p","secret":null}"#).expect("payload");
        assert_eq!(p.project_id.as_deref(), Some("p"));
        assert_eq!(p.secret, None);
        assert_eq!(p.api_key, None);

        let v = serde_json::to_value(ApiKeyPayload::default()).expect("json");
        assert_eq!(
            v,
            serde_json::json!({"projectID": null, "secret": null, "apiKey": null})
        );
    }

    #[test]
    fn save_body_tells_absent_from_null() {
        let body: SaveCredentials =
            serde_json::from_str(r#"{"projectID":"p","secret":"s"}"#).expect("body");
        assert_eq!(body.project_id, Some(Some("p".to_string())));
        assert_eq!(body.api_key, None);

        let body: SaveCredentials =
            serde_json::from_str(r#"{"apiKey":null}"#).expect("body");
        assert_eq!(body.api_key, Some(None));
        assert_eq!(body.project_id, None);
        assert_eq!(body.secret, None);
    }
}
