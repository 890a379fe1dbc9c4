use crate::auth::AuthContext;
use crate::identity::IdentityClient;
use rmcp::model::{CallToolResult, Content, Tool, ToolAnnotations};
use serde_json::json;
use std::sync::Arc;

pub(super) const NAME: &str = "whoami";

pub(super) fn tool() -> Tool {
    let schema = json!({"type": "object", "properties": {}});
    let mut tool = Tool::new(
        NAME,
        "Check who the logged-in user is",
        Arc::new(schema.as_object().cloned().unwrap_or_default()),
    );
    tool.annotations = Some(ToolAnnotations {
        title: Some("Who am I".to_string()),
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(true),
    });
    tool
}

pub(super) async fn call(identity: &IdentityClient, auth: &AuthContext) -> CallToolResult {
    match identity.userinfo(&auth.access_token).await {
        Ok(info) => {
            let pretty = serde_json::to_string_pretty(&info).unwrap_or_else(|_| info.to_string());
            CallToolResult::success(vec![Content::text(format!(
                "Logged-in user details:\n{pretty}"
            ))])
        }
        Err(e) => {
            tracing::info!(error = %e, "userinfo lookup failed");
            CallToolResult::error(vec![Content::text(format!(
                "Error fetching user information: {e}"
            ))])
        }
    }
}
