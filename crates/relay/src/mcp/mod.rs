//! MCP tool facade served over streamable HTTP.

mod whoami;

use crate::app::AppState;
use crate::auth::AuthContext;
use crate::catalog::{
    SLOT_PROJECT, SLOT_SESSION, SLOT_WEATHER, VAR_PROJECT_ID, WEATHER_KEY_PARAM,
};
use crate::provision::ProvisionError;
use axum::http::request::Parts;
use idp_relay_http_tools::config::AuthConfig;
use idp_relay_http_tools::runtime::{CallContext, HttpToolsError, ToolRequirements};
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{ErrorData, ServerHandler};
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument as _;

/// One MCP session's handler. All per-user state lives in the credential store.
#[derive(Clone)]
pub struct RelayMcp {
    state: AppState,
}

impl RelayMcp {
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    async fn call_context(
        &self,
        auth: &AuthContext,
        needs: &ToolRequirements,
    ) -> Result<CallContext, ProvisionError> {
        let mut ctx = CallContext::default();
        let slot = needs.credential.as_deref();

        if slot == Some(SLOT_PROJECT) || needs.context_vars.contains(VAR_PROJECT_ID) {
            let project = self
                .state
                .provisioner
                .ensure_project(&auth.subject, &auth.access_token)
                .await?;
            ctx = ctx.with_var(VAR_PROJECT_ID, project.project_id.clone());
            ctx = ctx.with_credential(
                SLOT_PROJECT,
                AuthConfig::Basic {
                    username: project.project_id,
                    password: project.secret,
                },
            );
        }
        if slot == Some(SLOT_SESSION) {
            ctx = ctx.with_credential(
                SLOT_SESSION,
                AuthConfig::Bearer {
                    token: auth.access_token.clone(),
                },
            );
        }
        if slot == Some(SLOT_WEATHER) {
            // Keyless providers get no credential.
            let weather = match self.state.credentials.api_key(&auth.subject).await? {
                Some(key) => AuthConfig::Query {
                    name: WEATHER_KEY_PARAM.to_string(),
                    value: key,
                },
                None => AuthConfig::None,
            };
            ctx = ctx.with_credential(SLOT_WEATHER, weather);
        }
        Ok(ctx)
    }

    async fn call_catalog_tool(
        &self,
        auth: &AuthContext,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, ErrorData> {
        let tools = &self.state.tools;
        tools.validate(name, &arguments).map_err(tool_error)?;
        let needs = tools.requirements(name, &arguments).map_err(tool_error)?;

        let ctx = match self.call_context(auth, &needs).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::warn!(error = %e, "could not resolve project for tool call");
                return Ok(CallToolResult::error(vec![Content::text(format!(
                    "Could not set up a project for this call: {e}"
                ))]));
            }
        };

        match tools.call_tool(name, arguments, &ctx).await {
            Ok(result) => Ok(result),
            Err(e @ (HttpToolsError::Http { .. } | HttpToolsError::Transport(_))) => {
                tracing::info!(error = %e, "upstream call failed");
                Ok(CallToolResult::error(vec![Content::text(e.to_string())]))
            }
            Err(e) => Err(tool_error(e)),
        }
    }
}

fn tool_error(e: HttpToolsError) -> ErrorData {
    match e {
        HttpToolsError::InvalidArguments { message, details } => {
            ErrorData::invalid_params(message, Some(details))
        }
        HttpToolsError::NotFound(_) => ErrorData::invalid_params(e.to_string(), None),
        other => {
            tracing::error!(error = %other, "tool call failed");
            ErrorData::internal_error(other.to_string(), None)
        }
    }
}

fn auth_context(context: &RequestContext<RoleServer>) -> Option<AuthContext> {
    context
        .extensions
        .get::<Parts>()
        .and_then(|parts| parts.extensions.get::<AuthContext>())
        .cloned()
}

impl ServerHandler for RelayMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "idp-mcp-relay".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Manage identity platform projects: redirect URLs, secrets, public tokens, \
                 email templates, password strength and SDK configuration. Tools that take a \
                 project_id default to your stored project, which is created on first use."
                    .to_string(),
            ),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let mut tools = vec![whoami::tool()];
        tools.extend(self.state.tools.list_tools());
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(auth) = auth_context(&context) else {
            return Err(ErrorData::invalid_request("Unauthenticated", None));
        };
        let name = request.name.to_string();
        let arguments = request.arguments.map_or(Value::Null, Value::Object);
        let span = tracing::info_span!("tool_call", tool = %name, subject = %auth.subject);

        async {
            if name == whoami::NAME {
                return Ok(whoami::call(&self.state.identity, &auth).await);
            }
            self.call_catalog_tool(&auth, &name, arguments).await
        }
        .instrument(span)
        .await
    }
}

/// The `/mcp` tower service. Each MCP session gets its own [`RelayMcp`] over shared state.
pub fn service(state: AppState) -> StreamableHttpService<RelayMcp, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(RelayMcp::new(state.clone())),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    )
}
