use anyhow::Context as _;
use rmcp::model::ClientJsonRpcMessage;
use rmcp::transport::streamable_http_client::{
    StreamableHttpClient as _, StreamableHttpPostResponse,
};
use serde_json::{Value, json};
use std::sync::Arc;

/// Minimal MCP client over rmcp's streamable HTTP client plumbing.
pub struct McpSession {
    client: reqwest::Client,
    uri: Arc<str>,
    session_id: Arc<str>,
    access_token: Option<String>,
}

impl McpSession {
    pub async fn connect(
        uri: impl Into<Arc<str>>,
        access_token: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::new();
        let uri: Arc<str> = uri.into();

        let init: ClientJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "idp-mcp-relay-tests", "version": "0" }
            }
        }))
        .expect("initialize json must deserialize");

        let resp = client
            .post_message(uri.clone(), init, None, access_token.clone())
            .await
            .context("POST initialize")?;
        let (_msg, session_id) = resp
            .expect_initialized::<reqwest::Error>()
            .await
            .context("expect initialize response")?;
        let session_id = session_id.context("missing Mcp-Session-Id header")?.into();

        let session = Self {
            client,
            uri,
            session_id,
            access_token,
        };

        let initialized: ClientJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        }))
        .expect("notification json must deserialize");
        session
            .client
            .post_message(
                session.uri.clone(),
                initialized,
                Some(session.session_id.clone()),
                session.access_token.clone(),
            )
            .await
            .context("POST notifications/initialized")?
            .expect_accepted::<reqwest::Error>()
            .context("expected 202 Accepted")?;

        Ok(session)
    }

    pub async fn request(&self, id: u64, method: &str, params: Value) -> anyhow::Result<Value> {
        let msg: ClientJsonRpcMessage = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        }))
        .expect("request json must deserialize");

        let resp = self
            .client
            .post_message(
                self.uri.clone(),
                msg,
                Some(self.session_id.clone()),
                self.access_token.clone(),
            )
            .await
            .with_context(|| format!("POST {method}"))?;

        let server_msg = read_first_server_message(resp).await?;
        serde_json::to_value(server_msg).context("serialize server message to json")
    }

    /// `tools/call`, returning the JSON-RPC `result` (or the whole message on error).
    pub async fn call_tool(&self, id: u64, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let msg = self
            .request(id, "tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        Ok(msg.get("result").cloned().unwrap_or(msg))
    }
}

/// First text content of a `CallToolResult`.
pub fn text(result: &Value) -> &str {
    result["content"][0]["text"].as_str().unwrap_or_default()
}

pub fn is_error(result: &Value) -> bool {
    result["isError"].as_bool().unwrap_or(false)
}

async fn read_first_server_message(
    resp: StreamableHttpPostResponse,
) -> anyhow::Result<rmcp::model::ServerJsonRpcMessage> {
    use anyhow::bail;
    use futures::StreamExt as _;

    match resp {
        StreamableHttpPostResponse::Json(msg, ..) => Ok(msg),
        StreamableHttpPostResponse::Sse(mut stream, ..) => {
            while let Some(evt) = stream.next().await {
                let evt = evt.context("read SSE event")?;
                let payload = evt.data.unwrap_or_default();
                if payload.trim().is_empty() {
                    continue;
                }
                let msg: rmcp::model::ServerJsonRpcMessage =
                    serde_json::from_str(&payload).context("parse SSE data as JSON-RPC")?;
                return Ok(msg);
            }
            bail!("unexpected end of SSE stream")
        }
        StreamableHttpPostResponse::Accepted => bail!("unexpected 202 Accepted response"),
    }
}
