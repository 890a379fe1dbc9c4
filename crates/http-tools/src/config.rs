//! Catalog configuration types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A list of HTTP-backed tools.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCatalogConfig {
    #[serde(default)]
    pub tools: Vec<HttpToolConfig>,
}

impl ToolCatalogConfig {
    /// Parse a catalog from YAML (JSON is accepted too, being a YAML subset).
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not match the catalog schema.
    pub fn from_yaml(src: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(src)
    }
}

/// One upstream endpoint exposed as a tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpToolConfig {
    /// Tool name as seen by MCP clients.
    pub name: String,

    /// Human-readable title (surfaced in tool annotations).
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Name of the upstream base URL, resolved when the source is built.
    pub upstream: String,

    /// HTTP method (case-insensitive).
    pub method: String,

    /// Path template, e.g. `/v1/projects/{project_id}/secrets`.
    pub path: String,

    /// Credential slot used to authenticate the request. `None` sends no credentials.
    #[serde(default)]
    pub auth: Option<String>,

    /// Arguments, keyed by argument name.
    #[serde(default)]
    pub params: BTreeMap<String, HttpParamConfig>,

    /// Query pairs always appended to the request.
    #[serde(default)]
    pub fixed_query: BTreeMap<String, String>,

    pub response: HttpResponseConfig,
}

/// Where an argument goes and what it must look like.
///
/// A param may target several places at once, e.g. a URL that is both a query
/// selector and part of the JSON body.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpParamConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// JSON schema for the argument. Defaults to `{"type": "string"}`.
    #[serde(default)]
    pub schema: Option<Value>,

    /// Defaults to `true` for path params and `false` otherwise.
    #[serde(default)]
    pub required: Option<bool>,

    #[serde(default)]
    pub default: Option<Value>,

    /// Substitute `{name}` in the path template.
    #[serde(default)]
    pub path: bool,

    /// Send as a query pair under this key.
    #[serde(default)]
    pub query: Option<String>,

    /// JSON pointer inside the request body, e.g. `/redirect_url/url`.
    #[serde(default)]
    pub body: Option<String>,

    /// Per-call context variable used when the caller omits the argument.
    #[serde(default)]
    pub from_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseConfig {
    /// Text template. `{result}` expands to the compact upstream JSON, `{arg}` to an argument.
    pub template: String,
}

/// Credentials injected into a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AuthConfig {
    #[default]
    None,
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
    Header {
        name: String,
        value: String,
    },
    Query {
        name: String,
        value: String,
    },
}
