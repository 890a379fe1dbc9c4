//! Runtime for executing catalog-defined HTTP tools.

use crate::config::{AuthConfig, HttpParamConfig, HttpToolConfig, ToolCatalogConfig};
use crate::validation::{ArgumentErrors, validate_arguments};
use reqwest::{Client, Method};
use rmcp::model::{CallToolResult, Content, Tool};
use serde_json::{Map, Value, json};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum HttpToolsError {
    #[error("config error: {0}")]
    Config(String),
    #[error("Tool not found: {0}")]
    NotFound(String),
    #[error("{message}")]
    InvalidArguments { message: String, details: Value },
    #[error("no '{0}' credential available for this call")]
    MissingCredential(String),
    #[error("context value '{0}' is not available for this call")]
    MissingContext(String),
    #[error("{message}")]
    Http { status: u16, message: String },
    #[error("http transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, HttpToolsError>;

impl From<reqwest::Error> for HttpToolsError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport(redact_reqwest_error(&value))
    }
}

impl From<ArgumentErrors> for HttpToolsError {
    fn from(value: ArgumentErrors) -> Self {
        Self::InvalidArguments {
            message: value.message,
            details: value.details,
        }
    }
}

/// Per-call inputs that do not come from the tool arguments.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Credentials by slot name (the tool's `auth` field).
    pub credentials: HashMap<String, AuthConfig>,
    /// Values for params declared with `fromContext`.
    pub vars: HashMap<String, Value>,
}

impl CallContext {
    #[must_use]
    pub fn with_credential(mut self, slot: impl Into<String>, auth: AuthConfig) -> Self {
        self.credentials.insert(slot.into(), auth);
        self
    }

    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

/// What a tool call needs beyond its arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolRequirements {
    pub credential: Option<String>,
    /// Context variables the call will read because the caller omitted the argument.
    pub context_vars: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct CompiledTool {
    name: String,
    title: Option<String>,
    description: Option<String>,
    method: Method,
    base_url: String,
    path: String,
    auth: Option<String>,
    params: Vec<CompiledParam>,
    fixed_query: Vec<(String, String)>,
    template: String,
    input_schema: Value,
}

#[derive(Debug, Clone)]
struct CompiledParam {
    name: String,
    cfg: HttpParamConfig,
    required: bool,
}

#[derive(Clone)]
pub struct HttpToolSource {
    inner: Arc<Inner>,
}

struct Inner {
    tools: Vec<CompiledTool>,
    client: Client,
    timeout: Duration,
}

impl HttpToolSource {
    /// Compile a catalog against a set of named upstream base URLs.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::Config`] on duplicate tool names, unknown upstreams, invalid
    /// base URLs or methods, path placeholders without a matching path param, or invalid body
    /// pointers.
    pub fn new(
        catalog: ToolCatalogConfig,
        upstreams: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("idp-mcp-relay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Self::with_client(catalog, upstreams, timeout, client)
    }

    /// Same as [`HttpToolSource::new`] with a caller-provided client.
    ///
    /// # Errors
    ///
    /// See [`HttpToolSource::new`].
    pub fn with_client(
        catalog: ToolCatalogConfig,
        upstreams: &HashMap<String, String>,
        timeout: Duration,
        client: Client,
    ) -> Result<Self> {
        for (name, base) in upstreams {
            Url::parse(base).map_err(|e| {
                HttpToolsError::Config(format!("Invalid base URL '{base}' for upstream '{name}': {e}"))
            })?;
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut tools = Vec::with_capacity(catalog.tools.len());
        for tool in catalog.tools {
            if !seen.insert(tool.name.clone()) {
                return Err(HttpToolsError::Config(format!(
                    "Duplicate tool name '{}'",
                    tool.name
                )));
            }
            tools.push(compile_tool(tool, upstreams)?);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                tools,
                client,
                timeout,
            }),
        })
    }

    /// MCP tool descriptors, in catalog order.
    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.inner
            .tools
            .iter()
            .map(|t| {
                let schema = t.input_schema.as_object().cloned().unwrap_or_default();
                let mut tool = Tool::new(
                    t.name.clone(),
                    t.description.clone().unwrap_or_default(),
                    Arc::new(schema),
                );
                tool.annotations = Some(crate::semantics::annotations_for(
                    &t.method,
                    t.title.as_deref(),
                ));
                tool
            })
            .collect()
    }

    /// The credential slot and context variables a call with `arguments` will need.
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::NotFound`] for unknown tools.
    pub fn requirements(&self, tool_name: &str, arguments: &Value) -> Result<ToolRequirements> {
        let tool = self
            .find(tool_name)
            .ok_or_else(|| HttpToolsError::NotFound(tool_name.to_string()))?;
        let context_vars = tool
            .params
            .iter()
            .filter(|p| arg_is_absent(arguments, &p.name))
            .filter_map(|p| p.cfg.from_context.clone())
            .collect();
        Ok(ToolRequirements {
            credential: tool.auth.clone(),
            context_vars,
        })
    }

    /// Check caller-supplied arguments without resolving defaults or context.
    ///
    /// Lets callers reject bad input before doing any work to build a [`CallContext`].
    ///
    /// # Errors
    ///
    /// Returns [`HttpToolsError::NotFound`] for unknown tools and
    /// [`HttpToolsError::InvalidArguments`] when the arguments do not match the schema.
    pub fn validate(&self, tool_name: &str, arguments: &Value) -> Result<()> {
        let tool = self
            .find(tool_name)
            .ok_or_else(|| HttpToolsError::NotFound(tool_name.to_string()))?;
        let mut args = match arguments {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => return validate_arguments(&tool.input_schema, other).map_err(Into::into),
        };
        args.retain(|_, v| !v.is_null());
        validate_arguments(&tool.input_schema, &Value::Object(args)).map_err(Into::into)
    }

    /// Validate, forward and render one tool call.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is unknown, the arguments are invalid, a credential or
    /// context value is missing, the upstream is unreachable, or it answers with a non-2xx
    /// status.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: Value,
        ctx: &CallContext,
    ) -> Result<CallToolResult> {
        let tool = self
            .find(tool_name)
            .ok_or_else(|| HttpToolsError::NotFound(tool_name.to_string()))?;

        let args = prepare_arguments(tool, arguments, ctx)?;
        validate_arguments(&tool.input_schema, &Value::Object(args.clone()))?;

        let auth = match &tool.auth {
            Some(slot) => Some(
                ctx.credentials
                    .get(slot)
                    .ok_or_else(|| HttpToolsError::MissingCredential(slot.clone()))?,
            ),
            None => None,
        };

        let url = build_url(tool, &args, auth)?;
        let body = build_body(tool, &args);

        tracing::debug!(tool = %tool.name, method = %tool.method, path = %url.path(), "forwarding tool call");

        let mut request = self
            .inner
            .client
            .request(tool.method.clone(), url)
            .timeout(self.inner.timeout);
        request = apply_auth(auth, request);
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            return Err(HttpToolsError::Http {
                status: status.as_u16(),
                message: format!("Error: {reason} - {text}"),
            });
        }

        let result = parse_body(&text);
        let rendered = render_template(&tool.template, &result, &args);
        Ok(CallToolResult::success(vec![Content::text(rendered)]))
    }

    fn find(&self, name: &str) -> Option<&CompiledTool> {
        self.inner.tools.iter().find(|t| t.name == name)
    }
}

fn arg_is_absent(arguments: &Value, name: &str) -> bool {
    matches!(arguments.get(name), None | Some(Value::Null))
}

fn compile_tool(tool: HttpToolConfig, upstreams: &HashMap<String, String>) -> Result<CompiledTool> {
    let name = tool.name;
    let base_url = upstreams.get(&tool.upstream).cloned().ok_or_else(|| {
        HttpToolsError::Config(format!(
            "Tool '{name}' references unknown upstream '{}'",
            tool.upstream
        ))
    })?;

    let method: Method = tool.method.trim().to_uppercase().parse().map_err(|_| {
        HttpToolsError::Config(format!(
            "Invalid HTTP method '{}' in tool '{name}'",
            tool.method
        ))
    })?;

    let mut params = Vec::with_capacity(tool.params.len());
    for (param_name, cfg) in tool.params {
        if let Some(ptr) = &cfg.body
            && !(ptr.starts_with('/') && ptr.len() > 1)
        {
            return Err(HttpToolsError::Config(format!(
                "Invalid body pointer '{ptr}' for param '{param_name}' in tool '{name}'"
            )));
        }
        let required = cfg.required.unwrap_or(cfg.path) && cfg.from_context.is_none();
        params.push(CompiledParam {
            name: param_name,
            cfg,
            required,
        });
    }

    for placeholder in path_placeholders(&tool.path) {
        let bound = params.iter().any(|p| p.cfg.path && p.name == placeholder);
        if !bound {
            return Err(HttpToolsError::Config(format!(
                "Path placeholder '{{{placeholder}}}' in tool '{name}' has no matching path param"
            )));
        }
    }

    let input_schema = build_input_schema(&params);

    Ok(CompiledTool {
        name,
        title: tool.title,
        description: tool.description,
        method,
        base_url,
        path: tool.path,
        auth: tool.auth,
        params,
        fixed_query: tool.fixed_query.into_iter().collect(),
        template: tool.response.template,
        input_schema,
    })
}

fn path_placeholders(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut rest = path;
    while let Some(start) = rest.find('{') {
        let Some(len) = rest[start..].find('}') else {
            break;
        };
        out.push(&rest[start + 1..start + len]);
        rest = &rest[start + len + 1..];
    }
    out
}

fn build_input_schema(params: &[CompiledParam]) -> Value {
    let mut properties = Map::new();
    let mut required: Vec<String> = Vec::new();

    for p in params {
        let mut schema = p.cfg.schema.clone().unwrap_or_else(|| json!({"type": "string"}));
        if let Some(obj) = schema.as_object_mut() {
            if let Some(d) = &p.cfg.description {
                obj.entry("description").or_insert_with(|| json!(d));
            }
            if let Some(default) = &p.cfg.default {
                obj.insert("default".to_string(), default.clone());
            }
        }
        properties.insert(p.name.clone(), schema);
        if p.required && p.cfg.default.is_none() {
            required.push(p.name.clone());
        }
    }

    let mut schema = json!({
        "type": "object",
        "properties": properties,
    });
    if !required.is_empty() {
        schema["required"] = json!(required);
    }
    schema
}

/// Drop nulls, apply defaults and fill context-backed params.
fn prepare_arguments(
    tool: &CompiledTool,
    arguments: Value,
    ctx: &CallContext,
) -> Result<Map<String, Value>> {
    let mut args = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(HttpToolsError::InvalidArguments {
                message: "Invalid params: arguments must be a JSON object".to_string(),
                details: json!({ "type": "validation-errors", "received": other }),
            });
        }
    };
    args.retain(|_, v| !v.is_null());

    for p in &tool.params {
        if args.contains_key(&p.name) {
            continue;
        }
        if let Some(default) = &p.cfg.default {
            args.insert(p.name.clone(), default.clone());
        } else if let Some(var) = &p.cfg.from_context {
            let value = ctx
                .vars
                .get(var)
                .cloned()
                .ok_or_else(|| HttpToolsError::MissingContext(var.clone()))?;
            args.insert(p.name.clone(), value);
        }
    }
    Ok(args)
}

fn build_url(
    tool: &CompiledTool,
    args: &Map<String, Value>,
    auth: Option<&AuthConfig>,
) -> Result<Url> {
    let mut path = tool.path.clone();
    for p in tool.params.iter().filter(|p| p.cfg.path) {
        if let Some(v) = args.get(&p.name) {
            let segment = encode_path_segment(&value_to_string(v));
            path = path.replace(&format!("{{{}}}", p.name), &segment);
        }
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let raw = format!("{}{}", tool.base_url.trim_end_matches('/'), path);
    let mut url =
        Url::parse(&raw).map_err(|e| HttpToolsError::Config(format!("Invalid URL: {e}")))?;

    let mut pairs: Vec<(String, String)> = tool.fixed_query.clone();
    for p in &tool.params {
        if let (Some(key), Some(v)) = (&p.cfg.query, args.get(&p.name)) {
            pairs.push((key.clone(), value_to_string(v)));
        }
    }
    if let Some(AuthConfig::Query { name, value }) = auth {
        pairs.push((name.clone(), value.clone()));
    }
    if !pairs.is_empty() {
        let mut q = url.query_pairs_mut();
        for (k, v) in &pairs {
            q.append_pair(k, v);
        }
    }
    Ok(url)
}

fn build_body(tool: &CompiledTool, args: &Map<String, Value>) -> Option<Value> {
    let targets: Vec<(&str, &Value)> = tool
        .params
        .iter()
        .filter_map(|p| Some((p.cfg.body.as_deref()?, args.get(&p.name)?)))
        .collect();
    if targets.is_empty() {
        return None;
    }

    let mut body = Value::Object(Map::new());
    for (pointer, value) in targets {
        set_pointer(&mut body, pointer, value.clone());
    }
    Some(body)
}

/// Insert `value` at a JSON pointer, creating intermediate objects.
fn set_pointer(root: &mut Value, pointer: &str, value: Value) {
    let segments: Vec<String> = pointer
        .split('/')
        .skip(1)
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut cur = root;
    for seg in parents {
        if !cur.is_object() {
            *cur = Value::Object(Map::new());
        }
        let Value::Object(map) = cur else { return };
        cur = map
            .entry(seg.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !cur.is_object() {
        *cur = Value::Object(Map::new());
    }
    if let Value::Object(map) = cur {
        map.insert(last.clone(), value);
    }
}

fn apply_auth(
    auth: Option<&AuthConfig>,
    request: reqwest::RequestBuilder,
) -> reqwest::RequestBuilder {
    match auth {
        Some(AuthConfig::Bearer { token }) => request.bearer_auth(token),
        Some(AuthConfig::Basic { username, password }) => {
            request.basic_auth(username, Some(password))
        }
        Some(AuthConfig::Header { name, value }) => request.header(name, value),
        Some(AuthConfig::Query { .. } | AuthConfig::None) | None => request,
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Expand `{result}` and `{arg}` placeholders. Unknown placeholders are left as-is.
#[must_use]
pub fn render_template(template: &str, result: &Value, args: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let key = &after[..end];
        if key == "result" {
            out.push_str(&result.to_string());
        } else if let Some(v) = args.get(key) {
            out.push_str(&value_to_string(v));
        } else {
            out.push('{');
            out.push_str(key);
            out.push('}');
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn encode_path_segment(s: &str) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

/// Strip the query string from URLs embedded in a reqwest error (it may carry credentials).
fn redact_reqwest_error(e: &reqwest::Error) -> String {
    let mut msg = e.to_string();
    if let Some(u) = e.url() {
        let mut redacted = u.clone();
        if redacted.query().is_some() {
            redacted.set_query(Some("redacted"));
        }
        let _ = redacted.set_password(None);
        msg = msg.replace(u.as_str(), redacted.as_str());
    }
    msg
}
