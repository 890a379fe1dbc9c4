use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const LIVE_API_BASE: &str = "https://api.stytch.com";
const TEST_API_BASE: &str = "https://test.stytch.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Relay configuration. Every flag has an environment fallback.
#[derive(Debug, Clone, Parser)]
#[command(name = "idp-mcp-relay", version, about = "MCP relay for an identity platform management API")]
pub struct RelayConfig {
    /// Address to listen on.
    #[arg(long, env = "RELAY_BIND", default_value = "127.0.0.1:8787")]
    pub bind: SocketAddr,

    /// Identity platform project that issues session JWTs and OAuth access tokens.
    #[arg(long, env = "IDP_PROJECT_ID")]
    pub project_id: String,

    /// Base64 AES key (16 or 32 bytes) for credentials at rest.
    #[arg(long, env = "ENCRYPTION_KEY", hide_env_values = true)]
    pub encryption_key: String,

    /// Identity platform API base. Derived from the project id when unset.
    #[arg(long, env = "IDP_API_BASE_URL")]
    pub api_base_url: Option<String>,

    #[arg(long, env = "IDP_MANAGEMENT_BASE_URL", default_value = "https://management.stytch.com")]
    pub management_base_url: String,

    #[arg(long, env = "WEATHER_BASE_URL", default_value = "https://api.open-meteo.com")]
    pub weather_base_url: String,

    /// Overrides `{api}/v1/sessions/jwks/{project_id}`.
    #[arg(long, env = "IDP_JWKS_URI")]
    pub jwks_uri: Option<String>,

    /// Overrides `stytch.com/{project_id}`.
    #[arg(long, env = "IDP_ISSUER")]
    pub issuer: Option<String>,

    /// Allowed clock skew when validating token lifetimes.
    #[arg(long, env = "IDP_JWT_LEEWAY_SECS", default_value_t = 60)]
    pub jwt_leeway_secs: u64,

    /// OAuth authorization screen advertised in discovery metadata.
    #[arg(long, env = "IDP_AUTHORIZE_URL", default_value = "https://stytch.com/oauth/authorize")]
    pub authorize_url: String,

    /// Externally visible origin of this relay. Derived from the Host header when unset.
    #[arg(long, env = "RELAY_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Postgres URL for the credential store. Credentials are kept in memory when unset.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Prebuilt UI bundle to serve for unmatched paths.
    #[arg(long, env = "RELAY_ASSETS_DIR")]
    pub assets_dir: Option<PathBuf>,

    #[arg(long, env = "RELAY_UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,

    /// Name given to projects created on a user's first tool call.
    #[arg(long, env = "RELAY_PROVISION_PROJECT_NAME", default_value = "MCP Project")]
    pub provision_project_name: String,

    /// Default filter directive; `RUST_LOG` takes precedence.
    #[arg(long, env = "RELAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Test projects live on a separate API host.
    #[must_use]
    pub fn api_base_url(&self) -> String {
        match &self.api_base_url {
            Some(v) => v.trim_end_matches('/').to_string(),
            None if self.project_id.contains("test") => TEST_API_BASE.to_string(),
            None => LIVE_API_BASE.to_string(),
        }
    }

    #[must_use]
    pub fn issuer(&self) -> String {
        self.issuer
            .clone()
            .unwrap_or_else(|| format!("stytch.com/{}", self.project_id))
    }

    #[must_use]
    pub fn jwks_uri(&self) -> String {
        self.jwks_uri.clone().unwrap_or_else(|| {
            format!("{}/v1/sessions/jwks/{}", self.api_base_url(), self.project_id)
        })
    }

    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs.max(1))
    }
}
