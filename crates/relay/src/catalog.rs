//! The relay's tool table.

use crate::config::RelayConfig;
use anyhow::Context as _;
use idp_relay_http_tools::config::ToolCatalogConfig;
use idp_relay_http_tools::runtime::HttpToolSource;
use std::collections::HashMap;

const TOOLS_YAML: &str = include_str!("../catalog/tools.yaml");

pub const UPSTREAM_MANAGEMENT: &str = "management";
pub const UPSTREAM_PROJECT: &str = "project";
pub const UPSTREAM_WEATHER: &str = "weather";

/// Credential slot backed by the caller's access token.
pub const SLOT_SESSION: &str = "session";
/// Credential slot backed by the user's stored project id and secret.
pub const SLOT_PROJECT: &str = "project";
/// Credential slot backed by the user's stored weather API key, if any.
pub const SLOT_WEATHER: &str = "weather";
/// Query parameter carrying the weather API key.
pub const WEATHER_KEY_PARAM: &str = "key";
/// Context variable holding the user's default project id.
pub const VAR_PROJECT_ID: &str = "project_id";

/// # Errors
///
/// Returns an error if the embedded catalog does not parse.
pub fn load() -> anyhow::Result<ToolCatalogConfig> {
    ToolCatalogConfig::from_yaml(TOOLS_YAML).context("parse embedded tool catalog")
}

#[must_use]
pub fn upstreams(config: &RelayConfig) -> HashMap<String, String> {
    HashMap::from([
        (
            UPSTREAM_MANAGEMENT.to_string(),
            config.management_base_url.clone(),
        ),
        (UPSTREAM_PROJECT.to_string(), config.api_base_url()),
        (UPSTREAM_WEATHER.to_string(), config.weather_base_url.clone()),
    ])
}

/// Compile the catalog against the configured upstreams.
///
/// # Errors
///
/// Returns an error if the catalog is invalid or an upstream URL does not parse.
pub fn build_tool_source(
    config: &RelayConfig,
    client: reqwest::Client,
) -> anyhow::Result<HttpToolSource> {
    HttpToolSource::with_client(
        load()?,
        &upstreams(config),
        config.upstream_timeout(),
        client,
    )
    .context("compile tool catalog")
}
