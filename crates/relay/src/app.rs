//! Relay wiring: shared state, router, and the serve loop.

use crate::config::RelayConfig;
use crate::crypto::CredentialCipher;
use crate::identity::IdentityClient;
use crate::provision::Provisioner;
use crate::store::{CredentialStore, KeyValueStore, MemoryStore, PostgresStore};
use crate::{api, auth, catalog, discovery, mcp};
use anyhow::Context as _;
use axum::routing::get;
use axum::{Router, middleware};
use idp_relay_http_tools::runtime::HttpToolSource;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};

/// Shared by every handler and MCP session.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub identity: IdentityClient,
    pub credentials: CredentialStore,
    pub tools: HttpToolSource,
    pub provisioner: Provisioner,
}

impl AppState {
    /// Build state over an already-opened key-value backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the tool catalog is invalid.
    pub fn new(config: RelayConfig, kv: Arc<dyn KeyValueStore>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("idp-mcp-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;

        let cipher = Arc::new(CredentialCipher::new(config.encryption_key.clone()));
        let credentials = CredentialStore::new(kv, cipher);
        let identity = IdentityClient::new(http.clone(), &config);
        let tools = catalog::build_tool_source(&config, http.clone())?;
        let provisioner = Provisioner::new(
            http,
            &config.management_base_url,
            config.provision_project_name.clone(),
            config.upstream_timeout(),
            credentials.clone(),
        );

        Ok(Self {
            config: Arc::new(config),
            identity,
            credentials,
            tools,
            provisioner,
        })
    }

    /// Open the configured backend (Postgres, or memory when no database URL is set).
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable or state cannot be built.
    pub async fn from_config(config: RelayConfig) -> anyhow::Result<Self> {
        let kv: Arc<dyn KeyValueStore> = match &config.database_url {
            Some(url) => Arc::new(PostgresStore::connect(url).await?),
            None => {
                tracing::warn!("no database url configured; credentials are kept in memory");
                Arc::new(MemoryStore::new())
            }
        };
        Self::new(config, kv)
    }
}

pub fn router(state: AppState) -> Router {
    let mcp_routes = Router::new()
        .nest_service("/mcp", mcp::service(state.clone()))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    let mut app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api", api::router(state.clone()))
        .merge(discovery::router())
        .with_state(state.clone())
        .merge(mcp_routes);

    if let Some(dir) = &state.config.assets_dir {
        let index = dir.join("index.html");
        app = app.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(index)));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}

/// Bind, serve until Ctrl-C or SIGTERM, then drain.
///
/// # Errors
///
/// Returns an error if the key is invalid, the backend cannot be opened, or the listener
/// cannot be bound.
pub async fn serve(config: RelayConfig) -> anyhow::Result<()> {
    let bind = config.bind;
    let state = AppState::from_config(config).await?;
    state
        .credentials
        .warm_up()
        .context("ENCRYPTION_KEY is not usable")?;

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    tracing::info!(addr = %bind, project_id = %state.config.project_id, "relay listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server failure")?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
