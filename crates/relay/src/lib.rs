//! MCP relay for an identity platform's management API.
//!
//! Exposes the platform's project administration endpoints (and a weather lookup) as MCP
//! tools, authenticating callers with platform-issued OAuth tokens and keeping per-user
//! credentials encrypted at rest.

pub mod api;
pub mod app;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod identity;
pub mod mcp;
pub mod provision;
pub mod store;

pub use app::{AppState, router, serve};
pub use config::RelayConfig;
