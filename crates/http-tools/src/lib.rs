//! Declarative HTTP tool DSL + runtime.
//!
//! A tool catalog (usually YAML) describes each upstream REST endpoint once: method, path
//! template, where each argument goes, which credential slot authenticates it and how the
//! response is rendered. [`runtime::HttpToolSource`] turns that catalog into MCP tools and
//! executes calls against the upstreams.
//!
//! This crate knows nothing about users, credential storage or the MCP transport.

pub mod config;
pub mod runtime;
pub mod semantics;
pub mod validation;
