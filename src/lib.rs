//! wsrelay is an HTTP gateway for generative-AI API calls.
//!
//! Clients talk plain HTTP to wsrelay as if it were the API itself. Each
//! request is relayed as a JSON frame over a WebSocket to an upstream
//! peer that performs the real call, and the peer's correlated events
//! are turned back into an HTTP response, streamed or buffered.
//!
//! # Architecture
//!
//! - [`cli`] -- Command-line argument parsing with clap derive macros.
//! - [`cmd`] -- Subcommand dispatch and execution (run, init, validate, health, switch).
//! - [`config`] -- Configuration loading, validation, overrides and hot reloading via the
//!   [`ConfigSource`](config::ConfigSource) trait.
//! - [`error`] -- Unified error types using `thiserror`.
//! - [`upstream`] -- Peer registry, per-request message queues, wire protocol and the
//!   WebSocket loop.
//! - [`rotation`] -- Account rotation, the full-cycle breaker, credential discovery and
//!   the switch executor.
//! - [`cache`] -- Best-effort response cache with in-memory and Redis backends.
//! - [`proxy`] -- The per-request relay: retry loop, real and pseudo streaming, status
//!   correction and SSE framing.
//! - [`stats`] -- Call counters with a per-account, per-model breakdown.
//! - [`middleware`] -- API-key admission for relayed requests.
//! - [`admin`] -- Administrative routes: manual switch, cache clear, accounts, config patch.
//! - [`health`] -- `GET /health` endpoint handler returning runtime diagnostics.
//! - [`logging`] -- Structured tracing setup with JSON and pretty-print output.
//! - [`server`] -- Shared application state, both routers, and graceful shutdown.
//!
//! # Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `yaml` | YAML config file support _(enabled by default)_ |
//! | `json` | JSON config file support |
//! | `toml` | TOML config file support |
//! | `redis` | Redis response cache backend |
//! | `sentry-integration` | Sentry error tracking |
//! | `file-backends` | All file format backends |
//! | `full` | All features |

// Binary crate — public functions are internal, not consumed by external users.
#![allow(clippy::missing_errors_doc)]

pub mod admin;
pub mod cache;
pub mod cli;
pub mod cmd;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod proxy;
pub mod rotation;
pub mod server;
pub mod stats;
pub mod upstream;

#[cfg(feature = "sentry-integration")]
pub mod sentry_integration;
