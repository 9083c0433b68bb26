//! HTTP server for the tool-calling bridge.
//!
//! Assembles `crates/proxy`'s forwarder behind three routes — `POST
//! /v1/messages`, `POST /v1/messages/count_tokens`, `GET /healthz` — and a
//! `CLIENT_API_KEY` auth gate (spec §4.10, §6). Trimmed from the teacher's
//! `crates/server`: no MCP router, OAuth/JWT, TLS termination, or
//! OpenTelemetry export — this bridge's external surface is the three
//! endpoints above, and rate limiting/tracing are left to whatever sits in
//! front of it (DESIGN.md).

mod access_log;
pub mod auth;
mod error;
mod handlers;
pub mod logger;

use std::{net::SocketAddr, sync::Arc};

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;

pub use error::Error;
use proxy::Forwarder;

/// Shared application state, cheap to clone (everything behind an `Arc`).
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<config::Config>,
    pub(crate) forwarder: Arc<Forwarder>,
}

/// Binds a listener and serves the bridge until the process is killed.
///
/// Exit-code contract (spec §6): the caller maps [`Error::Bind`] to exit
/// code 2; configuration failures happen earlier, in `config::Config::from_env`.
pub async fn serve(config: config::Config) -> Result<(), Error> {
    let host = config.server.host.clone();
    let port = if config.server.auto_port { 0 } else { config.server.port };

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e: std::net::AddrParseError| Error::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

    let client = reqwest::Client::builder().build().expect("reqwest client with default TLS config always builds");

    let state = AppState {
        config: Arc::new(config),
        forwarder: Arc::new(Forwarder::new(client)),
    };

    let protected = Router::new()
        .route("/v1/messages", post(handlers::messages))
        .route("/v1/messages/count_tokens", post(handlers::count_tokens))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_client_api_key));

    let app = Router::new()
        .route("/healthz", get(handlers::healthz))
        .merge(protected)
        .layer(access_log::AccessLogLayer)
        .with_state(state);

    let listener = TcpListener::bind(addr).await.map_err(Error::Bind)?;
    let local_addr = listener.local_addr().map_err(Error::Bind)?;
    log::info!("listening on {local_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(Error::Server)?;

    proxy::token_counter::shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    log::info!("shutdown signal received");
}
