// Copyright Flow Offload Engine Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP admin endpoint exposing the tunnel auxiliary diagnostic dump.

pub mod error;
mod dump;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use offload_core::DpifClass;
use offload_engine::OffloadCtx;
use tokio::net::TcpListener;
use tower::ServiceBuilder;

use crate::error::Error;

/// Shared state for the HTTP admin server.
#[derive(Clone)]
struct AppState {
    /// The engine context the dump endpoint reads from.
    ctx: Arc<OffloadCtx>,
    /// Which provider's ports this admin server resolves routes against.
    dpif_class: DpifClass,
}

/// Runs the admin HTTP server until `shutdown` resolves.
///
/// # Errors
/// Returns an error if `bind_address` cannot be parsed, the TCP listener
/// cannot be bound, or the server itself fails while serving.
pub async fn run(
    bind_address: &str,
    dpif_class: DpifClass,
    ctx: Arc<OffloadCtx>,
    shutdown: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), Error> {
    let app_state = AppState { ctx, dpif_class };

    let app = Router::new()
        .merge(dump::routes())
        .layer(ServiceBuilder::new())
        .with_state(app_state);

    let addr = bind_address
        .parse::<SocketAddr>()
        .map_err(|e| Error::InvalidBindAddress {
            bind_address: bind_address.to_string(),
            details: e.to_string(),
        })?;

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::BindFailed {
            addr: addr.to_string(),
            details: e.to_string(),
        })?;

    tracing::info!(%addr, "admin HTTP server listening");
    tracing::debug!(route = "/offload/dump-vtp/{port}", method = "GET", "admin route registered");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
        })
        .await
        .map_err(|e| Error::ServerError {
            addr: addr.to_string(),
            details: e.to_string(),
        })
}
