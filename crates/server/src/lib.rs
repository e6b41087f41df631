//! bridgeproxy server library.
//!
//! Thin ambient shell around [`pipeline::router`]: logger initialization, TCP
//! listener binding, and graceful shutdown. All request handling lives in
//! `pipeline`; this crate owns nothing but the process-level wiring.

#![deny(missing_docs)]

mod error;
mod logger;

use std::net::SocketAddr;

use anyhow::anyhow;
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Configuration for serving bridgeproxy.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The loaded bridgeproxy configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "pipeline=debug,server=info").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
}

/// Starts and runs the bridgeproxy server with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);

    log::info!("bridgeproxy {version}");

    let app = pipeline::router(&config);

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(Error::Bind)
        .map_err(|e| anyhow!(e))?;

    log::info!("listening on http://{listen_address}");
    log::info!("messages endpoint: http://{listen_address}/v1/messages");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(Error::Server).map_err(|e| anyhow!(e))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully");
        }
    }

    Ok(())
}
