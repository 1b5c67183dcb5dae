//! Crypto Pay webhook receiver.
//!
//! This binary runs a small web server that:
//! - Receives updates pushed by Crypto Pay
//! - Verifies the request signature against the API token
//! - Answers as soon as the update is handed to the handler tasks
//!
//! The bundled handler only logs paid invoices; applications embedding the
//! library bind their own.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cryptopay::{Config, Update};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        webhook_path = %config.webhook_path,
        token_configured = !config.crypto_pay_token.is_empty(),
        handler_timeout_ms = config.handler_timeout_ms,
        max_concurrent_handlers = config.max_concurrent_handlers,
        "config_loaded"
    );

    let webhook = config
        .webhook_builder()
        .on_webhook_error(|e| warn!(error = %e, "delivery_rejected"))
        .on_handler_error(|update, e| {
            error!(
                update_id = update.id,
                update_type = %update.update_type,
                error = %e,
                "handler_error_reported"
            );
        })
        .build()
        .context("Failed to build webhook from CRYPTO_PAY_TOKEN")?;

    webhook
        .registry()
        .on_invoice_paid(|update: Arc<Update>| async move {
            if let Some(invoice) = update.payload.invoice() {
                info!(
                    update_id = update.id,
                    invoice_id = invoice.id,
                    asset = %invoice.asset,
                    amount = %invoice.amount,
                    "invoice_paid"
                );
            }
            Ok(())
        });

    // Build the router
    let app = cryptopay::web::router(&config.webhook_path, Arc::new(webhook))
        .layer(TraceLayer::new_for_http());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "ctrl_c_handler_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "sigterm_handler_failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
