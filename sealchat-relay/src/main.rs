//! `SealChat` Relay Server -- payload-opaque chat relay.
//!
//! An axum WebSocket server that routes JSON envelopes between logged-in
//! `SealChat` users. Message bodies, nonces and public keys pass through
//! untouched; the relay only reads `type`, `from` and `to`.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin sealchat-relay
//!
//! # Run on custom address
//! cargo run --bin sealchat-relay -- --bind 127.0.0.1:9100
//!
//! # Or via environment variables
//! RELAY_ADDR=127.0.0.1:9100 RELAY_LOG=debug cargo run --bin sealchat-relay
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use sealchat_relay::config::{RelayCliArgs, RelayConfig};
use sealchat_relay::relay::{self, RelayState};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(
        addr = %config.bind_addr,
        max_frame_size = config.max_frame_size,
        outbound_buffer = config.outbound_buffer,
        echo_private_chat = config.echo_private_chat,
        "starting sealchat relay server"
    );

    let state = Arc::new(RelayState::with_options(config.relay_options()));
    let shutdown_state = Arc::clone(&state);
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        tracing::info!("shutdown requested, closing connections");
        shutdown_state.close_all_connections();
    };

    match relay::start_server_with_shutdown(&config.bind_addr, state, shutdown).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "relay server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "relay server task failed");
            }
            tracing::info!("relay server stopped");
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start relay server");
            std::process::exit(1);
        }
    }
}

/// Initialize logging to stderr, or to `file_path` when one is configured.
///
/// `RUST_LOG` takes precedence over `level`. With a log file, returns a
/// [`WorkerGuard`] that must be held until shutdown so buffered entries are
/// flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(split_log_path) else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn split_log_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let file_name = path.file_name()?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    Some((dir, file_name))
}
