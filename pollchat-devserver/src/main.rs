//! `PollChat` development backend: in-memory chat API over HTTP.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:8080 with alice, bob and carol
//! cargo run --bin pollchat-devserver
//!
//! # Slow replies, no client-token echo
//! cargo run --bin pollchat-devserver -- --latency-ms 800 --no-echo-client-token
//! ```

use std::sync::Arc;

use clap::Parser;
use pollchat_devserver::config::{DevServerCliArgs, DevServerConfig};
use pollchat_devserver::server::{self, ServerState};
use pollchat_devserver::store::Backend;

#[tokio::main]
async fn main() {
    let cli = DevServerCliArgs::parse();

    let config = match DevServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        users = config.users.len(),
        "starting pollchat devserver"
    );

    let backend =
        Backend::new(config.users.clone()).with_echo_client_token(config.echo_client_token);
    let state = ServerState::new(Arc::new(backend)).with_latency(config.latency);

    match server::start_server(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "devserver listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "devserver task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start devserver");
            std::process::exit(1);
        }
    }
}
