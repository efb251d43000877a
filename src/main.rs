//! API Gateway
//!
//! Front door for the SmartDine backend services, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────────┐
//!                       │                        GATEWAY                           │
//!                       │                                                          │
//!   Client Request      │  ┌─────────┐   ┌──────────┐   ┌────────────┐             │
//!   ────────────────────┼─▶│ context │──▶│ identity │──▶│ rate limit │──┐          │
//!                       │  │classify │   │ user/ip  │   │  sliding   │  │          │
//!                       │  └─────────┘   └──────────┘   └────────────┘  │          │
//!                       │                                               ▼          │
//!   Client Response     │  ┌─────────┐   ┌──────────────┐   ┌────────────────┐     │
//!   ◀───────────────────┼──│response │◀──│  forwarder   │◀──│circuit breaker │     │
//!                       │  │ verbatim│   │ timeout, 503 │   │ per service    │     │
//!                       │  └─────────┘   └──────┬───────┘   └────────────────┘     │
//!                       │                       │                                  │
//!                       └───────────────────────┼──────────────────────────────────┘
//!                                               ▼
//!                             auth / restaurant / preference / review services
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::admin::setup_admin_router;
use api_gateway::config::load_config;
use api_gateway::http::{AppState, HttpServer};
use api_gateway::lifecycle::shutdown::recv_shutdown;
use api_gateway::lifecycle::signals::wait_for_signal;
use api_gateway::lifecycle::Shutdown;
use api_gateway::net::tls::load_tls_config;
use api_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "api-gateway", version, about = "API gateway with rate limiting and circuit breaking")]
struct Args {
    /// Path to a TOML configuration file (defaults plus environment otherwise).
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = load_config(args.config.as_deref())?;
    logging::init_logging(&config.observability.log_level);

    tracing::info!("api-gateway v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        window_secs = config.rate_limit.window_secs,
        max_requests = config.rate_limit.max_requests,
        failure_threshold = config.circuit_breaker.failure_threshold,
        recovery_timeout_secs = config.circuit_breaker.recovery_timeout_secs,
        upstreams = config.upstreams.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr);
    }

    let shutdown = Shutdown::new();
    let state = AppState::new(config.clone());

    if config.admin.enabled {
        let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");

        let admin = setup_admin_router(state.clone());
        let admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, admin)
                .with_graceful_shutdown(recv_shutdown(admin_shutdown))
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    let server = HttpServer::with_state(state);
    match &config.listener.tls {
        Some(tls) => {
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            let tls = load_tls_config(tls).await?;
            server.run_tls(addr, tls, shutdown.subscribe()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, shutdown.subscribe()).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
