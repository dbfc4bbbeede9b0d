//! Session Coordinator
//!
//! Stateful WebSocket signaling server for meeting-room coordination.
//!
//! # Servers
//!
//! A single HTTP server carries everything (default: 0.0.0.0:8080):
//! - `POST /api/meetings` / `GET /api/meetings/{code}` control plane
//! - `GET /ws` WebSocket session protocol
//! - `/health` and `/ready` probes
//!
//! # Architecture
//!
//! Uses an actor model hierarchy:
//! - `RegistryActor` (singleton): Allocates codes, supervises rooms
//! - `RoomActor` (per meeting): Owns membership, chat, and the
//!   media resource ledger
//! - `ConnectionActor` (per socket): Serializes the outbound half of
//!   one WebSocket
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Start the media routing engine
//! 3. Spawn the registry actor
//! 4. Bind and serve the HTTP/WebSocket router
//! 5. Wait for shutdown signal

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use media_engine::{EngineConfig, LocalEngine};
use session_coordinator::actors::metrics::ActorMetrics;
use session_coordinator::actors::registry::RegistryActor;
use session_coordinator::config::Config;
use session_coordinator::directory::InMemoryDirectory;
use session_coordinator::observability::HealthState;
use session_coordinator::server::{app_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Coordinator");

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        bind_address = %config.bind_address,
        media_topology = config.media_topology.as_str(),
        end_on_host_leave = config.end_on_host_leave,
        empty_room_grace_seconds = config.empty_room_grace_seconds,
        max_participants_per_room = config.max_participants_per_room,
        "Configuration loaded successfully"
    );
    let config = Arc::new(config);

    // Start the media routing engine. A bad port range is fatal; the
    // coordinator cannot honor SFU sessions without it.
    let engine = LocalEngine::start(&EngineConfig {
        rtc_port_min: config.rtc_port_min,
        rtc_port_max: config.rtc_port_max,
    })
    .context("Failed to start media engine")?;
    let engine = Arc::new(engine);
    info!("Media engine started");

    let directory = Arc::new(InMemoryDirectory::new());
    let metrics = ActorMetrics::new();
    let health_state = Arc::new(HealthState::new());

    // Root cancellation token; every actor task holds a child of it.
    let shutdown_token = CancellationToken::new();

    let (registry, registry_task) = RegistryActor::spawn(
        Arc::clone(&config),
        engine,
        directory,
        shutdown_token.child_token(),
        Arc::clone(&metrics),
    );
    info!("Actor system initialized");

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;

    let app = app_router(AppState {
        config: Arc::clone(&config),
        registry: registry.clone(),
        metrics,
        health: Arc::clone(&health_state),
    });

    // Bind BEFORE marking ready to fail fast on bind errors.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind server to {addr}"))?;
    info!(addr = %addr, "Server bound successfully");

    health_state.set_ready();

    let server_shutdown_token = shutdown_token.child_token();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        server_shutdown_token.cancelled().await;
        info!("Server shutting down");
    });

    let server_task = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!(error = %e, "Server failed");
        }
    });
    info!(addr = %addr, "Session Coordinator running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Stop accepting traffic first, then cancel the actor tree. The
    // registry drains its rooms on cancellation.
    health_state.set_not_ready();
    shutdown_token.cancel();

    if tokio::time::timeout(Duration::from_secs(30), registry_task)
        .await
        .is_err()
    {
        error!("Registry did not drain within 30s, exiting anyway");
    }

    server_task.abort();

    info!("Session Coordinator shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable
/// because without signal handlers, we cannot gracefully shut down.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
