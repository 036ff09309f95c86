//! # Call Simulator Backend - Main Application Entry Point
//!
//! HTTP + WebSocket server for the call-center training simulator. Trainees
//! hold a live voice call with a simulated customer over `/ws/call`, and a
//! REST surface handles configuration, evaluation, and correction feedback.
//!
//! ## Application Architecture:
//! - **config / state / error**: configuration layering, shared state,
//!   application errors
//! - **audio**: PCM wire codec, capture batching, playback scheduling
//! - **call**: the per-call state machine and transcript accumulation
//! - **transport**: the realtime provider connection behind a trait seam
//! - **eval / corrections / simulation**: post-call scoring and its inputs
//! - **websocket / handlers / health / middleware**: the service surface

mod audio;       // PCM codec, capture pipeline, playback scheduler
mod call;        // Call session state machine and transcript
mod config;      // Configuration management
mod corrections; // Human-correction feedback store
mod error;       // Error handling types
mod eval;        // Post-call evaluation engine
mod handlers;    // HTTP request handlers
mod health;      // Health check endpoints
mod middleware;  // Custom middleware (logging, metrics)
mod simulation;  // Simulation setup and persona prompts
mod state;       // Application state management
mod transport;   // Realtime streaming transport
mod websocket;   // The /ws/call actor

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use corrections::{CorrectionStore, InMemoryCorrectionStore, JsonlCorrectionStore};
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting call-sim-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let corrections: Arc<dyn CorrectionStore> = match &config.evaluation.corrections_path {
        Some(path) => {
            info!("Correction store persists to {}", path);
            Arc::new(JsonlCorrectionStore::open(path))
        }
        None => Arc::new(InMemoryCorrectionStore::new()),
    };

    let app_state = AppState::new(config.clone(), corrections);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(tracing_actix_web::TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::config::get_config))
                    .route("/config", web::put().to(handlers::config::update_config))
                    .route("/evaluation", web::post().to(handlers::evaluation::evaluate_call))
                    .route(
                        "/corrections",
                        web::post().to(handlers::corrections::submit_correction),
                    )
                    .route(
                        "/corrections",
                        web::get().to(handlers::corrections::recent_corrections),
                    ),
            )
            .route("/ws/call", web::get().to(websocket::call_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize structured logging.
///
/// `RUST_LOG` controls the filter; without it the default is
/// "call_sim_backend=debug,actix_web=info".
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_sim_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
