//! # Call Trainer Relay - Main Application Entry Point
//!
//! HTTP and WebSocket server for cold-call practice. A trainee talks to an
//! AI-voiced persona over `/ws/calls/{call_id}`; the server relays audio to a
//! realtime voice service, records the transcript and scores the call.
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **state**: shared state and metrics
//! - **relay**: the live two-way audio relay and its wire protocols
//! - **call**: persistence, analysis, achievements and the call lifecycle
//! - **websocket**: the client WebSocket endpoint
//! - **handlers**, **health**, **middleware**: the REST surface
//! - **error**: custom error types and HTTP error responses

mod call;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod relay;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::call::analysis::ChatCompletionsAnalyzer;
use crate::call::lifecycle::CallLifecycle;
use crate::call::store::InMemoryCallStore;
use crate::config::AppConfig;
use crate::relay::upstream::RealtimeConnector;
use crate::state::AppState;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    if config.realtime.api_key.is_empty() {
        warn!("No realtime API key configured; calls will be rejected upstream");
    }

    let store = match &config.store.seed_file {
        Some(path) => InMemoryCallStore::from_seed_file(path)?,
        None => {
            warn!("No store.seed_file configured; starting with an empty persona catalog");
            InMemoryCallStore::new()
        }
    };
    let (scripts, personas) = store.catalog_size().await;
    info!(scripts, personas, "Call store ready");

    let lifecycle = CallLifecycle::new(
        Arc::new(store),
        Arc::new(ChatCompletionsAnalyzer::from_config(&config.analysis)?),
        Arc::new(RealtimeConnector::from_config(&config.realtime)),
    );

    let app_state = AppState::new(config.clone(), Arc::new(lifecycle));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse registration order for responses
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/calls", web::post().to(handlers::create_call))
                    .route("/calls/{call_id}", web::get().to(handlers::get_call))
                    .route("/calls/{call_id}/analysis", web::post().to(handlers::retry_analysis)),
            )
            .route("/ws/calls/{call_id}", web::get().to(websocket::call_websocket))
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
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

/// Initialize tracing.
///
/// `RUST_LOG` controls the filter; without it the default is
/// `call_trainer_relay=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_trainer_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve on SIGINT or SIGTERM (Ctrl+C only on non-Unix targets).
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers; falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
