//! ApoloBilling charging engine server
//!
//! Real-time prepaid charging in front of a JSON-RPC rating engine, exposed
//! over HTTP and Diameter Credit-Control.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use apolo_api::{configure_cdrs, configure_diameter, configure_sessions, health_check};
use apolo_core::config::AppConfig;
use apolo_rater::RaterClient;
use apolo_sessions::{DiameterAgent, SessionEngine};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Configure API routes
fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/health", web::get().to(health_check))
        // Session charging
        .configure(configure_sessions)
        // CDRs for calls charged elsewhere
        .configure(configure_cdrs)
        // Credit-Control over HTTP
        .configure(configure_diameter);
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "apolo_charging={},apolo_api={},apolo_sessions={},apolo_diameter={},apolo_rater={},actix_web=info,reqwest=warn",
            log_level, log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!(
        "Starting ApoloBilling charging engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = AppConfig::load().context("Failed to load configuration")?;
    let bind_addr = config.server_addr();

    info!(
        rater = %config.rater.url,
        debit_interval_secs = config.sessions.debit_interval_secs,
        timezone = %config.sessions.timezone,
        "Configuration loaded"
    );

    let rater = Arc::new(RaterClient::from_config(&config.rater)?);
    let engine = SessionEngine::new(config.sessions.clone(), rater.clone(), rater)?;
    let agent = web::Data::new(DiameterAgent::new(engine.clone(), config.diameter.clone()));
    let engine_data = web::Data::new(engine.clone());

    info!("Starting HTTP server on {}", bind_addr);
    info!("Workers: {}", config.server.workers);

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(engine_data.clone())
            .app_data(agent.clone())
            .configure(configure_routes)
    })
    .workers(config.server.workers)
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run()
    .await?;

    info!("HTTP server stopped, draining sessions");
    engine.shutdown().await;

    Ok(())
}
