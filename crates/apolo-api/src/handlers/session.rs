//! Session charging handlers
//!
//! HTTP front for the session engine. Every endpoint takes the same event
//! body and answers in the `ApiResponse` envelope.

use crate::dto::{ApiResponse, LcrResponse, MaxUsageResponse, SessionEventRequest};
use actix_web::{web, HttpResponse};
use apolo_core::models::SessionEvent;
use apolo_core::AppError;
use apolo_sessions::SessionEngine;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

/// Validate the body and build the engine event
fn parse_event(engine: &SessionEngine, req: &SessionEventRequest) -> Result<SessionEvent, AppError> {
    req.validate().map_err(|e| {
        warn!("Session event validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;
    req.to_event(engine.timezone())
}

/// Start charging a session
///
/// POST /api/v1/sessions/start
#[instrument(skip(engine, req), fields(session_id = %req.origin_id))]
pub async fn start_session(
    engine: web::Data<SessionEngine>,
    req: web::Json<SessionEventRequest>,
) -> Result<HttpResponse, AppError> {
    let event = parse_event(&engine, &req)?;
    let granted = engine.session_start(&event, &req.connection_id).await?;

    info!(granted_secs = granted.as_secs(), "Session started");

    Ok(HttpResponse::Ok().json(ApiResponse::success(MaxUsageResponse::new(
        event.origin_id(),
        granted,
    ))))
}

/// Report progress and reserve the next window
///
/// POST /api/v1/sessions/update
#[instrument(skip(engine, req), fields(session_id = %req.origin_id))]
pub async fn update_session(
    engine: web::Data<SessionEngine>,
    req: web::Json<SessionEventRequest>,
) -> Result<HttpResponse, AppError> {
    let event = parse_event(&engine, &req)?;
    let granted = engine.session_update(&event).await?;

    debug!(granted_secs = granted.as_secs(), "Session updated");

    Ok(HttpResponse::Ok().json(ApiResponse::success(MaxUsageResponse::new(
        event.origin_id(),
        granted,
    ))))
}

/// Close a session and record its CDRs
///
/// POST /api/v1/sessions/end
#[instrument(skip(engine, req), fields(session_id = %req.origin_id))]
pub async fn end_session(
    engine: web::Data<SessionEngine>,
    req: web::Json<SessionEventRequest>,
) -> Result<HttpResponse, AppError> {
    let event = parse_event(&engine, &req)?;
    engine.session_end(&event).await?;

    info!("Session ended");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        event.origin_id().to_string(),
        "Session ended",
    )))
}

/// Authorize an event without opening a session
///
/// POST /api/v1/sessions/max-usage
#[instrument(skip(engine, req), fields(session_id = %req.origin_id))]
pub async fn max_usage(
    engine: web::Data<SessionEngine>,
    req: web::Json<SessionEventRequest>,
) -> Result<HttpResponse, AppError> {
    let event = parse_event(&engine, &req)?;
    let granted = engine.get_max_usage(&event).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(MaxUsageResponse::new(
        event.origin_id(),
        granted,
    ))))
}

/// Least cost routing for the event destination
///
/// POST /api/v1/sessions/lcr
#[instrument(skip(engine, req), fields(session_id = %req.origin_id))]
pub async fn lcr_suppliers(
    engine: web::Data<SessionEngine>,
    req: web::Json<SessionEventRequest>,
) -> Result<HttpResponse, AppError> {
    let event = parse_event(&engine, &req)?;
    let suppliers = engine.get_lcr_suppliers(&event).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(LcrResponse {
        session_id: event.origin_id().to_string(),
        suppliers,
    })))
}

/// List every live run
///
/// GET /api/v1/sessions
pub async fn list_sessions(engine: web::Data<SessionEngine>) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(engine.active_sessions()))
}

/// Runs of one session
///
/// GET /api/v1/sessions/{id}
#[instrument(skip(engine))]
pub async fn get_session(
    engine: web::Data<SessionEngine>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let runs = engine.get_session(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(runs)))
}

/// Configure session routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/sessions")
            .route("", web::get().to(list_sessions))
            .route("/start", web::post().to(start_session))
            .route("/update", web::post().to(update_session))
            .route("/end", web::post().to(end_session))
            .route("/max-usage", web::post().to(max_usage))
            .route("/lcr", web::post().to(lcr_suppliers))
            .route("/{id}", web::get().to(get_session)),
    );
}
