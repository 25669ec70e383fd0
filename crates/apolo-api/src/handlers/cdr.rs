//! CDR handlers

use crate::dto::{ApiResponse, SessionEventRequest};
use actix_web::{web, HttpResponse};
use apolo_core::AppError;
use apolo_sessions::SessionEngine;
use tracing::{info, instrument, warn};
use validator::Validate;

/// Record a CDR for a call charged outside the engine
///
/// POST /api/v1/cdrs
#[instrument(skip(engine, req), fields(session_id = %req.origin_id))]
pub async fn create_cdr(
    engine: web::Data<SessionEngine>,
    req: web::Json<SessionEventRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("CDR validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let event = req.to_event(engine.timezone())?;
    engine.process_cdr(&event).await?;

    info!("CDR recorded");

    Ok(HttpResponse::Created().json(ApiResponse::with_message(
        event.origin_id().to_string(),
        "CDR recorded",
    )))
}

/// Configure CDR routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/cdrs", web::post().to(create_cdr));
}
