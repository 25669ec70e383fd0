//! Health check handler

use actix_web::{web, HttpResponse};
use apolo_sessions::SessionEngine;
use chrono::Utc;
use serde_json::json;

/// Liveness and load
///
/// GET /api/v1/health
pub async fn health_check(engine: web::Data<SessionEngine>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "apolo-charging",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": engine.session_count(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
