//! Diameter over HTTP
//!
//! Accepts one encoded Credit-Control-Request per POST and answers with the
//! encoded Credit-Control-Answer. Useful for peers behind HTTP gateways and
//! for testing without a TCP listener.

use actix_web::{web, HttpRequest, HttpResponse};
use apolo_core::AppError;
use apolo_sessions::DiameterAgent;
use tracing::instrument;

/// Header naming the connection disconnect requests are routed to
pub const CONNECTION_HEADER: &str = "X-Connection-Id";

/// POST /api/v1/diameter
#[instrument(skip(agent, http_req, body), fields(len = body.len()))]
pub async fn credit_control(
    agent: web::Data<DiameterAgent>,
    http_req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let conn_id = http_req
        .headers()
        .get(CONNECTION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http")
        .to_string();

    let answer = agent.handle_bytes(body, &conn_id).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/octet-stream")
        .body(answer))
}

/// Configure Diameter routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/diameter", web::post().to(credit_control));
}
