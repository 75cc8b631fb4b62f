use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use crate::session::SessionSnapshot;
use crate::AppState;

#[derive(Debug, Serialize)]
struct SessionInfoResponse {
    sender: String,
    has_pending_action: bool,
    #[serde(flatten)]
    snapshot: SessionSnapshot,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/sessions")
            .route("/{sender}", web::get().to(get_session))
            .route("/{sender}/reset", web::post().to(reset_session)),
    );
}

/// Introspect a sender's session and pending state
async fn get_session(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let sender = path.into_inner();

    match state.sessions.snapshot(&sender) {
        Some(snapshot) => HttpResponse::Ok().json(SessionInfoResponse {
            has_pending_action: state.pending.has_pending(&sender),
            sender,
            snapshot,
        }),
        None => HttpResponse::NotFound().json(serde_json::json!({
            "error": "No session for this sender"
        })),
    }
}

/// Force-clear a sender's session and any pending action
async fn reset_session(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let sender = path.into_inner();

    state.sessions.clear(&sender);
    state.pending.cancel(&sender);
    log::info!("Session and pending action cleared for {}", sender);

    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": format!("Memory cleared for {}", sender)
    }))
}
