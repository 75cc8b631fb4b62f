use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::dispatch::DispatchOutcome;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Opaque sender identity; messages without one share a default session
    pub sender: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub success: bool,
    pub response: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub needs_confirmation: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub needs_clarification: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub action_completed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub action_cancelled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools_executed: Vec<String>,
    pub steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/chat").route(web::post().to(chat)));
}

/// Handle one inbound chat message
async fn chat(state: web::Data<AppState>, body: web::Json<ChatRequest>) -> impl Responder {
    let request = body.into_inner();
    let sender = request.sender.unwrap_or_else(|| "default".to_string());
    let message = request.message.trim().to_string();

    if message.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "success": false,
            "error": "message must not be empty"
        }));
    }

    log::info!("Message from {}: {}", sender, message);

    let result = state.dispatcher.handle_message(&sender, &message).await;

    if result.outcome == DispatchOutcome::Error {
        let error = result.error.unwrap_or_else(|| "unknown error".to_string());
        log::error!("Dispatch failed for {}: {}", sender, error);
        return HttpResponse::Ok().json(serde_json::json!({
            "success": false,
            "error": error
        }));
    }

    HttpResponse::Ok().json(ChatResponse {
        success: true,
        response: result.response,
        needs_confirmation: result.outcome == DispatchOutcome::AwaitingConfirmation,
        needs_clarification: result.outcome == DispatchOutcome::NeedsClarification,
        action_completed: result.action_completed,
        action_cancelled: result.action_cancelled,
        tools_executed: result.tools_executed,
        steps: result.steps,
        error: None,
    })
}
