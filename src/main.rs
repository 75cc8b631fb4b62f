use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;
use std::sync::Arc;

mod ai;
mod airtable;
mod config;
mod controllers;
mod dispatch;
mod execution;
mod http;
mod session;
mod tools;

use ai::{AiClient, ClaudeClient};
use airtable::AirtableClient;
use config::Config;
use dispatch::MessageDispatcher;
use execution::PendingActionManager;
use session::SessionStore;

pub struct AppState {
    pub dispatcher: Arc<MessageDispatcher>,
    pub sessions: Arc<SessionStore>,
    pub pending: Arc<PendingActionManager>,
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env();
    let port = config.port;

    log::info!("Initializing Airtable client for base {}", config.airtable_base_id);
    let airtable = Arc::new(
        AirtableClient::new(&config.airtable_api_key, &config.airtable_base_id, None)
            .expect("Failed to create Airtable client"),
    );

    log::info!("Initializing tool catalogue");
    let registry = Arc::new(tools::create_default_registry(airtable));
    log::info!("Registered {} tools", registry.len());

    let sessions = Arc::new(SessionStore::new(
        config.session_idle_timeout,
        config.session_history_cap,
        config.session_history_prefix,
    ));
    let pending = Arc::new(PendingActionManager::new());

    let claude = ClaudeClient::new(&config.claude_api_key, None, config.claude_model.as_deref())
        .expect("Failed to create Claude client");

    log::info!("Initializing message dispatcher (max {} tool steps)", config.max_tool_steps);
    let dispatcher = Arc::new(MessageDispatcher::new(
        AiClient::Claude(claude),
        registry,
        sessions.clone(),
        pending.clone(),
        config.max_tool_steps,
    ));

    // Background sweep over idle sessions and stale pending actions. A
    // session counts as stale only well past the idle timeout; anything
    // touched more recently is left alone.
    {
        let sessions = sessions.clone();
        let pending = pending.clone();
        let sweep_interval = config.sweep_interval;
        let stale_after = config.session_idle_timeout * 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let swept = sessions.sweep_idle(stale_after);
                let expired = pending.cleanup_expired();
                if swept > 0 || expired > 0 {
                    log::info!(
                        "Sweep removed {} idle sessions, {} expired pending actions",
                        swept,
                        expired
                    );
                }
            }
        });
    }

    log::info!("Starting basebot server on port {}", port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(AppState {
                dispatcher: Arc::clone(&dispatcher),
                sessions: Arc::clone(&sessions),
                pending: Arc::clone(&pending),
            }))
            .wrap(Logger::default())
            .wrap(cors)
            .configure(controllers::health::config)
            .configure(controllers::chat::config)
            .configure(controllers::sessions::config)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
