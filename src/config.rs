use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    pub claude_api_key: String,
    pub claude_model: Option<String>,
    pub airtable_api_key: String,
    pub airtable_base_id: String,
    /// Hard bound on reasoning-engine calls per inbound message
    pub max_tool_steps: usize,
    /// Idle time after which a session restarts as a fresh conversation
    pub session_idle_timeout: Duration,
    /// Transcript retention: total turns kept, and how many of the oldest
    /// turns survive trimming as fixed context
    pub session_history_cap: usize,
    pub session_history_prefix: usize,
    /// Cadence of the background sweep over idle sessions / stale confirmations
    pub sweep_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .expect("PORT must be a valid number"),
            claude_api_key: env::var("CLAUDE_API_KEY").expect("CLAUDE_API_KEY must be set"),
            claude_model: env::var("CLAUDE_MODEL").ok(),
            airtable_api_key: env::var("AIRTABLE_API_KEY").expect("AIRTABLE_API_KEY must be set"),
            airtable_base_id: env::var("AIRTABLE_BASE_ID").expect("AIRTABLE_BASE_ID must be set"),
            max_tool_steps: env::var("MAX_TOOL_STEPS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("MAX_TOOL_STEPS must be a valid number"),
            session_idle_timeout: Duration::from_secs(
                60 * env::var("SESSION_IDLE_TIMEOUT_MINUTES")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse::<u64>()
                    .expect("SESSION_IDLE_TIMEOUT_MINUTES must be a valid number"),
            ),
            session_history_cap: env::var("SESSION_HISTORY_CAP")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("SESSION_HISTORY_CAP must be a valid number"),
            session_history_prefix: env::var("SESSION_HISTORY_PREFIX")
                .unwrap_or_else(|_| "2".to_string())
                .parse()
                .expect("SESSION_HISTORY_PREFIX must be a valid number"),
            sweep_interval: Duration::from_secs(
                60 * env::var("SWEEP_INTERVAL_MINUTES")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse::<u64>()
                    .expect("SWEEP_INTERVAL_MINUTES must be a valid number"),
            ),
        }
    }
}
