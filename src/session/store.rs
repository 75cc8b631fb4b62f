//! Per-sender conversational state.
//!
//! Sessions are ephemeral, process-lifetime only. Entries are keyed by the
//! opaque sender id and only mutated synchronously within one request's
//! lifetime; two concurrent messages from the *same* sender (e.g. a duplicate
//! webhook delivery) race on their entry and the winner is undefined —
//! callers that need strict ordering must serialize per-sender dispatch
//! upstream. Different senders never contend.

use crate::ai::types::{ToolCall, ToolResponse};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// Payload of one transcript turn
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    /// The model's raw turn when it requested tools: any preamble text plus
    /// the requested invocations. Kept verbatim so the request/response
    /// pairing survives replay.
    ToolRequests {
        preamble: String,
        calls: Vec<ToolCall>,
    },
    ToolResults { responses: Vec<ToolResponse> },
}

/// One exchange unit in a session transcript
#[derive(Debug, Clone, Serialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: TurnContent,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Turn {
            role: TurnRole::User,
            content: TurnContent::Text { text: text.into() },
            at: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Turn {
            role: TurnRole::Assistant,
            content: TurnContent::Text { text: text.into() },
            at: Utc::now(),
        }
    }

    pub fn tool_requests(preamble: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Turn {
            role: TurnRole::Assistant,
            content: TurnContent::ToolRequests {
                preamble: preamble.into(),
                calls,
            },
            at: Utc::now(),
        }
    }

    pub fn tool_results(responses: Vec<ToolResponse>) -> Self {
        Turn {
            role: TurnRole::Tool,
            content: TurnContent::ToolResults { responses },
            at: Utc::now(),
        }
    }

    /// Text of a plain user turn, if that is what this is
    pub fn user_text(&self) -> Option<&str> {
        match (&self.role, &self.content) {
            (TurnRole::User, TurnContent::Text { text }) => Some(text),
            _ => None,
        }
    }

    fn is_tool_requests(&self) -> bool {
        matches!(self.content, TurnContent::ToolRequests { .. })
    }

    fn is_tool_results(&self) -> bool {
        matches!(self.content, TurnContent::ToolResults { .. })
    }
}

struct Session {
    transcript: Vec<Turn>,
    /// Regenerated on every reset; diagnostics/correlation only
    epoch: String,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl Session {
    fn new() -> Self {
        Session {
            transcript: Vec::new(),
            epoch: Uuid::new_v4().to_string(),
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
        }
    }

    fn reset(&mut self) {
        self.transcript.clear();
        self.epoch = Uuid::new_v4().to_string();
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }
}

/// Read-only view of a session for the introspection endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub epoch: String,
    pub turn_count: usize,
    pub last_activity_at: DateTime<Utc>,
    pub idle_seconds: u64,
    pub transcript: Vec<Turn>,
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    idle_timeout: Duration,
    history_cap: usize,
    history_prefix: usize,
}

impl SessionStore {
    pub fn new(idle_timeout: Duration, history_cap: usize, history_prefix: usize) -> Self {
        SessionStore {
            sessions: DashMap::new(),
            idle_timeout,
            history_cap,
            history_prefix: history_prefix.min(history_cap),
        }
    }

    /// Current transcript for a sender, creating the session if absent.
    ///
    /// Checks the idle timeout first: a session untouched past the threshold
    /// restarts as a fresh conversation before anything is returned, so stale
    /// context never leaks into an unrelated new interaction.
    pub fn history(&self, sender_id: &str) -> Vec<Turn> {
        let mut entry = self
            .sessions
            .entry(sender_id.to_string())
            .or_insert_with(Session::new);

        if !entry.transcript.is_empty() && entry.last_activity.elapsed() > self.idle_timeout {
            log::info!(
                "Session for {} idle past timeout, starting fresh (was epoch {})",
                sender_id,
                entry.epoch
            );
            entry.reset();
        }

        entry.touch();
        entry.transcript.clone()
    }

    /// Current epoch for a sender, creating the session if absent
    pub fn epoch(&self, sender_id: &str) -> String {
        self.sessions
            .entry(sender_id.to_string())
            .or_insert_with(Session::new)
            .epoch
            .clone()
    }

    /// Append a turn, enforcing the retention policy
    pub fn append(&self, sender_id: &str, turn: Turn) {
        let mut entry = self
            .sessions
            .entry(sender_id.to_string())
            .or_insert_with(Session::new);
        entry.transcript.push(turn);
        self.prune(&mut entry.transcript);
        entry.touch();
    }

    /// Clear the transcript and start a new epoch. The entry itself survives.
    pub fn reset(&self, sender_id: &str) -> String {
        let mut entry = self
            .sessions
            .entry(sender_id.to_string())
            .or_insert_with(Session::new);
        entry.reset();
        entry.touch();
        entry.epoch.clone()
    }

    /// Drop the sender's entry entirely (administrative clear)
    pub fn clear(&self, sender_id: &str) {
        self.sessions.remove(sender_id);
    }

    /// Introspection view. Does not create or touch the session.
    pub fn snapshot(&self, sender_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(sender_id).map(|session| SessionSnapshot {
            epoch: session.epoch.clone(),
            turn_count: session.transcript.len(),
            last_activity_at: session.last_activity_at,
            idle_seconds: session.last_activity.elapsed().as_secs(),
            transcript: session.transcript.clone(),
        })
    }

    /// Remove sessions idle longer than `threshold`. Entries touched more
    /// recently are left alone, so the sweep can run concurrently with live
    /// request handling.
    pub fn sweep_idle(&self, threshold: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| session.last_activity.elapsed() <= threshold);
        before - self.sessions.len()
    }

    /// Retention: keep a fixed prefix of the oldest turns for context plus
    /// the most recent suffix. The cut is adjusted so the suffix never opens
    /// with orphaned tool results and the prefix never ends with unanswered
    /// tool requests — either would make the replayed transcript invalid.
    fn prune(&self, transcript: &mut Vec<Turn>) {
        if transcript.len() <= self.history_cap {
            return;
        }

        let suffix_len = self.history_cap - self.history_prefix;
        let mut suffix_start = transcript.len() - suffix_len;
        while suffix_start < transcript.len() && transcript[suffix_start].is_tool_results() {
            suffix_start += 1;
        }

        let mut pruned: Vec<Turn> = transcript[..self.history_prefix].to_vec();
        while pruned.last().map(Turn::is_tool_requests).unwrap_or(false) {
            pruned.pop();
        }
        pruned.extend_from_slice(&transcript[suffix_start..]);

        log::debug!("Trimmed transcript to {} turns", pruned.len());
        *transcript = pruned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(60), 10, 2)
    }

    #[test]
    fn test_history_creates_empty_session() {
        let store = store();
        assert!(store.history("sender-1").is_empty());
        assert!(store.snapshot("sender-1").is_some());
    }

    #[test]
    fn test_idle_timeout_resets_transcript_and_epoch() {
        let store = SessionStore::new(Duration::from_millis(5), 10, 2);
        store.append("sender-1", Turn::user("עדכן את הלקוח דני"));
        let epoch_before = store.epoch("sender-1");

        sleep(Duration::from_millis(20));

        let history = store.history("sender-1");
        assert!(history.is_empty());
        assert_ne!(store.epoch("sender-1"), epoch_before);
    }

    #[test]
    fn test_recent_session_survives_history_read() {
        let store = store();
        store.append("sender-1", Turn::user("היי"));
        assert_eq!(store.history("sender-1").len(), 1);
    }

    #[test]
    fn test_retention_keeps_prefix_and_recent_suffix() {
        let store = store();
        for i in 0..15 {
            store.append("sender-1", Turn::user(format!("message {}", i)));
        }

        let history = store.history("sender-1");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].user_text(), Some("message 0"));
        assert_eq!(history[1].user_text(), Some("message 1"));
        assert_eq!(history[2].user_text(), Some("message 7"));
        assert_eq!(history[9].user_text(), Some("message 14"));
    }

    #[test]
    fn test_retention_never_grows_past_cap() {
        let store = store();
        for i in 0..100 {
            store.append("sender-1", Turn::user(format!("message {}", i)));
        }
        assert_eq!(store.history("sender-1").len(), 10);
    }

    #[test]
    fn test_prune_drops_orphaned_tool_results() {
        let store = store();
        // 2-turn prefix, then alternate requests/results so that the naive
        // suffix cut would land on a results turn
        store.append("sender-1", Turn::user("opening"));
        store.append("sender-1", Turn::assistant("ack"));
        for i in 0..5 {
            store.append(
                "sender-1",
                Turn::tool_requests(
                    "",
                    vec![ToolCall {
                        id: format!("tu_{}", i),
                        name: "search_records".to_string(),
                        arguments: serde_json::json!({}),
                    }],
                ),
            );
            store.append(
                "sender-1",
                Turn::tool_results(vec![ToolResponse::success(
                    format!("tu_{}", i),
                    "ok".to_string(),
                )]),
            );
        }

        let history = store.history("sender-1");
        assert!(history.len() <= 10);
        // After the prefix, the suffix must open with a requests turn (or a
        // plain turn), never with results whose request was trimmed away
        assert!(!history[2].is_tool_results());
    }

    #[test]
    fn test_reset_clears_and_regenerates_epoch() {
        let store = store();
        store.append("sender-1", Turn::user("שלום"));
        let epoch_before = store.epoch("sender-1");

        let epoch_after = store.reset("sender-1");
        assert_ne!(epoch_before, epoch_after);
        assert!(store.history("sender-1").is_empty());
    }

    #[test]
    fn test_sweep_removes_only_stale_sessions() {
        let store = store();
        store.append("old-sender", Turn::user("הודעה ישנה"));
        sleep(Duration::from_millis(30));
        store.append("fresh-sender", Turn::user("הודעה חדשה"));

        let removed = store.sweep_idle(Duration::from_millis(15));
        assert_eq!(removed, 1);
        assert!(store.snapshot("old-sender").is_none());
        assert!(store.snapshot("fresh-sender").is_some());
    }
}
