//! Pending-action tracking for mutating tool invocations.
//!
//! When the model proposes a turn containing any mutating operation, the
//! whole invocation set is parked here and the user must approve it before
//! anything executes. At most one pending action exists per sender; a newer
//! proposal replaces an older one.

use crate::ai::types::ToolCall;
use crate::session::topic::ACTION_KEYWORDS;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Pending actions expire after this long; a stale approval must not execute
/// a write the user has long forgotten about
pub const PENDING_ACTION_TIMEOUT: Duration = Duration::from_secs(300);

const APPROVAL_KEYWORDS: &[&str] = &[
    "כן", "אישור", "אוקיי", "בצע", "מאשר", "yes", "confirm", "approve", "ok", "okay",
];

const REJECTION_KEYWORDS: &[&str] = &[
    "לא", "ביטול", "בטל", "עצור", "no", "cancel", "stop",
];

/// How a message relates to a pending action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationReply {
    Approve,
    Reject,
    /// Reads as a new request; the pending action is superseded
    Unrelated,
    /// Cannot tell — the user is asked to answer explicitly, and the pending
    /// action is neither executed nor discarded
    Ambiguous,
}

impl ConfirmationReply {
    /// Deterministic keyword classification.
    ///
    /// Rejection is checked before approval so that a "לא" next to a quoted
    /// approval word never executes.
    pub fn classify(message: &str) -> Self {
        let normalized = message.trim().to_lowercase();
        let words: Vec<&str> = normalized
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()))
            .collect();

        if words.iter().any(|w| REJECTION_KEYWORDS.contains(w)) {
            return ConfirmationReply::Reject;
        }

        if words.iter().any(|w| APPROVAL_KEYWORDS.contains(w)) {
            return ConfirmationReply::Approve;
        }

        if ACTION_KEYWORDS
            .iter()
            .any(|keyword| normalized.contains(keyword))
        {
            return ConfirmationReply::Unrelated;
        }

        ConfirmationReply::Ambiguous
    }
}

/// A held, not-yet-executed set of mutating tool invocations
#[derive(Debug, Clone)]
pub struct PendingAction {
    /// Unique ID for this pending action
    pub id: String,
    /// Sender awaiting confirmation
    pub sender_id: String,
    /// The full invocation set of the suspended turn, in request order
    pub tool_calls: Vec<ToolCall>,
    /// The user message that produced this proposal (audit/explanation only)
    pub originating_message: String,
    /// When this confirmation was requested
    requested_at: Instant,
}

impl PendingAction {
    fn new(sender_id: String, tool_calls: Vec<ToolCall>, originating_message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id,
            tool_calls,
            originating_message,
            requested_at: Instant::now(),
        }
    }

    fn is_expired(&self, timeout: Duration) -> bool {
        self.requested_at.elapsed() > timeout
    }
}

/// Manager for pending actions: one per sender at a time
pub struct PendingActionManager {
    pending: DashMap<String, PendingAction>,
    timeout: Duration,
}

impl PendingActionManager {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            timeout: PENDING_ACTION_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timeout,
        }
    }

    /// Park an invocation set for a sender. Replaces any previous pending
    /// action for that sender.
    pub fn put(
        &self,
        sender_id: &str,
        tool_calls: Vec<ToolCall>,
        originating_message: &str,
    ) -> PendingAction {
        let action = PendingAction::new(
            sender_id.to_string(),
            tool_calls,
            originating_message.to_string(),
        );
        let result = action.clone();
        self.pending.insert(sender_id.to_string(), action);
        result
    }

    /// Get the pending action for a sender, if present and not expired.
    /// Expired entries are removed on sight.
    pub fn get(&self, sender_id: &str) -> Option<PendingAction> {
        if let Some(entry) = self.pending.get(sender_id) {
            if !entry.is_expired(self.timeout) {
                return Some(entry.clone());
            }
            drop(entry);
            self.pending.remove(sender_id);
        }
        None
    }

    /// Consume the pending action for execution
    pub fn take(&self, sender_id: &str) -> Option<PendingAction> {
        self.pending
            .remove(sender_id)
            .map(|(_, action)| action)
            .filter(|action| !action.is_expired(self.timeout))
    }

    /// Discard the pending action without executing it
    pub fn cancel(&self, sender_id: &str) -> Option<PendingAction> {
        self.pending.remove(sender_id).map(|(_, action)| action)
    }

    /// Check if a sender has a live pending action
    pub fn has_pending(&self, sender_id: &str) -> bool {
        self.get(sender_id).is_some()
    }

    /// Clean up expired entries; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, action| !action.is_expired(self.timeout));
        before - self.pending.len()
    }
}

impl Default for PendingActionManager {
    fn default() -> Self {
        Self::new()
    }
}
