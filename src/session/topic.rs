//! Topic-change detection: decides whether an incoming message should start
//! a fresh conversation before it is processed.
//!
//! Heuristic, not correctness-critical. Rules are evaluated in order, first
//! match wins; the explicit greeting / start-over rules are deterministic,
//! the rest is lexical guesswork tuned for short CRM requests. The whole
//! thing sits behind `should_reset` so a better classifier can replace it
//! without touching the orchestration loop.

use crate::session::store::Turn;
use once_cell::sync::Lazy;
use regex::Regex;

/// Messages that are exactly one of these (after trim + casefold) open a new
/// conversation
const GREETING_PHRASES: &[&str] = &[
    "היי",
    "שלום",
    "בוקר טוב",
    "ערב טוב",
    "הי",
    "מה נשמע",
    "מה קורה",
    "hi",
    "hello",
    "hey",
    "good morning",
];

/// Explicit "start over" requests, matched anywhere in the message
const START_OVER_PHRASES: &[&str] = &[
    "התחל מחדש",
    "שיחה חדשה",
    "נקה זיכרון",
    "מחק היסטוריה",
    "start over",
    "new conversation",
    "clear memory",
];

/// Verbs that open a new request
pub const ACTION_KEYWORDS: &[&str] = &[
    "צור", "הוסף", "עדכן", "מצא", "חפש", "בדוק", "הצג", "רשום", "הכנס", "שנה", "מחק", "בטל",
    "create", "add", "update", "find", "search", "check", "show", "delete",
];

/// Words that refer back to the previous exchange
pub const CONTINUATION_KEYWORDS: &[&str] = &[
    "כן", "אישור", "אוקיי", "בצע", "המשך", "תמשיך", "עוד", "גם", "בנוסף", "כמו כן",
    "yes", "ok", "okay", "continue", "also",
];

/// Name-like token: a capitalized Latin word or a Hebrew word, 3+ chars.
/// Hebrew has no case, so every Hebrew word qualifies — the length floor
/// keeps particles like כן/לא/גם out.
static NAME_LIKE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Z\u{05D0}-\u{05EA}][a-z\u{05D0}-\u{05EA}]{2,}").expect("valid regex")
});

const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.3;

pub struct TopicBoundaryDetector {
    similarity_threshold: f64,
}

impl Default for TopicBoundaryDetector {
    fn default() -> Self {
        TopicBoundaryDetector {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

impl TopicBoundaryDetector {
    pub fn new(similarity_threshold: f64) -> Self {
        TopicBoundaryDetector {
            similarity_threshold,
        }
    }

    /// Deterministic boundary check only: a bare greeting or an explicit
    /// start-over request. Unlike the full heuristic, this is allowed to
    /// sweep a pending confirmation aside.
    pub fn is_explicit_boundary(&self, message: &str) -> bool {
        let normalized = message.trim().to_lowercase();

        GREETING_PHRASES.iter().any(|phrase| normalized == *phrase)
            || START_OVER_PHRASES
                .iter()
                .any(|phrase| normalized.contains(phrase))
    }

    /// True if `message` should reset the session before processing
    pub fn should_reset(&self, message: &str, transcript: &[Turn]) -> bool {
        let normalized = message.trim().to_lowercase();

        // Rules 1-2: bare greeting or explicit start-over request
        if self.is_explicit_boundary(message) {
            return true;
        }

        // The remaining rules only make sense against prior context
        if transcript.is_empty() {
            return false;
        }

        // A message that refers back to the previous exchange ("כן", "בצע",
        // "גם ...") continues it, whatever else it contains
        if starts_with_or_is_keyword(&normalized, CONTINUATION_KEYWORDS) {
            return false;
        }

        // Rule 3: a fresh action verb with low lexical overlap against the
        // last user turn reads as a new request
        let has_action = ACTION_KEYWORDS
            .iter()
            .any(|keyword| normalized.contains(keyword));
        if has_action {
            if let Some(last_user_text) = last_user_text(transcript) {
                let similarity = word_overlap_similarity(&normalized, &last_user_text.to_lowercase());
                if similarity < self.similarity_threshold {
                    log::info!(
                        "Topic change: new action request (similarity {:.2})",
                        similarity
                    );
                    return true;
                }
            }
        }

        // Rule 4: an entirely new name or subject
        if has_new_entity(message, transcript) {
            log::info!("Topic change: new name-like token");
            return true;
        }

        false
    }
}

fn starts_with_or_is_keyword(normalized: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| {
        normalized == *keyword || normalized.starts_with(&format!("{} ", keyword))
    })
}

/// Most recent plain user turn in the transcript
fn last_user_text(transcript: &[Turn]) -> Option<String> {
    transcript
        .iter()
        .rev()
        .find_map(|turn| turn.user_text().map(|s| s.to_string()))
}

/// Ratio of shared words (longer than 2 chars) to the larger word set
fn word_overlap_similarity(a: &str, b: &str) -> f64 {
    let words_a: Vec<&str> = a
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .collect();
    let words_b: Vec<&str> = b
        .split_whitespace()
        .filter(|w| w.chars().count() > 2)
        .collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let common = words_a.iter().filter(|w| words_b.contains(w)).count();
    common as f64 / words_a.len().max(words_b.len()) as f64
}

/// True if the message introduces a name-like token absent from the whole
/// prior transcript text
fn has_new_entity(message: &str, transcript: &[Turn]) -> bool {
    let names: Vec<&str> = NAME_LIKE
        .find_iter(message)
        .map(|m| m.as_str())
        .collect();
    if names.is_empty() {
        return false;
    }

    let transcript_text = transcript
        .iter()
        .filter_map(|turn| match &turn.content {
            crate::session::store::TurnContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(" ");

    names.iter().any(|name| !transcript_text.contains(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> TopicBoundaryDetector {
        TopicBoundaryDetector::default()
    }

    fn transcript_of(texts: &[&str]) -> Vec<Turn> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                if i % 2 == 0 {
                    Turn::user(*text)
                } else {
                    Turn::assistant(*text)
                }
            })
            .collect()
    }

    #[test]
    fn test_greeting_resets() {
        let transcript = transcript_of(&["עדכן את הפרויקט", "עודכן"]);
        assert!(detector().should_reset("היי", &transcript));
        assert!(detector().should_reset("  שלום  ", &transcript));
        assert!(detector().should_reset("Hello", &transcript));
    }

    #[test]
    fn test_greeting_on_empty_session_resets_nothing_meaningful() {
        // A greeting with no prior turns still classifies as a boundary; the
        // session is already empty so the reset is a no-op
        assert!(detector().should_reset("היי", &[]));
    }

    #[test]
    fn test_explicit_start_over_resets() {
        let transcript = transcript_of(&["מה הסטטוס של דני", "בתהליך"]);
        assert!(detector().should_reset("התחל מחדש בבקשה", &transcript));
        assert!(detector().should_reset("שיחה חדשה", &transcript));
    }

    #[test]
    fn test_new_action_with_low_similarity_resets() {
        // Prior context is about פרויקט X; the new message is an unrelated
        // update request about a customer
        let transcript = transcript_of(&["מה קורה עם פרויקט X", "הפרויקט פעיל"]);
        assert!(detector().should_reset("עדכן את הלקוח דני לסטטוס בתהליך", &transcript));
    }

    #[test]
    fn test_similar_followup_action_does_not_reset() {
        let transcript =
            transcript_of(&["עדכן את הלקוח דני לסטטוס בתהליך", "לא מצאתי את דני, לחפש שוב?"]);
        // Same words, same subject — overlap is high and nothing new appears
        assert!(!detector().should_reset("עדכן שוב את הלקוח דני לסטטוס בתהליך", &transcript));
    }

    #[test]
    fn test_continuation_keyword_never_resets() {
        let transcript = transcript_of(&["עדכן את הלקוח דני", "לאשר את העדכון? (כן/לא)"]);
        assert!(!detector().should_reset("כן", &transcript));
        assert!(!detector().should_reset("בצע", &transcript));
        assert!(!detector().should_reset("גם את הטלפון", &transcript));
    }

    #[test]
    fn test_new_entity_resets() {
        let transcript = transcript_of(&["מה הסטטוס של העסקה", "העסקה נחתמה"]);
        assert!(detector().should_reset("ומה עם אברהם", &transcript));
    }

    #[test]
    fn test_known_entity_does_not_reset() {
        let transcript = transcript_of(&["מה הסטטוס של אברהם", "אברהם בתהליך"]);
        assert!(!detector().should_reset("הסטטוס של אברהם", &transcript));
    }

    #[test]
    fn test_empty_transcript_ignores_heuristics() {
        assert!(!detector().should_reset("עדכן את הלקוח דני לסטטוס בתהליך", &[]));
    }

    #[test]
    fn test_word_overlap_similarity() {
        assert_eq!(word_overlap_similarity("", ""), 0.0);
        assert_eq!(
            word_overlap_similarity("עדכן לקוח דני", "עדכן לקוח דני"),
            1.0
        );
        let low = word_overlap_similarity("צור ליד חדש למגדל", "מה שלום הפרויקט ברעננה");
        assert!(low < 0.3);
    }
}
