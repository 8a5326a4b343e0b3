//! Conversation Store
//!
//! Holds the ordered message sequence for one session, with a cheap
//! token-cost estimator and an auto-compression operator that elides the
//! middle of long conversations while keeping the most recent exchanges.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Message, Role};

/// Default token budget the estimator is measured against.
pub const DEFAULT_TOKEN_BUDGET: usize = 8000;

/// Auto-compression fires above this fraction of the budget.
pub const COMPRESS_THRESHOLD: f64 = 0.80;

/// Messages preserved verbatim at the tail of a compression.
pub const COMPRESS_KEEP_TAIL: usize = 6;

/// Auto-compression also requires at least this many messages.
const MIN_MESSAGES_FOR_COMPRESS: usize = 10;

// ---------------------------------------------------------------------------
// Token estimation
// ---------------------------------------------------------------------------

/// Estimate the token cost of a piece of text.
///
/// `1.5 × CJK-range chars + 0.25 × ascii-letter words`. Deliberately cheap
/// and monotonic; exact accuracy is not required.
pub fn estimate_tokens(text: &str) -> f64 {
    let cjk = text.chars().filter(|c| is_cjk(*c)).count() as f64;
    let words = text
        .split_whitespace()
        .filter(|w| w.chars().any(|c| c.is_ascii_alphabetic()))
        .count() as f64;
    1.5 * cjk + 0.25 * words
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3000}'..='\u{30FF}'   // CJK punctuation, hiragana, katakana
        | '\u{3400}'..='\u{4DBF}' // CJK extension A
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
        | '\u{F900}'..='\u{FAFF}' // CJK compatibility ideographs
        | '\u{FF00}'..='\u{FFEF}' // full-width forms
    )
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Ordered sequence of role-tagged messages.
///
/// Invariants: non-empty; element 0 is system-role; no two adjacent
/// messages with identical role and content (duplicate pushes are
/// dropped).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
    #[serde(default = "default_budget")]
    token_budget: usize,
}

fn default_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

impl Conversation {
    /// Create a conversation seeded with a system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            token_budget: DEFAULT_TOKEN_BUDGET,
        }
    }

    /// Rebuild from persisted messages. A missing or non-system head gets
    /// a fresh system message inserted so the invariants hold.
    pub fn from_messages(system_prompt: &str, messages: Vec<Message>) -> Self {
        let mut conv = Conversation::new(system_prompt);
        for msg in messages {
            if msg.role == Role::System && conv.messages.len() == 1 {
                // Persisted system prompt wins over the seed.
                conv.messages[0] = msg;
            } else {
                conv.push(msg);
            }
        }
        conv
    }

    pub fn set_token_budget(&mut self, budget: usize) {
        self.token_budget = budget;
    }

    /// Append a message. A push identical in role and content to the
    /// current tail is dropped.
    pub fn push(&mut self, message: Message) {
        if let Some(last) = self.messages.last() {
            if last.role == message.role && last.content == message.content {
                debug!(role = ?message.role, "dropping duplicate adjacent message");
                return;
            }
        }
        self.messages.push(message);
    }

    /// Replace the system message content in place. The system message at
    /// index 0 is the only message ever mutated.
    pub fn set_system(&mut self, content: impl Into<String>) {
        self.messages[0].content = content.into();
    }

    pub fn system(&self) -> &str {
        &self.messages[0].content
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        // Never true: the system message is always present.
        self.messages.is_empty()
    }

    /// Everything after the system message, cloned. What an embedding REPL
    /// appends to its own history.
    pub fn tail(&self) -> Vec<Message> {
        self.messages[1..].to_vec()
    }

    /// Summed token estimate across all messages.
    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum::<f64>()
            .round() as usize
    }

    // -- compression --------------------------------------------------------

    /// Compress if the estimate exceeds the threshold fraction of the
    /// budget and the conversation is long enough. Returns the number of
    /// messages elided, or `None` when no compression was needed.
    pub fn auto_compress(&mut self) -> Option<usize> {
        let threshold = (self.token_budget as f64 * COMPRESS_THRESHOLD) as usize;
        if self.estimated_tokens() <= threshold || self.messages.len() <= MIN_MESSAGES_FOR_COMPRESS {
            return None;
        }
        let elided = self.compress(COMPRESS_KEEP_TAIL);
        if elided > 0 {
            info!(elided, remaining = self.messages.len(), "auto-compressed conversation");
            Some(elided)
        } else {
            None
        }
    }

    /// Replace everything between the system message and the last
    /// `keep_tail` messages with a single system-role marker stating how
    /// many messages were elided. Returns the count; 0 when there is
    /// nothing to elide.
    pub fn compress(&mut self, keep_tail: usize) -> usize {
        // Need head + at least one elidable message + the tail.
        if self.messages.len() <= 1 + keep_tail {
            return 0;
        }
        let elide_end = self.messages.len() - keep_tail;
        let elided = elide_end - 1;
        if elided == 0 {
            return 0;
        }
        let marker = Message::system(format!(
            "[context compressed: {} earlier messages elided]",
            elided
        ));
        self.messages.splice(1..elide_end, std::iter::once(marker));
        elided
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize) -> Conversation {
        let mut conv = Conversation::new("system prompt");
        for i in 0..n {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            conv.push(Message::new(role, format!("message number {}", i)));
        }
        conv
    }

    #[test]
    fn starts_with_system() {
        let conv = Conversation::new("sys");
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
    }

    #[test]
    fn drops_adjacent_duplicates() {
        let mut conv = Conversation::new("sys");
        conv.push(Message::user("hello"));
        conv.push(Message::user("hello"));
        conv.push(Message::user("hello again"));
        assert_eq!(conv.len(), 3);
    }

    #[test]
    fn estimator_counts_words_and_cjk() {
        // 4 ascii words → 1.0; no CJK
        assert_eq!(estimate_tokens("one two three four"), 1.0);
        // 2 CJK characters → 3.0
        assert_eq!(estimate_tokens("你好"), 3.0);
        // numbers-only tokens are not ascii-letter words
        assert_eq!(estimate_tokens("123 456"), 0.0);
    }

    #[test]
    fn estimator_is_monotonic() {
        let short = estimate_tokens("a few words here");
        let long = estimate_tokens("a few words here plus several more words added");
        assert!(long > short);
    }

    #[test]
    fn compress_keeps_system_and_tail() {
        let mut conv = filled(12);
        let before_tail: Vec<Message> = conv.messages()[conv.len() - 6..].to_vec();

        let elided = conv.compress(6);
        assert_eq!(elided, 12 - 6);

        // system, marker, then the six preserved messages
        assert_eq!(conv.len(), 2 + 6);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[1].role, Role::System);
        assert!(conv.messages()[1].content.contains("6 earlier messages elided"));
        assert_eq!(&conv.messages()[2..], &before_tail[..]);
    }

    #[test]
    fn compress_noop_when_short() {
        let mut conv = filled(4);
        assert_eq!(conv.compress(6), 0);
        assert_eq!(conv.len(), 5);
    }

    #[test]
    fn auto_compress_requires_both_conditions() {
        // Long but cheap: many messages, tiny estimate.
        let mut conv = filled(20);
        assert!(conv.auto_compress().is_none());

        // Expensive and long: force a small budget.
        let mut conv = filled(20);
        conv.set_token_budget(10);
        assert!(conv.auto_compress().is_some());
        assert_eq!(conv.messages()[0].role, Role::System);

        // Expensive but short: over budget alone is not enough.
        let mut conv = filled(6);
        conv.set_token_budget(1);
        assert!(conv.auto_compress().is_none());
    }

    #[test]
    fn from_messages_restores_history() {
        let msgs = vec![
            Message::system("persisted sys"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let conv = Conversation::from_messages("seed sys", msgs);
        assert_eq!(conv.system(), "persisted sys");
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.tail().len(), 2);
    }
}
