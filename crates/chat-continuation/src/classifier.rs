//! Decides whether a finished assistant message is a truncated fragment.
//!
//! The continuation marker written by the interceptor is authoritative. The
//! remaining rules only cover replies that reached the client without it and
//! lean towards `Complete` so naturally long answers do not loop.
use crate::config::ContinuationConfig;

const NATURAL_END_CHARS: &[char] = &['.', '!', '?', '。', '）', ')', '」', '】', ':', '：'];
const CODE_FENCE: &str = "```";
const TABLE_DELIMITER: char = '|';

/// Classification of a finished message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    Complete,
    Truncated,
}

impl Completion {
    pub fn is_truncated(self) -> bool {
        matches!(self, Self::Truncated)
    }
}

/// Tunable rule set used by `CompletionClassifier`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierPolicy {
    /// Literal marker that ends a reply truncated at the protocol level.
    pub marker: String,
    /// Replies of this many characters or fewer never trip the length rules.
    pub min_truncation_chars: usize,
    /// Final characters that count as a natural end of a reply.
    pub natural_end_chars: Vec<char>,
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self::from_config(&ContinuationConfig::default())
    }
}

impl ClassifierPolicy {
    pub fn from_config(config: &ContinuationConfig) -> Self {
        Self {
            marker: config.continuation_marker.clone(),
            min_truncation_chars: config.min_truncation_chars,
            natural_end_chars: NATURAL_END_CHARS.to_vec(),
        }
    }
}

/// Pure, synchronous completion classifier.
#[derive(Clone, Debug, Default)]
pub struct CompletionClassifier {
    policy: ClassifierPolicy,
}

impl CompletionClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    /// Classifies the text content of a finished message. First match wins:
    /// marker, natural end, length-gated cut-off, otherwise complete.
    pub fn classify(&self, content: &str) -> Completion {
        let trimmed = content.trim();

        if ends_with_marker(trimmed, &self.policy.marker) {
            return Completion::Truncated;
        }
        if self.has_natural_end(trimmed) {
            return Completion::Complete;
        }

        let long_enough = trimmed.chars().count() > self.policy.min_truncation_chars;
        if !long_enough {
            return Completion::Complete;
        }
        if !content.ends_with('\n') {
            return Completion::Truncated;
        }
        let last_line = trimmed.rsplit('\n').next().unwrap_or_default();
        if last_line.contains(TABLE_DELIMITER) {
            return Completion::Truncated;
        }
        Completion::Complete
    }

    fn has_natural_end(&self, trimmed: &str) -> bool {
        let Some(last) = trimmed.chars().last() else {
            return false;
        };
        self.policy.natural_end_chars.contains(&last)
            || trimmed.ends_with(CODE_FENCE)
            || last == TABLE_DELIMITER
    }
}

fn ends_with_marker(trimmed: &str, marker: &str) -> bool {
    !marker.is_empty() && trimmed.ends_with(marker)
}

/// Text of the synthetic delta injected after a truncated turn.
pub fn continuation_delta(marker: &str) -> String {
    format!("\n\n{marker}")
}

/// Removes a trailing continuation marker (and the whitespace before it).
///
/// Content without the marker is returned unchanged.
pub fn strip_marker<'a>(content: &'a str, marker: &str) -> &'a str {
    let trimmed = content.trim_end();
    if !ends_with_marker(trimmed, marker) {
        return content;
    }
    trimmed[..trimmed.len() - marker.len()].trim_end()
}
