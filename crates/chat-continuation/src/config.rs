use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ChatError;

/// Marker appended to a truncated reply.
pub const DEFAULT_CONTINUATION_MARKER: &str = "[LANJUT]";
/// Instruction sent as the user turn of an automatic continuation.
pub const DEFAULT_CONTINUATION_PROMPT: &str = "lanjutkan";

/// Tunables for truncation detection and automatic continuation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationConfig {
    /// Literal marker written after a truncated reply.
    #[serde(default = "default_marker")]
    pub continuation_marker: String,
    /// Text of the user turn that asks the model to continue.
    #[serde(default = "default_prompt")]
    pub continuation_prompt: String,
    /// Consecutive automatic continuations before the loop gives up.
    #[serde(default = "default_max_auto_continues")]
    pub max_auto_continues: u32,
    /// Delay between a truncated reply and the continuation request.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Replies at or below this many characters never trip the length heuristics.
    #[serde(default = "default_min_truncation_chars")]
    pub min_truncation_chars: usize,
    /// Upper bound on waiting for a finish reason after the last chunk.
    #[serde(default = "default_finish_reason_timeout_ms")]
    pub finish_reason_timeout_ms: u64,
}

fn default_marker() -> String {
    DEFAULT_CONTINUATION_MARKER.to_string()
}

fn default_prompt() -> String {
    DEFAULT_CONTINUATION_PROMPT.to_string()
}

const fn default_max_auto_continues() -> u32 {
    5
}

const fn default_settle_delay_ms() -> u64 {
    800
}

const fn default_min_truncation_chars() -> usize {
    2_000
}

const fn default_finish_reason_timeout_ms() -> u64 {
    5_000
}

impl Default for ContinuationConfig {
    fn default() -> Self {
        Self {
            continuation_marker: default_marker(),
            continuation_prompt: default_prompt(),
            max_auto_continues: default_max_auto_continues(),
            settle_delay_ms: default_settle_delay_ms(),
            min_truncation_chars: default_min_truncation_chars(),
            finish_reason_timeout_ms: default_finish_reason_timeout_ms(),
        }
    }
}

impl ContinuationConfig {
    /// Builds a config from defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `CHAT_CONTINUATION_MARKER`, `CHAT_CONTINUATION_PROMPT`
    /// - `CHAT_MAX_AUTO_CONTINUES`
    /// - `CHAT_CONTINUE_DELAY_MS`
    /// - `CHAT_TRUNCATION_MIN_CHARS`
    /// - `CHAT_FINISH_REASON_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ChatError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ChatError> {
        let mut config = Self::default();
        if let Some(marker) = lookup("CHAT_CONTINUATION_MARKER") {
            config = config.continuation_marker(marker);
        }
        if let Some(prompt) = lookup("CHAT_CONTINUATION_PROMPT") {
            config = config.continuation_prompt(prompt);
        }
        if let Some(max) = parse_var(&lookup, "CHAT_MAX_AUTO_CONTINUES")? {
            config.max_auto_continues = max;
        }
        if let Some(delay) = parse_var(&lookup, "CHAT_CONTINUE_DELAY_MS")? {
            config.settle_delay_ms = delay;
        }
        if let Some(min_chars) = parse_var(&lookup, "CHAT_TRUNCATION_MIN_CHARS")? {
            config.min_truncation_chars = min_chars;
        }
        if let Some(timeout) = parse_var(&lookup, "CHAT_FINISH_REASON_TIMEOUT_MS")? {
            config.finish_reason_timeout_ms = timeout;
        }
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that would make the marker or prompt unusable.
    pub fn validate(&self) -> Result<(), ChatError> {
        if self.continuation_marker.trim().is_empty() {
            return Err(ChatError::Config(
                "continuation marker must not be empty".into(),
            ));
        }
        if self.continuation_prompt.trim().is_empty() {
            return Err(ChatError::Config(
                "continuation prompt must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn continuation_marker(mut self, marker: impl Into<String>) -> Self {
        self.continuation_marker = marker.into().trim().to_string();
        self
    }

    pub fn continuation_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.continuation_prompt = prompt.into();
        self
    }

    pub fn max_auto_continues(mut self, max: u32) -> Self {
        self.max_auto_continues = max;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay_ms = delay.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn min_truncation_chars(mut self, chars: usize) -> Self {
        self.min_truncation_chars = chars;
        self
    }

    pub fn finish_reason_timeout(mut self, timeout: Duration) -> Self {
        self.finish_reason_timeout_ms = timeout.as_millis().min(u64::MAX as u128) as u64;
        self
    }

    pub fn settle_delay_duration(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn finish_reason_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.finish_reason_timeout_ms)
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ChatError> {
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| ChatError::Config(format!("invalid value for {key}: {raw:?}")))
}
