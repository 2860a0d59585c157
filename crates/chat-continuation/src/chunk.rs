//! Chunk vocabulary shared by chunk sources, the interceptor and sinks.
//!
//! The serialized form matches the browser UI message stream: an object with a
//! kebab-case `type` discriminant and camelCase payload fields.
use std::fmt;

/// Identifies one text part. Deltas with the same id append to the same part.
#[derive(Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub String);

impl StreamId {
    /// Creates a stream id from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Why a turn stopped generating.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// The model chose to stop.
    Stop,
    /// The output-length limit was hit.
    Length,
    /// Output was withheld by a content filter.
    ContentFilter,
    /// The model stopped to call tools.
    ToolCalls,
    /// The provider reported an error.
    Error,
    /// Any other provider-specific reason.
    Other,
}

impl FinishReason {
    /// Normalizes a provider's raw finish reason string.
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" | "stop_sequence" | "completed" => Self::Stop,
            "length" | "max_tokens" | "max_output_tokens" => Self::Length,
            "content_filter" | "content-filter" => Self::ContentFilter,
            "tool_calls" | "tool-calls" | "tool_use" | "function_call" => Self::ToolCalls,
            "error" => Self::Error,
            _ => Self::Other,
        }
    }

    /// Returns true when generation was cut off by the output-length limit.
    pub fn is_truncation(self) -> bool {
        matches!(self, Self::Length)
    }

    /// Wire name of the reason.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
            Self::ContentFilter => "content-filter",
            Self::ToolCalls => "tool-calls",
            Self::Error => "error",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event of a turn's output stream.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum Chunk {
    /// First chunk of a turn.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },
    /// A generation step begins.
    StartStep,
    /// A text part opens.
    TextStart { id: StreamId },
    /// Text fragment appended to the part `id`.
    TextDelta { id: StreamId, delta: String },
    /// A text part closes.
    TextEnd { id: StreamId },
    /// A generation step ended.
    StepFinish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
    /// The turn ended.
    Finish {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        finish_reason: Option<FinishReason>,
    },
    /// The turn failed.
    Error { error_text: String },
}

/// Ordering class of a chunk as seen by the interceptor.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChunkClass {
    /// Forwarded as soon as it arrives.
    Content,
    /// Held back until the turn's finish reason is resolved.
    Terminal,
}

impl Chunk {
    /// Convenience constructor for a text delta.
    pub fn text_delta(id: impl Into<StreamId>, delta: impl Into<String>) -> Self {
        Self::TextDelta {
            id: id.into(),
            delta: delta.into(),
        }
    }

    /// Convenience constructor for a finish chunk.
    pub fn finish(reason: FinishReason) -> Self {
        Self::Finish {
            finish_reason: Some(reason),
        }
    }

    /// Convenience constructor for a step-finish chunk.
    pub fn step_finish(reason: FinishReason) -> Self {
        Self::StepFinish {
            finish_reason: Some(reason),
        }
    }

    pub fn class(&self) -> ChunkClass {
        match self {
            Self::StepFinish { .. } | Self::Finish { .. } => ChunkClass::Terminal,
            Self::Start { .. }
            | Self::StartStep
            | Self::TextStart { .. }
            | Self::TextDelta { .. }
            | Self::TextEnd { .. }
            | Self::Error { .. } => ChunkClass::Content,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.class() == ChunkClass::Terminal
    }

    /// Finish reason carried by a terminal chunk, if any.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        match self {
            Self::StepFinish { finish_reason } | Self::Finish { finish_reason } => *finish_reason,
            _ => None,
        }
    }

    /// Wire discriminant of the chunk.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::StartStep => "start-step",
            Self::TextStart { .. } => "text-start",
            Self::TextDelta { .. } => "text-delta",
            Self::TextEnd { .. } => "text-end",
            Self::StepFinish { .. } => "step-finish",
            Self::Finish { .. } => "finish",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_delta_serializes_with_kebab_type_and_id() {
        let value = serde_json::to_value(Chunk::text_delta("txt-0", "hi")).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"type": "text-delta", "id": "txt-0", "delta": "hi"})
        );
    }

    #[test]
    fn finish_chunk_uses_camel_case_reason_field() {
        let value = serde_json::to_value(Chunk::finish(FinishReason::Length)).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"type": "finish", "finishReason": "length"})
        );
        let parsed: Chunk =
            serde_json::from_value(serde_json::json!({"type": "step-finish"})).expect("parse");
        assert_eq!(parsed, Chunk::StepFinish { finish_reason: None });
    }

    #[test]
    fn only_step_finish_and_finish_are_terminal() {
        assert!(Chunk::finish(FinishReason::Stop).is_terminal());
        assert!(Chunk::step_finish(FinishReason::Stop).is_terminal());
        assert!(!Chunk::text_delta("a", "b").is_terminal());
        assert!(!Chunk::StartStep.is_terminal());
        assert!(
            !Chunk::Error {
                error_text: "x".into()
            }
            .is_terminal()
        );
    }

    #[test]
    fn provider_finish_reasons_are_normalized() {
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
        assert_eq!(FinishReason::from_provider("max_tokens"), FinishReason::Length);
        assert_eq!(FinishReason::from_provider("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("STOP"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("tool_use"), FinishReason::ToolCalls);
        assert_eq!(FinishReason::from_provider("weird"), FinishReason::Other);
        assert!(FinishReason::Length.is_truncation());
        assert!(!FinishReason::Stop.is_truncation());
    }
}
