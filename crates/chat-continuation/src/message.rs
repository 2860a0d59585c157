use crate::chunk::{Chunk, StreamId};

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One finished conversation message.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: uuid::Uuid,
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Creates a user message with a fresh id.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message with a fresh id.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Lifecycle of the latest turn of a conversation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// Request accepted, no chunk read yet.
    Submitted,
    /// Chunks are being forwarded.
    Streaming,
    /// The turn finished and its message can be classified.
    Ready,
    /// The turn failed.
    Error,
}

impl TurnStatus {
    /// Returns true while a turn is still in flight.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitted | Self::Streaming)
    }

    /// Returns whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: TurnStatus) -> bool {
        matches!(
            (self, next),
            (Self::Ready | Self::Error, Self::Submitted)
                | (Self::Submitted, Self::Streaming)
                | (Self::Streaming, Self::Ready)
                | (Self::Submitted | Self::Streaming, Self::Error)
        )
    }
}

/// Accumulates the assistant message of one turn from the chunks delivered to
/// the consumer.
///
/// Text deltas are grouped per stream id in first-seen order; the message
/// content is the concatenation of the groups.
#[derive(Debug, Default)]
pub struct MessageBuilder {
    parts: Vec<(StreamId, String)>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one delivered chunk. Non-text chunks are ignored.
    pub fn apply(&mut self, chunk: &Chunk) {
        let Chunk::TextDelta { id, delta } = chunk else {
            return;
        };
        match self.parts.iter_mut().find(|(part_id, _)| part_id == id) {
            Some((_, text)) => text.push_str(delta),
            None => self.parts.push((id.clone(), delta.clone())),
        }
    }

    /// Current text of the part `id`.
    pub fn part(&self, id: &StreamId) -> Option<&str> {
        self.parts
            .iter()
            .find(|(part_id, _)| part_id == id)
            .map(|(_, text)| text.as_str())
    }

    /// Returns true when no text has been received.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|(_, text)| text.is_empty())
    }

    /// Concatenated text of every part.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for (_, text) in &self.parts {
            out.push_str(text);
        }
        out
    }

    /// Finalizes the builder into an assistant message.
    pub fn finish(self) -> Message {
        Message::assistant(self.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FinishReason;

    #[test]
    fn deltas_group_by_stream_id_in_first_seen_order() {
        let mut builder = MessageBuilder::new();
        for chunk in [
            Chunk::text_delta("a", "Hello"),
            Chunk::text_delta("b", "[b1]"),
            Chunk::text_delta("a", " world"),
            Chunk::finish(FinishReason::Stop),
            Chunk::text_delta("b", "[b2]"),
        ] {
            builder.apply(&chunk);
        }
        assert_eq!(builder.part(&StreamId::new("a")), Some("Hello world"));
        assert_eq!(builder.text(), "Hello world[b1][b2]");
        let message = builder.finish();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "Hello world[b1][b2]");
    }

    #[test]
    fn builder_without_text_is_empty() {
        let mut builder = MessageBuilder::new();
        builder.apply(&Chunk::StartStep);
        assert!(builder.is_empty());
    }

    #[test]
    fn status_transitions_follow_turn_lifecycle() {
        assert!(TurnStatus::Ready.can_transition_to(TurnStatus::Submitted));
        assert!(TurnStatus::Submitted.can_transition_to(TurnStatus::Streaming));
        assert!(TurnStatus::Streaming.can_transition_to(TurnStatus::Ready));
        assert!(TurnStatus::Streaming.can_transition_to(TurnStatus::Error));
        assert!(!TurnStatus::Submitted.can_transition_to(TurnStatus::Ready));
        assert!(!TurnStatus::Streaming.can_transition_to(TurnStatus::Submitted));
        assert!(TurnStatus::Streaming.is_in_flight());
        assert!(!TurnStatus::Error.is_in_flight());
    }
}
