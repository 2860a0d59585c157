use crate::model::ProviderId;

/// Errors raised by a chunk source before or while a turn is streaming.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Provider returned an application-level failure (HTTP status, auth, etc.).
    #[error("provider error ({provider}): {message}")]
    Provider {
        provider: ProviderId,
        message: String,
        status_code: Option<u16>,
    },
    /// Transport or stream I/O failed.
    #[error("transport error ({provider}): {message}")]
    Transport {
        provider: ProviderId,
        message: String,
    },
    /// Provider response shape or event sequencing was invalid.
    #[error("protocol error ({provider}): {message}")]
    Protocol {
        provider: ProviderId,
        message: String,
    },
}

impl SourceError {
    /// Creates a provider-level error.
    pub fn provider(
        provider: impl Into<ProviderId>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Creates a transport-level error.
    pub fn transport(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Transport {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(provider: impl Into<ProviderId>, message: impl Into<String>) -> Self {
        Self::Protocol {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Returns the provider associated with this error.
    pub fn provider_id(&self) -> &ProviderId {
        match self {
            Self::Provider { provider, .. }
            | Self::Transport { provider, .. }
            | Self::Protocol { provider, .. } => provider,
        }
    }

    /// Returns the human-readable message for this error.
    pub fn message(&self) -> &str {
        match self {
            Self::Provider { message, .. }
            | Self::Transport { message, .. }
            | Self::Protocol { message, .. } => message,
        }
    }
}

/// Errors returned by a `ChunkSink` when a chunk cannot be delivered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The downstream consumer went away.
    #[error("chunk sink closed")]
    Closed,
    /// Writing or encoding the chunk failed.
    #[error("chunk sink write failed: {0}")]
    Write(String),
}

/// Failure of one intercepted turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterceptError {
    /// The chunk source failed before completion. Already forwarded chunks stand.
    #[error(transparent)]
    Source(SourceError),
    /// The downstream sink rejected a chunk.
    #[error(transparent)]
    Sink(SinkError),
}

/// Failure to start a continuation turn.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The receiving side of the dispatcher is gone.
    #[error("turn dispatcher closed")]
    Closed,
}

/// Top-level error type for the public conversation API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    /// Invalid client or conversation configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input.
    #[error("validation error: {0}")]
    Validation(String),
    /// The chunk source failed; surfaced to the consumer as an `error` chunk.
    #[error(transparent)]
    Source(SourceError),
    /// The consumer stopped accepting chunks.
    #[error(transparent)]
    Sink(SinkError),
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChatError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<InterceptError> for ChatError {
    fn from(value: InterceptError) -> Self {
        match value {
            InterceptError::Source(err) => ChatError::Source(err),
            InterceptError::Sink(err) => ChatError::Sink(err),
        }
    }
}

impl From<SourceError> for ChatError {
    fn from(value: SourceError) -> Self {
        ChatError::Source(value)
    }
}
