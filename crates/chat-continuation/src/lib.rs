//! Truncation-aware chat streaming with bounded automatic continuation.
//!
//! A model turn is a stream of [`Chunk`]s. The [`StreamInterceptor`] holds the
//! terminal chunks of each turn until the finish reason is known and, when the
//! turn hit its output-length limit, appends the continuation marker to the
//! text. The [`CompletionClassifier`] decides from the finished text alone
//! whether a reply is complete, and the [`ContinuationScheduler`] issues at most
//! `max_auto_continues` debounced "continue" turns in a row.
//!
//! [`Conversation`] ties the three together for one chat. Backends live under
//! `vendors::*`.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use chat_continuation::prelude::*;
//! use chat_continuation::vendors::openai_compat::OpenAiCompatProvider;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ChatError> {
//! let backend = Arc::new(OpenAiCompatProvider::from_env()?);
//! let config = ConversationConfig::new(ModelRef::new("openai-compat", "deepseek-chat"))
//!     .continuation(ContinuationConfig::from_env()?);
//! let mut conversation = Conversation::new(backend, config)?;
//!
//! let mut chunks: Vec<Chunk> = Vec::new();
//! let reports = conversation
//!     .send_with_continuations("Compare these three plans in a table.", &mut chunks)
//!     .await?;
//! println!("{} turns", reports.len());
//! # Ok(())
//! # }
//! ```

/// Chunk vocabulary of a streamed turn.
pub mod chunk;
/// Completion heuristics over finished assistant text.
pub mod classifier;
/// Continuation settings and their environment overrides.
pub mod config;
/// Per-conversation driver.
pub mod conversation;
/// Error types for each seam.
pub mod errors;
/// Terminal-chunk holding and continuation-marker injection.
pub mod interceptor;
/// Messages, turn status and message assembly from chunks.
pub mod message;
/// Provider and model identifiers plus per-turn options.
pub mod model;
/// Global tracing subscriber setup.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// System prompt assembly and uploaded file context.
pub mod prompt;
/// Debounced, bounded automatic continuation.
pub mod scheduler;
/// Output sinks for intercepted chunks.
pub mod sink;
/// Backend contract producing a turn's chunk stream.
pub mod source;
/// Vendor-specific backends.
pub mod vendors;

pub use chunk::{Chunk, ChunkClass, FinishReason, StreamId};
pub use classifier::{ClassifierPolicy, Completion, CompletionClassifier};
pub use config::ContinuationConfig;
pub use conversation::{Conversation, ConversationConfig, TurnReport};
pub use errors::{ChatError, DispatchError, InterceptError, SinkError, SourceError};
pub use interceptor::{InterceptOutcome, StreamInterceptor};
pub use message::{Message, MessageBuilder, Role, TurnStatus};
pub use model::{ModelRef, ProviderId, TurnOptions};
pub use observability::init_observability;
pub use prompt::{ConversationContext, FileContext};
pub use scheduler::{
    ChannelDispatcher, ContinuationScheduler, Decision, SchedulerState, TurnDispatcher,
};
pub use sink::{ChunkSink, SseSink};
pub use source::{ChatBackend, FinishReasonReporter, TurnHandle, TurnRequest, finish_reason_channel};
