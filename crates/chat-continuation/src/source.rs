//! Chunk source contracts used by model integrations.
//!
//! A backend starts one turn per `TurnRequest` and hands back a `TurnHandle`:
//! the ordered chunk stream plus a separately resolved finish reason, since
//! providers may report the reason at or after the end of the stream.
use std::pin::Pin;

use futures::future::BoxFuture;
use futures::{FutureExt as _, Stream};
use tokio::sync::oneshot;

use crate::chunk::{Chunk, FinishReason};
use crate::errors::SourceError;
use crate::message::Message;
use crate::model::{ModelRef, ProviderId, TurnOptions};

/// Ordered chunks of one turn.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, SourceError>> + Send + 'static>>;

/// Resolves to the turn's finish reason, or `None` when the source never
/// learned it.
pub type FinishReasonFuture = BoxFuture<'static, Option<FinishReason>>;

/// Everything a backend needs to start one turn. Built from explicit
/// conversation state at send time.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnRequest {
    pub turn_id: uuid::Uuid,
    pub conversation_id: uuid::Uuid,
    pub model: ModelRef,
    pub system_prompt: Option<String>,
    /// Conversation history, oldest first, ending with the new user message.
    pub messages: Vec<Message>,
    pub options: TurnOptions,
}

/// Stream handle returned by a backend for one turn.
///
/// The handle is owned by exactly one reader; dropping it releases the
/// underlying connection.
pub struct TurnHandle {
    pub chunks: ChunkStream,
    pub finish_reason: FinishReasonFuture,
}

impl TurnHandle {
    pub fn new(chunks: ChunkStream, finish_reason: FinishReasonFuture) -> Self {
        Self {
            chunks,
            finish_reason,
        }
    }

    /// Builds a handle over an in-memory chunk script. The finish reason is the
    /// one carried by the last terminal chunk of the script.
    pub fn from_chunks(items: Vec<Result<Chunk, SourceError>>) -> Self {
        let reason = items
            .iter()
            .rev()
            .filter_map(|item| item.as_ref().ok())
            .find_map(Chunk::finish_reason);
        Self::new(
            Box::pin(futures::stream::iter(items)),
            futures::future::ready(reason).boxed(),
        )
    }
}

/// Sending half used by a source to resolve its turn's finish reason.
///
/// Dropping the reporter without calling `report` resolves the future to
/// `None`.
pub struct FinishReasonReporter {
    tx: Option<oneshot::Sender<FinishReason>>,
}

impl FinishReasonReporter {
    /// Resolves the finish reason. Only the first report counts.
    pub fn report(&mut self, reason: FinishReason) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(reason);
        }
    }

    pub fn is_reported(&self) -> bool {
        self.tx.is_none()
    }
}

/// Creates a reporter and the future it resolves.
pub fn finish_reason_channel() -> (FinishReasonReporter, FinishReasonFuture) {
    let (tx, rx) = oneshot::channel();
    (
        FinishReasonReporter { tx: Some(tx) },
        async move { rx.await.ok() }.boxed(),
    )
}

/// Produces the chunk stream of a model turn.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the provider id this backend serves.
    fn id(&self) -> ProviderId;

    /// Starts one turn.
    async fn start_turn(&self, req: TurnRequest) -> Result<TurnHandle, SourceError>;
}
