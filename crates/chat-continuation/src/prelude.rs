//! Common imports for driving a conversation.
pub use crate::{
    ChatBackend, ChatError, Chunk, ChunkSink, ContinuationConfig, Conversation,
    ConversationConfig, Decision, FileContext, FinishReason, Message, ModelRef, ProviderId,
    SseSink, TurnHandle, TurnReport, TurnRequest, TurnStatus,
};
