//! Conversation driver: wires backend turns through the interceptor, keeps
//! history and turn status, and feeds finished messages to the continuation
//! scheduler.
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::chunk::{Chunk, FinishReason};
use crate::classifier::strip_marker;
use crate::config::ContinuationConfig;
use crate::errors::{ChatError, SinkError};
use crate::interceptor::StreamInterceptor;
use crate::message::{Message, MessageBuilder, Role, TurnStatus};
use crate::model::{ModelRef, TurnOptions};
use crate::prompt::{ConversationContext, FileContext};
use crate::scheduler::{ChannelDispatcher, ContinuationScheduler, Decision, SchedulerState};
use crate::sink::ChunkSink;
use crate::source::{ChatBackend, TurnRequest};

/// Configuration used to create a `Conversation`.
#[derive(Clone, Debug)]
pub struct ConversationConfig {
    pub model: ModelRef,
    pub turn_options: TurnOptions,
    pub continuation: ContinuationConfig,
    /// Base system prompt; file contexts are appended per turn.
    pub system_prompt: Option<String>,
}

impl ConversationConfig {
    pub fn new(model: ModelRef) -> Self {
        Self {
            model,
            turn_options: TurnOptions::default(),
            continuation: ContinuationConfig::default(),
            system_prompt: None,
        }
    }

    pub fn continuation(mut self, continuation: ContinuationConfig) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn turn_options(mut self, options: TurnOptions) -> Self {
        self.turn_options = options;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Summary of one completed turn.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnReport {
    pub turn_id: uuid::Uuid,
    /// The assistant message as delivered, marker included.
    pub message: Message,
    pub finish_reason: Option<FinishReason>,
    pub continuation_injected: bool,
    pub decision: Decision,
}

/// One chat conversation.
///
/// Owns its history, turn status, file context and continuation scheduler;
/// independent conversations can run in parallel on separate tasks.
pub struct Conversation {
    id: uuid::Uuid,
    backend: Arc<dyn ChatBackend>,
    model: ModelRef,
    turn_options: TurnOptions,
    context: ConversationContext,
    messages: Vec<Message>,
    status: TurnStatus,
    interceptor: StreamInterceptor,
    scheduler: ContinuationScheduler,
    continuations: mpsc::UnboundedReceiver<String>,
}

impl Conversation {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        config: ConversationConfig,
    ) -> Result<Self, ChatError> {
        config.continuation.validate()?;
        if config.model.model.trim().is_empty() {
            return Err(ChatError::Validation("model must not be empty".into()));
        }
        if config.turn_options.max_output_tokens == 0 {
            return Err(ChatError::Validation(
                "max_output_tokens must be greater than 0".into(),
            ));
        }

        let (dispatcher, continuations) = ChannelDispatcher::channel();
        let context = match config.system_prompt {
            Some(prompt) => ConversationContext::new(prompt),
            None => ConversationContext::new(crate::prompt::system_prompt_with_marker(
                &config.continuation.continuation_marker,
            )),
        };
        Ok(Self {
            id: uuid::Uuid::new_v4(),
            backend,
            model: config.model,
            turn_options: config.turn_options,
            context,
            messages: Vec::new(),
            status: TurnStatus::Ready,
            interceptor: StreamInterceptor::from_config(&config.continuation),
            scheduler: ContinuationScheduler::new(&config.continuation, Arc::new(dispatcher)),
            continuations,
        })
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// Consecutive automatic continuations since the last complete reply.
    pub fn retry_count(&self) -> u32 {
        self.scheduler.retry_count()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ConversationContext {
        &mut self.context
    }

    /// Stages files for the next turn.
    pub fn attach_files(&mut self, files: impl IntoIterator<Item = FileContext>) {
        self.context.attach_files(files);
    }

    /// Sends one user turn and streams the rewritten reply into `sink`.
    ///
    /// Any pending automatic continuation is superseded by this message.
    pub async fn send<S>(
        &mut self,
        text: impl Into<String>,
        sink: &mut S,
    ) -> Result<TurnReport, ChatError>
    where
        S: ChunkSink + ?Sized,
    {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(ChatError::Validation("message text must not be empty".into()));
        }
        if self.status.is_in_flight() {
            warn!(conversation_id = %self.id, status = ?self.status, "previous turn was abandoned");
            self.status = TurnStatus::Error;
        }
        let user = Message::user(text);
        self.scheduler.on_ready_message(&user);
        while self.continuations.try_recv().is_ok() {
            debug!(conversation_id = %self.id, "dropping superseded continuation");
        }
        self.messages.push(user);

        let turn_id = uuid::Uuid::new_v4();
        let span = info_span!("turn", conversation_id = %self.id, turn_id = %turn_id);
        self.run_turn(turn_id, sink).instrument(span).await
    }

    /// Waits for the scheduler's next continuation instruction. Returns `None`
    /// when no continuation is pending.
    pub async fn next_continuation(&mut self) -> Option<String> {
        if self.scheduler.state() == SchedulerState::Idle {
            return None;
        }
        let instruction = self.continuations.recv().await;
        self.scheduler.take_dispatched();
        instruction
    }

    /// Sends `text`, then keeps sending continuation turns until the scheduler
    /// goes idle.
    pub async fn send_with_continuations<S>(
        &mut self,
        text: impl Into<String>,
        sink: &mut S,
    ) -> Result<Vec<TurnReport>, ChatError>
    where
        S: ChunkSink + ?Sized,
    {
        let mut reports = vec![self.send(text, &mut *sink).await?];
        while let Some(instruction) = self.next_continuation().await {
            reports.push(self.send(instruction, &mut *sink).await?);
        }
        Ok(reports)
    }

    async fn run_turn<S>(
        &mut self,
        turn_id: uuid::Uuid,
        sink: &mut S,
    ) -> Result<TurnReport, ChatError>
    where
        S: ChunkSink + ?Sized,
    {
        self.transition(TurnStatus::Submitted)?;
        let request = TurnRequest {
            turn_id,
            conversation_id: self.id,
            model: self.model.clone(),
            system_prompt: Some(self.context.next_system_prompt()),
            messages: self.history_for_request(),
            options: self.turn_options.clone(),
        };

        let handle = match self.backend.start_turn(request).await {
            Ok(handle) => handle,
            Err(err) => {
                self.status = TurnStatus::Error;
                warn!(error = %err, "backend failed to start turn");
                let error_chunk = Chunk::Error {
                    error_text: err.to_string(),
                };
                if let Err(sink_err) = sink.write(error_chunk).await {
                    debug!(error = %sink_err, "could not deliver error chunk");
                }
                return Err(err.into());
            }
        };
        self.transition(TurnStatus::Streaming)?;

        let mut builder = MessageBuilder::new();
        let result = {
            let mut tee = MessageTee {
                inner: sink,
                builder: &mut builder,
            };
            self.interceptor.pipe(handle, &mut tee).await
        };

        match result {
            Ok(outcome) => {
                self.transition(TurnStatus::Ready)?;
                let message = builder.finish();
                self.messages.push(message.clone());
                let decision = self.scheduler.on_ready_message(&message);
                info!(
                    finish_reason = ?outcome.finish_reason,
                    injected = outcome.continuation_injected,
                    chars = message.content.chars().count(),
                    ?decision,
                    "turn ready"
                );
                Ok(TurnReport {
                    turn_id,
                    message,
                    finish_reason: outcome.finish_reason,
                    continuation_injected: outcome.continuation_injected,
                    decision,
                })
            }
            Err(err) => {
                self.status = TurnStatus::Error;
                if !builder.is_empty() {
                    self.messages.push(builder.finish());
                }
                warn!(error = %err, "turn failed");
                Err(err.into())
            }
        }
    }

    fn transition(&mut self, next: TurnStatus) -> Result<(), ChatError> {
        if !self.status.can_transition_to(next) {
            return Err(ChatError::protocol_msg(format!(
                "illegal turn status transition {:?} -> {next:?}",
                self.status
            )));
        }
        self.status = next;
        Ok(())
    }

    fn history_for_request(&self) -> Vec<Message> {
        let marker = self.interceptor.marker();
        self.messages
            .iter()
            .map(|message| match message.role {
                Role::Assistant => Message {
                    content: strip_marker(&message.content, marker).to_string(),
                    ..message.clone()
                },
                Role::User => message.clone(),
            })
            .collect()
    }
}

/// Forwards chunks to the consumer while building the assistant message from
/// exactly what the consumer received.
struct MessageTee<'a, S: ?Sized> {
    inner: &'a mut S,
    builder: &'a mut MessageBuilder,
}

#[async_trait::async_trait]
impl<'a, S> ChunkSink for MessageTee<'a, S>
where
    S: ChunkSink + ?Sized,
{
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        self.builder.apply(&chunk);
        self.inner.write(chunk).await
    }
}
