//! Bounded, debounced automatic continuation.
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::{ClassifierPolicy, Completion, CompletionClassifier};
use crate::config::ContinuationConfig;
use crate::errors::DispatchError;
use crate::message::{Message, Role};

const SLOT_ARMED: u8 = 0;
const SLOT_DISPATCHED: u8 = 1;
const SLOT_CANCELLED: u8 = 2;

/// Starts a new model turn from instruction text.
#[async_trait::async_trait]
pub trait TurnDispatcher: Send + Sync {
    async fn dispatch(&self, text: String) -> Result<(), DispatchError>;
}

/// Dispatcher that hands the instruction to whoever drives the conversation.
#[derive(Clone, Debug)]
pub struct ChannelDispatcher {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl TurnDispatcher for ChannelDispatcher {
    async fn dispatch(&self, text: String) -> Result<(), DispatchError> {
        self.tx.send(text).map_err(|_| DispatchError::Closed)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SchedulerState {
    Idle,
    /// A continuation is waiting for the settle delay.
    Armed,
    /// The continuation has been handed to the dispatcher.
    Dispatched,
}

/// What the scheduler did with a ready message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Decision {
    /// Not an assistant message.
    Ignored,
    /// The message finished naturally; the retry counter was reset.
    Complete,
    /// Truncated, but the retry budget is spent; the counter was reset.
    Exhausted,
    /// Truncated; continuation number `attempt` is scheduled.
    Armed { attempt: u32 },
}

struct PendingDispatch {
    task: JoinHandle<()>,
    slot: Arc<AtomicU8>,
    attempt: u32,
}

/// Per-conversation continuation loop.
///
/// Holds the retry counter and at most one pending dispatch. Every ready
/// message supersedes the pending dispatch before it is classified.
pub struct ContinuationScheduler {
    classifier: CompletionClassifier,
    dispatcher: Arc<dyn TurnDispatcher>,
    max_auto_continues: u32,
    settle_delay: Duration,
    continuation_prompt: String,
    retry_count: u32,
    pending: Option<PendingDispatch>,
}

impl ContinuationScheduler {
    pub fn new(config: &ContinuationConfig, dispatcher: Arc<dyn TurnDispatcher>) -> Self {
        Self {
            classifier: CompletionClassifier::new(ClassifierPolicy::from_config(config)),
            dispatcher,
            max_auto_continues: config.max_auto_continues,
            settle_delay: config.settle_delay_duration(),
            continuation_prompt: config.continuation_prompt.clone(),
            retry_count: 0,
            pending: None,
        }
    }

    /// Replaces the classifier built from the config.
    pub fn with_classifier(mut self, classifier: CompletionClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn classifier(&self) -> &CompletionClassifier {
        &self.classifier
    }

    /// Consecutive continuations issued since the last complete message.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn state(&self) -> SchedulerState {
        match &self.pending {
            None => SchedulerState::Idle,
            Some(pending) => match pending.slot.load(Ordering::SeqCst) {
                SLOT_ARMED => SchedulerState::Armed,
                SLOT_DISPATCHED => SchedulerState::Dispatched,
                _ => SchedulerState::Idle,
            },
        }
    }

    /// Handles the newest message of a conversation whose latest turn is ready.
    pub fn on_ready_message(&mut self, message: &Message) -> Decision {
        self.cancel_pending();
        if message.role != Role::Assistant {
            return Decision::Ignored;
        }

        match self.classifier.classify(&message.content) {
            Completion::Complete => {
                if self.retry_count > 0 {
                    debug!(retries = self.retry_count, "reply completed; resetting retries");
                }
                self.retry_count = 0;
                Decision::Complete
            }
            Completion::Truncated if self.retry_count >= self.max_auto_continues => {
                info!(
                    max = self.max_auto_continues,
                    "auto-continue limit reached; stopping"
                );
                self.retry_count = 0;
                Decision::Exhausted
            }
            Completion::Truncated => {
                self.retry_count += 1;
                let attempt = self.retry_count;
                self.arm(attempt);
                info!(
                    attempt,
                    delay_ms = self.settle_delay.as_millis() as u64,
                    "truncated reply; continuation scheduled"
                );
                Decision::Armed { attempt }
            }
        }
    }

    /// Cancels a dispatch that has not fired yet. Returns whether one was
    /// cancelled. The retry counter is left as is.
    pub fn cancel_pending(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };
        let cancelled = pending
            .slot
            .compare_exchange(
                SLOT_ARMED,
                SLOT_CANCELLED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();
        if cancelled {
            pending.task.abort();
            debug!(attempt = pending.attempt, "pending continuation superseded");
        }
        cancelled
    }

    /// Forgets a dispatch that has already fired, once its instruction has
    /// been received. Returns whether one was cleared; an armed dispatch is
    /// left alone.
    pub fn take_dispatched(&mut self) -> bool {
        let fired = self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.slot.load(Ordering::SeqCst) == SLOT_DISPATCHED);
        if fired {
            self.pending = None;
        }
        fired
    }

    fn arm(&mut self, attempt: u32) {
        let slot = Arc::new(AtomicU8::new(SLOT_ARMED));
        let task = tokio::spawn(dispatch_after_delay(
            self.dispatcher.clone(),
            self.continuation_prompt.clone(),
            self.settle_delay,
            slot.clone(),
            attempt,
        ));
        self.pending = Some(PendingDispatch {
            task,
            slot,
            attempt,
        });
    }
}

impl Drop for ContinuationScheduler {
    fn drop(&mut self) {
        self.cancel_pending();
    }
}

async fn dispatch_after_delay(
    dispatcher: Arc<dyn TurnDispatcher>,
    text: String,
    delay: Duration,
    slot: Arc<AtomicU8>,
    attempt: u32,
) {
    tokio::time::sleep(delay).await;
    if slot
        .compare_exchange(
            SLOT_ARMED,
            SLOT_DISPATCHED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        )
        .is_err()
    {
        return;
    }
    debug!(attempt, "dispatching continuation");
    if let Err(err) = dispatcher.dispatch(text).await {
        warn!(attempt, error = %err, "continuation dispatch failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::Instant;

    fn scheduler(max: u32) -> (ContinuationScheduler, mpsc::UnboundedReceiver<String>) {
        let (dispatcher, rx) = ChannelDispatcher::channel();
        let config = ContinuationConfig::default().max_auto_continues(max);
        (ContinuationScheduler::new(&config, Arc::new(dispatcher)), rx)
    }

    fn truncated() -> Message {
        Message::assistant("Partial tab|le row\n\n[LANJUT]")
    }

    #[tokio::test(start_paused = true)]
    async fn complete_reply_resets_counter_without_dispatch() {
        let (mut scheduler, mut rx) = scheduler(5);
        assert_eq!(
            scheduler.on_ready_message(&truncated()),
            Decision::Armed { attempt: 1 }
        );
        assert_eq!(rx.recv().await.as_deref(), Some("lanjutkan"));

        assert_eq!(
            scheduler.on_ready_message(&Message::assistant("All done.")),
            Decision::Complete
        );
        assert_eq!(scheduler.retry_count(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn user_messages_are_ignored() {
        let (mut scheduler, _rx) = scheduler(5);
        assert_eq!(
            scheduler.on_ready_message(&Message::user("tell me more [LANJUT]")),
            Decision::Ignored
        );
        assert_eq!(scheduler.retry_count(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_waits_for_settle_delay() {
        let (mut scheduler, mut rx) = scheduler(5);
        let start = Instant::now();
        scheduler.on_ready_message(&truncated());
        assert_eq!(scheduler.state(), SchedulerState::Armed);

        assert_eq!(rx.recv().await.as_deref(), Some("lanjutkan"));
        assert!(start.elapsed() >= Duration::from_millis(800));
        assert_eq!(scheduler.state(), SchedulerState::Dispatched);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_message_cancels_pending_dispatch() {
        let (mut scheduler, mut rx) = scheduler(5);
        scheduler.on_ready_message(&truncated());
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(
            scheduler.on_ready_message(&Message::user("actually, stop")),
            Decision::Ignored
        );
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(scheduler.retry_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fifth_retry_dispatches_then_sixth_truncation_stops() {
        let (mut scheduler, mut rx) = scheduler(5);
        for attempt in 1..=4 {
            assert_eq!(
                scheduler.on_ready_message(&truncated()),
                Decision::Armed { attempt }
            );
            assert!(rx.recv().await.is_some());
        }
        assert_eq!(scheduler.retry_count(), 4);

        assert_eq!(
            scheduler.on_ready_message(&truncated()),
            Decision::Armed { attempt: 5 }
        );
        assert!(rx.recv().await.is_some());

        assert_eq!(scheduler.on_ready_message(&truncated()), Decision::Exhausted);
        assert_eq!(scheduler.retry_count(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelling_after_dispatch_reports_nothing_cancelled() {
        let (mut scheduler, mut rx) = scheduler(5);
        scheduler.on_ready_message(&truncated());
        assert!(rx.recv().await.is_some());
        assert!(!scheduler.cancel_pending());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn take_dispatched_clears_only_fired_dispatches() {
        let (mut scheduler, mut rx) = scheduler(5);
        scheduler.on_ready_message(&truncated());
        assert!(!scheduler.take_dispatched());
        assert_eq!(scheduler.state(), SchedulerState::Armed);

        assert!(rx.recv().await.is_some());
        assert!(scheduler.take_dispatched());
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.retry_count(), 1);
    }

    #[tokio::test]
    async fn channel_dispatcher_reports_closed_receiver() {
        let (dispatcher, rx) = ChannelDispatcher::channel();
        drop(rx);
        assert_eq!(
            dispatcher.dispatch("lanjutkan".into()).await,
            Err(DispatchError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_scheduler_aborts_pending_dispatch() {
        let (mut scheduler, mut rx) = scheduler(5);
        scheduler.on_ready_message(&truncated());
        drop(scheduler);
        assert_eq!(rx.recv().await, None);
    }
}
