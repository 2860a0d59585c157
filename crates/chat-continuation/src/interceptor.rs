//! Terminal-chunk interception for one turn.
//!
//! Content chunks are forwarded as they arrive. `step-finish`/`finish` chunks
//! are held until the turn's finish reason is known; a `length` finish gets one
//! synthetic text delta carrying the continuation marker, appended to the last
//! text part, ahead of the held chunks.
use std::collections::VecDeque;
use std::time::Duration;

use futures::StreamExt as _;
use tracing::{debug, warn};

use crate::chunk::{Chunk, ChunkClass, FinishReason, StreamId};
use crate::classifier::continuation_delta;
use crate::config::ContinuationConfig;
use crate::errors::InterceptError;
use crate::sink::ChunkSink;
use crate::source::TurnHandle;

/// Ordering state of one intercepted turn.
///
/// Held terminal chunks only ever trail emitted output: admitting a content
/// chunk releases everything held before it, in order.
#[derive(Debug, Default)]
pub(crate) struct TerminalBuffer {
    held: VecDeque<Chunk>,
    ready: VecDeque<Chunk>,
    last_stream_id: Option<StreamId>,
    reported_reason: Option<FinishReason>,
}

impl TerminalBuffer {
    pub(crate) fn admit(&mut self, chunk: Chunk) {
        match chunk.class() {
            ChunkClass::Terminal => {
                if let Some(reason) = chunk.finish_reason() {
                    self.reported_reason = Some(reason);
                }
                self.held.push_back(chunk);
            }
            ChunkClass::Content => {
                self.ready.extend(self.held.drain(..));
                if let Chunk::TextDelta { id, .. } = &chunk {
                    self.last_stream_id = Some(id.clone());
                }
                self.ready.push_back(chunk);
            }
        }
    }

    /// Releases held chunks once the finish reason is settled. Returns whether
    /// the continuation delta was injected.
    pub(crate) fn release(&mut self, reason: Option<FinishReason>, marker: &str) -> bool {
        let injected = match (reason, &self.last_stream_id) {
            (Some(reason), Some(id)) if reason.is_truncation() => {
                self.ready
                    .push_back(Chunk::text_delta(id.clone(), continuation_delta(marker)));
                true
            }
            _ => false,
        };
        self.ready.extend(self.held.drain(..));
        injected
    }

    /// Drops held chunks of a turn that never finished.
    pub(crate) fn discard_held(&mut self) -> usize {
        let dropped = self.held.len();
        self.held.clear();
        dropped
    }

    pub(crate) fn pop_ready(&mut self) -> Option<Chunk> {
        self.ready.pop_front()
    }

    /// Finish reason carried by the most recent terminal chunk.
    pub(crate) fn reported_reason(&self) -> Option<FinishReason> {
        self.reported_reason
    }

    pub(crate) fn held_len(&self) -> usize {
        self.held.len()
    }
}

/// Result of a fully piped turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterceptOutcome {
    /// Resolved finish reason; `None` when it could not be resolved in time.
    pub finish_reason: Option<FinishReason>,
    /// Whether the continuation delta was written.
    pub continuation_injected: bool,
    /// Chunks delivered to the sink, synthetic delta included.
    pub delivered: usize,
}

/// Rewrites a turn's chunk stream so truncation is visible to consumers.
#[derive(Clone, Debug)]
pub struct StreamInterceptor {
    marker: String,
    finish_reason_timeout: Duration,
}

impl Default for StreamInterceptor {
    fn default() -> Self {
        Self::from_config(&ContinuationConfig::default())
    }
}

impl StreamInterceptor {
    pub fn new(marker: impl Into<String>, finish_reason_timeout: Duration) -> Self {
        Self {
            marker: marker.into(),
            finish_reason_timeout,
        }
    }

    pub fn from_config(config: &ContinuationConfig) -> Self {
        Self::new(
            config.continuation_marker.clone(),
            config.finish_reason_timeout_duration(),
        )
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Reads `turn` to completion and writes the rewritten chunk sequence to
    /// `sink`.
    ///
    /// A source failure is written to the sink as an `error` chunk; held
    /// terminal chunks are dropped and nothing is injected.
    pub async fn pipe<S>(
        &self,
        turn: TurnHandle,
        sink: &mut S,
    ) -> Result<InterceptOutcome, InterceptError>
    where
        S: ChunkSink + ?Sized,
    {
        let TurnHandle {
            mut chunks,
            finish_reason,
        } = turn;
        let mut buffer = TerminalBuffer::default();
        let mut delivered = 0_usize;

        while let Some(next) = chunks.next().await {
            match next {
                Ok(chunk) => {
                    if chunk.is_terminal() {
                        debug!(kind = chunk.kind(), "holding terminal chunk");
                    }
                    buffer.admit(chunk);
                    delivered += drain(&mut buffer, sink).await?;
                }
                Err(err) => {
                    let dropped = buffer.discard_held();
                    warn!(error = %err, dropped, "chunk source failed mid-turn");
                    let error_chunk = Chunk::Error {
                        error_text: err.to_string(),
                    };
                    if let Err(sink_err) = sink.write(error_chunk).await {
                        debug!(error = %sink_err, "could not deliver error chunk");
                    }
                    return Err(InterceptError::Source(err));
                }
            }
        }
        drop(chunks);

        let resolved = match tokio::time::timeout(self.finish_reason_timeout, finish_reason).await
        {
            Ok(Some(reason)) => Some(reason),
            Ok(None) => buffer.reported_reason(),
            Err(_) => {
                warn!(
                    timeout_ms = self.finish_reason_timeout.as_millis() as u64,
                    held = buffer.held_len(),
                    "finish reason unresolved; releasing terminal chunks as complete"
                );
                None
            }
        };

        let continuation_injected = buffer.release(resolved, &self.marker);
        if continuation_injected {
            debug!(marker = %self.marker, "injected continuation marker");
        }
        delivered += drain(&mut buffer, sink).await?;

        Ok(InterceptOutcome {
            finish_reason: resolved,
            continuation_injected,
            delivered,
        })
    }
}

async fn drain<S>(buffer: &mut TerminalBuffer, sink: &mut S) -> Result<usize, InterceptError>
where
    S: ChunkSink + ?Sized,
{
    let mut written = 0;
    while let Some(chunk) = buffer.pop_ready() {
        sink.write(chunk).await.map_err(InterceptError::Sink)?;
        written += 1;
    }
    Ok(written)
}
