use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::chunk::{Chunk, FinishReason, StreamId};
use crate::errors::{ChatError, SourceError};
use crate::message::Message;
use crate::model::ProviderId;
use crate::source::{
    ChatBackend, ChunkStream, FinishReasonReporter, TurnHandle, TurnRequest, finish_reason_channel,
};

use super::config::OpenAiCompatConfig;
use super::transport::{CompletionEvent, SseDecoder, map_completion_frame};

const PROVIDER: &str = "openai-compat";
const TEXT_STREAM_ID: &str = "txt-0";

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Chunk source for any endpoint speaking the streaming chat completions
/// protocol (OpenAI, DeepSeek, local gateways).
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    config: OpenAiCompatConfig,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, ChatError> {
        if config.api_key.trim().is_empty() {
            return Err(ChatError::Config(
                "chat completions api_key must not be empty".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Creates a provider from `OPENAI_API_KEY` / `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self, ChatError> {
        Self::new(OpenAiCompatConfig::from_env()?)
    }
}

#[async_trait::async_trait]
impl ChatBackend for OpenAiCompatProvider {
    fn id(&self) -> ProviderId {
        ProviderId::new(PROVIDER)
    }

    async fn start_turn(&self, req: TurnRequest) -> Result<TurnHandle, SourceError> {
        let provider_id = self.id();
        let body = build_request_body(&req);
        debug!(
            turn_id = %req.turn_id,
            conversation_id = %req.conversation_id,
            model = %req.model.model,
            messages = req.messages.len(),
            "starting chat completions stream"
        );

        let mut http_req = self
            .client
            .post(self.config.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(timeout) = req.options.timeout {
            http_req = http_req.timeout(timeout);
        }

        let response = http_req.send().await.map_err(|e| {
            SourceError::transport(provider_id.clone(), format!("request failed: {e}"))
        })?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(SourceError::provider(
                provider_id,
                format!("chat completions request failed with status {status}: {body}"),
                Some(status.as_u16()),
            ));
        }

        let (reporter, finish_reason) = finish_reason_channel();
        let chunks = completion_chunk_stream(
            provider_id,
            Box::pin(response.bytes_stream()),
            reporter,
            Some(req.turn_id.to_string()),
        );
        Ok(TurnHandle::new(chunks, finish_reason))
    }
}

pub(crate) fn build_request_body(req: &TurnRequest) -> serde_json::Value {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);
    if let Some(system_prompt) = req
        .system_prompt
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        messages.push(serde_json::json!({
            "role": "system",
            "content": system_prompt,
        }));
    }
    messages.extend(req.messages.iter().map(wire_message));

    serde_json::json!({
        "model": req.model.model,
        "messages": messages,
        "stream": true,
        "max_tokens": req.options.max_output_tokens,
    })
}

fn wire_message(message: &Message) -> serde_json::Value {
    serde_json::json!({
        "role": message.role.as_str(),
        "content": message.content,
    })
}

/// Turns the raw SSE body into the chunk vocabulary and reports the finish
/// reason once the body ends.
fn completion_chunk_stream(
    provider_id: ProviderId,
    bytes_stream: ByteStream,
    reporter: FinishReasonReporter,
    message_id: Option<String>,
) -> ChunkStream {
    struct State {
        provider_id: ProviderId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        reporter: FinishReasonReporter,
        pending: VecDeque<Chunk>,
        text_open: bool,
        reason: Option<FinishReason>,
        done: bool,
    }

    impl State {
        fn apply(&mut self, events: Vec<CompletionEvent>) {
            for event in events {
                match event {
                    CompletionEvent::Delta(text) => {
                        if !self.text_open {
                            self.text_open = true;
                            self.pending.push_back(Chunk::TextStart {
                                id: StreamId::from(TEXT_STREAM_ID),
                            });
                        }
                        self.pending
                            .push_back(Chunk::text_delta(TEXT_STREAM_ID, text));
                    }
                    CompletionEvent::Finished(reason) => self.reason = Some(reason),
                    CompletionEvent::Done => self.close(),
                }
            }
        }

        fn close(&mut self) {
            if self.done {
                return;
            }
            self.done = true;
            if self.text_open {
                self.pending.push_back(Chunk::TextEnd {
                    id: StreamId::from(TEXT_STREAM_ID),
                });
            }
            self.pending.push_back(Chunk::StepFinish {
                finish_reason: self.reason,
            });
            self.pending.push_back(Chunk::Finish {
                finish_reason: self.reason,
            });
            if let Some(reason) = self.reason {
                self.reporter.report(reason);
            }
        }
    }

    let pending = VecDeque::from([Chunk::Start { message_id }, Chunk::StartStep]);
    let stream = stream::try_unfold(
        State {
            provider_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            reporter,
            pending,
            text_open: false,
            reason: None,
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Ok(Some((chunk, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(bytes)) => {
                        for frame in state.decoder.push_bytes(&bytes) {
                            let events = map_completion_frame(&state.provider_id, &frame)?;
                            state.apply(events);
                        }
                    }
                    Some(Err(e)) => {
                        return Err(SourceError::transport(
                            state.provider_id,
                            format!("streaming read failed: {e}"),
                        ));
                    }
                    None => {
                        if let Some(frame) = state.decoder.finish() {
                            let events = map_completion_frame(&state.provider_id, &frame)?;
                            state.apply(events);
                        }
                        state.close();
                    }
                }
            }
        },
    );
    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelRef, TurnOptions};

    fn request() -> TurnRequest {
        TurnRequest {
            turn_id: uuid::Uuid::new_v4(),
            conversation_id: uuid::Uuid::new_v4(),
            model: ModelRef::new("openai-compat", "deepseek-chat"),
            system_prompt: Some("  be brief  ".into()),
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            options: TurnOptions::default(),
        }
    }

    fn body_stream(parts: &[&'static str]) -> ByteStream {
        let items: Vec<Result<bytes::Bytes, reqwest::Error>> = parts
            .iter()
            .map(|p| Ok(bytes::Bytes::from_static(p.as_bytes())))
            .collect();
        Box::pin(stream::iter(items))
    }

    #[test]
    fn request_body_carries_history_and_output_limit() {
        let body = build_request_body(&request());
        assert_eq!(body["model"], "deepseek-chat");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(
            body["messages"],
            serde_json::json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ])
        );
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let mut req = request();
        req.system_prompt = Some("   ".into());
        let body = build_request_body(&req);
        assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn stream_emits_chunk_sequence_and_reports_length() {
        let (reporter, finish_reason) = finish_reason_channel();
        let chunks: Vec<_> = completion_chunk_stream(
            ProviderId::new(PROVIDER),
            body_stream(&[
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Row 1 |\"}}]}\n\ndata: {\"choi",
                "ces\":[{\"delta\":{\"content\":\" a\"},\"finish_reason\":\"length\"}]}\n\n",
                "data: [DONE]\n\n",
            ]),
            reporter,
            Some("m1".into()),
        )
        .collect()
        .await;
        let chunks: Vec<Chunk> = chunks.into_iter().map(|c| c.expect("chunk")).collect();

        assert_eq!(
            chunks,
            vec![
                Chunk::Start {
                    message_id: Some("m1".into())
                },
                Chunk::StartStep,
                Chunk::TextStart { id: "txt-0".into() },
                Chunk::text_delta("txt-0", "Row 1 |"),
                Chunk::text_delta("txt-0", " a"),
                Chunk::TextEnd { id: "txt-0".into() },
                Chunk::step_finish(FinishReason::Length),
                Chunk::finish(FinishReason::Length),
            ]
        );
        assert_eq!(finish_reason.await, Some(FinishReason::Length));
    }

    #[tokio::test]
    async fn body_without_done_sentinel_still_finishes() {
        let (reporter, finish_reason) = finish_reason_channel();
        let chunks: Vec<_> = completion_chunk_stream(
            ProviderId::new(PROVIDER),
            body_stream(&[
                "data: {\"choices\":[{\"delta\":{\"content\":\"Done.\"},\"finish_reason\":\"stop\"}]}",
            ]),
            reporter,
            None,
        )
        .collect()
        .await;
        assert!(matches!(
            chunks.last(),
            Some(Ok(Chunk::Finish {
                finish_reason: Some(FinishReason::Stop)
            }))
        ));
        assert_eq!(finish_reason.await, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn missing_finish_reason_resolves_to_none() {
        let (reporter, finish_reason) = finish_reason_channel();
        let chunks: Vec<_> = completion_chunk_stream(
            ProviderId::new(PROVIDER),
            body_stream(&["data: [DONE]\n\n"]),
            reporter,
            None,
        )
        .collect()
        .await;
        assert_eq!(chunks.len(), 4);
        assert_eq!(finish_reason.await, None);
    }

    #[tokio::test]
    async fn malformed_frame_fails_the_stream() {
        let (reporter, _finish_reason) = finish_reason_channel();
        let chunks: Vec<_> = completion_chunk_stream(
            ProviderId::new(PROVIDER),
            body_stream(&["data: {oops\n\n"]),
            reporter,
            None,
        )
        .collect()
        .await;
        assert!(matches!(
            chunks.last(),
            Some(Err(SourceError::Protocol { .. }))
        ));
    }

    #[tokio::test]
    async fn env_gated_smoke_turn_if_key_present() {
        if std::env::var("OPENAI_API_KEY")
            .unwrap_or_default()
            .trim()
            .is_empty()
        {
            eprintln!("skipping chat completions smoke test (OPENAI_API_KEY missing)");
            return;
        }
        let provider = OpenAiCompatProvider::from_env().expect("provider");
        let mut req = request();
        req.messages = vec![Message::user("Reply with the single word: ok")];
        let handle = provider.start_turn(req).await.expect("start turn");
        let chunks: Vec<_> = handle.chunks.collect().await;
        assert!(chunks.iter().all(Result::is_ok), "stream failed: {chunks:?}");
    }
}
