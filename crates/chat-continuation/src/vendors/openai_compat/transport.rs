use crate::chunk::FinishReason;
use crate::errors::SourceError;
use crate::model::ProviderId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder; frames may be split across network reads.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some((end, delim_len)) = frame_boundary(&self.buf) {
            let raw: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();
            if let Some(frame) = parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Parses whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_frame(&rest)
    }
}

fn frame_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        if buf[i..].starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if buf[i..].starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn parse_frame(bytes: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(bytes);
    let mut event = None;
    let mut data = Vec::new();
    for line in text.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.trim_start());
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}

/// What one chat completions frame contributes to a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CompletionEvent {
    Delta(String),
    Finished(FinishReason),
    /// The `[DONE]` sentinel.
    Done,
}

pub(crate) fn map_completion_frame(
    provider: &ProviderId,
    frame: &SseFrame,
) -> Result<Vec<CompletionEvent>, SourceError> {
    let data = frame.data.trim();
    if data.is_empty() {
        return Ok(Vec::new());
    }
    if data == "[DONE]" {
        return Ok(vec![CompletionEvent::Done]);
    }
    // Some gateways send failures as a named event with a plain-text body.
    if frame.event.as_deref() == Some("error") && !data.starts_with('{') {
        return Err(SourceError::provider(provider.clone(), data, None));
    }
    let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
        SourceError::protocol(provider.clone(), format!("invalid SSE JSON frame: {e}"))
    })?;
    map_completion_json(provider, &value)
}

pub(crate) fn map_completion_json(
    provider: &ProviderId,
    value: &serde_json::Value,
) -> Result<Vec<CompletionEvent>, SourceError> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("chat completions stream error");
        return Err(SourceError::provider(provider.clone(), message, None));
    }

    let Some(choice) = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|choices| choices.first())
    else {
        return Ok(Vec::new());
    };

    let mut events = Vec::new();
    if let Some(content) = choice
        .get("delta")
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
    {
        events.push(CompletionEvent::Delta(content.to_string()));
    }
    if let Some(reason) = choice.get("finish_reason").and_then(|v| v.as_str()) {
        events.push(CompletionEvent::Finished(FinishReason::from_provider(reason)));
    }
    Ok(events)
}
