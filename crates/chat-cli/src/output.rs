//! Terminal renderings of the chunk stream.
use chat_continuation::errors::SinkError;
use chat_continuation::prelude::*;
use tokio::io::{AsyncWriteExt as _, Stdout};

pub enum Output {
    /// Reply text only, as it streams.
    Text(Stdout),
    /// One `data:` frame per chunk.
    Sse(SseSink<Stdout>),
}

impl Output {
    pub fn new(sse: bool) -> Self {
        if sse {
            Self::Sse(SseSink::new(tokio::io::stdout()))
        } else {
            Self::Text(tokio::io::stdout())
        }
    }

    /// Ends the session's output.
    pub async fn finish(&mut self) -> Result<(), SinkError> {
        match self {
            Self::Text(_) => Ok(()),
            Self::Sse(sink) => sink.finish().await,
        }
    }
}

#[async_trait::async_trait]
impl ChunkSink for Output {
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        match self {
            Self::Sse(sink) => sink.write(chunk).await,
            Self::Text(stdout) => {
                let text = match chunk {
                    Chunk::TextDelta { delta, .. } => delta,
                    Chunk::Finish { .. } => "\n".to_string(),
                    Chunk::Error { error_text } => format!("\n[error] {error_text}\n"),
                    _ => return Ok(()),
                };
                stdout
                    .write_all(text.as_bytes())
                    .await
                    .map_err(|e| SinkError::Write(e.to_string()))?;
                stdout
                    .flush()
                    .await
                    .map_err(|e| SinkError::Write(e.to_string()))
            }
        }
    }
}
