//! Downstream consumers of intercepted chunks.
use tokio::io::{AsyncWrite, AsyncWriteExt as _};
use tokio::sync::mpsc;

use crate::chunk::Chunk;
use crate::errors::SinkError;

/// Accepts one chunk at a time, in sequence.
#[async_trait::async_trait]
pub trait ChunkSink: Send {
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError>;
}

#[async_trait::async_trait]
impl ChunkSink for Vec<Chunk> {
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        self.push(chunk);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChunkSink for mpsc::Sender<Chunk> {
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        self.send(chunk).await.map_err(|_| SinkError::Closed)
    }
}

#[async_trait::async_trait]
impl ChunkSink for mpsc::UnboundedSender<Chunk> {
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        self.send(chunk).map_err(|_| SinkError::Closed)
    }
}

#[async_trait::async_trait]
impl<'a, S: ChunkSink + ?Sized> ChunkSink for &'a mut S {
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        (**self).write(chunk).await
    }
}

/// Encodes chunks as server-sent events (`data: {json}`), the framing the
/// browser client reads.
pub struct SseSink<W> {
    writer: W,
}

impl<W> SseSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes the end-of-stream sentinel and flushes.
    pub async fn finish(&mut self) -> Result<(), SinkError> {
        self.write_frame("[DONE]").await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    async fn write_frame(&mut self, data: &str) -> Result<(), SinkError> {
        let frame = format!("data: {data}\n\n");
        self.writer
            .write_all(frame.as_bytes())
            .await
            .map_err(|e| SinkError::Write(e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SinkError::Write(e.to_string()))
    }
}

#[async_trait::async_trait]
impl<W> ChunkSink for SseSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, chunk: Chunk) -> Result<(), SinkError> {
        let data = serde_json::to_string(&chunk).map_err(|e| SinkError::Write(e.to_string()))?;
        self.write_frame(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::FinishReason;

    #[tokio::test]
    async fn sse_sink_frames_each_chunk_and_terminates() {
        let mut sink = SseSink::new(Vec::<u8>::new());
        sink.write(Chunk::text_delta("txt-0", "Hi")).await.expect("write");
        sink.write(Chunk::finish(FinishReason::Stop)).await.expect("write");
        sink.finish().await.expect("finish");

        let out = String::from_utf8(sink.into_inner()).expect("utf8");
        assert_eq!(
            out,
            "data: {\"type\":\"text-delta\",\"id\":\"txt-0\",\"delta\":\"Hi\"}\n\n\
             data: {\"type\":\"finish\",\"finishReason\":\"stop\"}\n\n\
             data: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn closed_channel_reports_closed() {
        let (mut tx, rx) = mpsc::channel::<Chunk>(1);
        drop(rx);
        assert_eq!(
            tx.write(Chunk::StartStep).await,
            Err(SinkError::Closed)
        );
    }
}
