//! Streaming chat completions backend (`POST {base_url}/v1/chat/completions`).
//!
//! Works against OpenAI, DeepSeek and other servers that speak the same
//! protocol. The finish reason of each turn is taken from the last
//! `choices[0].finish_reason` seen on the stream.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::OpenAiCompatProvider;
pub use config::{DEFAULT_BASE_URL, OpenAiCompatConfig};
