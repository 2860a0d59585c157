mod cli;
mod config;
mod output;

use std::sync::Arc;

use anyhow::Context as _;
use chat_continuation::prelude::*;
use chat_continuation::vendors::openai_compat::OpenAiCompatProvider;
use clap::Parser as _;
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::config::Settings;
use crate::output::Output;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init();
    chat_continuation::init_observability();
    let cli = Cli::parse();

    let settings = Settings::resolve(&cli)?;
    info!(
        model = %cli.model,
        base_url = %settings.backend.base_url,
        max_auto_continues = settings.conversation.continuation.max_auto_continues,
        "starting chat"
    );
    let backend = Arc::new(OpenAiCompatProvider::new(settings.backend)?);
    let mut conversation = Conversation::new(backend, settings.conversation)?;

    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        files.push(config::load_file(path).await?);
    }
    conversation.attach_files(files);

    let mut out = Output::new(cli.sse);
    match &cli.prompt {
        Some(prompt) => run_turns(&mut conversation, prompt, &mut out).await?,
        None => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(err) = run_turns(&mut conversation, line, &mut out).await {
                    warn!(error = %err, "turn failed");
                }
            }
        }
    }
    out.finish().await?;
    Ok(())
}

async fn run_turns(
    conversation: &mut Conversation,
    text: &str,
    out: &mut Output,
) -> anyhow::Result<()> {
    let reports = conversation.send_with_continuations(text, out).await?;
    if let Some(last) = reports.last()
        && last.decision == Decision::Exhausted
    {
        warn!(turns = reports.len(), "reply still looks truncated after the continuation limit");
    }
    Ok(())
}
