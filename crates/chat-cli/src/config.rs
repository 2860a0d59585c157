use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use chat_continuation::prelude::*;
use chat_continuation::TurnOptions;
use chat_continuation::vendors::openai_compat::OpenAiCompatConfig;

use crate::cli::Cli;

/// Loads `.env` from the crate directory, then from the working directory.
pub fn init() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

/// Everything needed to open a conversation.
pub struct Settings {
    pub backend: OpenAiCompatConfig,
    pub conversation: ConversationConfig,
}

impl Settings {
    /// Environment first, command-line flags on top.
    pub fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let mut backend = OpenAiCompatConfig::from_env()?;
        if let Some(base_url) = &cli.base_url {
            backend = backend.base_url(base_url.clone());
        }

        let mut continuation = ContinuationConfig::from_env()?;
        if let Some(max) = cli.max_auto_continues {
            continuation = continuation.max_auto_continues(max);
        }
        if let Some(delay) = cli.continue_delay_ms {
            continuation = continuation.settle_delay(Duration::from_millis(delay));
        }

        let mut conversation = ConversationConfig::new(ModelRef::new("openai-compat", cli.model.clone()))
            .continuation(continuation)
            .turn_options(TurnOptions {
                max_output_tokens: cli.max_output_tokens,
                timeout: None,
            });
        if let Some(prompt) = &cli.system_prompt {
            conversation = conversation.system_prompt(prompt.clone());
        }
        Ok(Self {
            backend,
            conversation,
        })
    }
}

/// Reads a text file into a file context keyed by its path.
pub async fn load_file(path: &Path) -> anyhow::Result<FileContext> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    Ok(FileContext {
        id: path.display().to_string(),
        filename,
        extension,
        size: text.len() as u64,
        text,
        error: None,
    })
}
