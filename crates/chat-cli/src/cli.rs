use std::path::PathBuf;

use clap::Parser;

/// Chat with an OpenAI-compatible model; replies cut off by the output limit
/// are continued automatically.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat", version)]
pub struct Cli {
    /// Model name sent to the endpoint.
    #[arg(long, short = 'm', env = "CHAT_MODEL", default_value = "deepseek-chat")]
    pub model: String,

    /// Endpoint root; overrides `OPENAI_BASE_URL`.
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Output-length limit per turn, in tokens.
    #[arg(long, default_value_t = 8192)]
    pub max_output_tokens: u32,

    /// Overrides `CHAT_MAX_AUTO_CONTINUES`.
    #[arg(long)]
    pub max_auto_continues: Option<u32>,

    /// Overrides `CHAT_CONTINUE_DELAY_MS`.
    #[arg(long, value_name = "MS")]
    pub continue_delay_ms: Option<u64>,

    /// Text file(s) to include as context.
    #[arg(long = "file", short = 'f', value_name = "FILE", value_delimiter = ',', num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// System prompt replacing the built-in one.
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Print raw `data:` frames instead of text.
    #[arg(long, default_value_t = false)]
    pub sse: bool,

    /// Message to send. Reads one message per line from stdin when omitted.
    pub prompt: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_prompt() {
        let cli = Cli::try_parse_from([
            "chat",
            "--model",
            "gpt-4o-mini",
            "--max-auto-continues",
            "2",
            "--file",
            "a.txt,b.md",
            "--sse",
            "hello",
        ])
        .expect("parse");
        assert_eq!(cli.model, "gpt-4o-mini");
        assert_eq!(cli.max_auto_continues, Some(2));
        assert_eq!(cli.files, vec![PathBuf::from("a.txt"), PathBuf::from("b.md")]);
        assert!(cli.sse);
        assert_eq!(cli.prompt.as_deref(), Some("hello"));
        assert_eq!(cli.max_output_tokens, 8192);
    }
}
