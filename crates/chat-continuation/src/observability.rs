use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_LOG_FILE: &str = "chat.logs.jsonl";

/// Logging settings resolved from the environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    /// Filter directive from `CHAT_LOG_LEVEL`; `RUST_LOG` applies when unset.
    pub level: Option<String>,
    /// JSONL output file; console output on stderr when unset.
    pub json_log_path: Option<PathBuf>,
}

impl ObservabilitySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            enabled: lookup("CHAT_OBSERVABILITY_ENABLED")
                .map(|v| parse_bool(&v).unwrap_or(true))
                .unwrap_or(true),
            level: lookup("CHAT_LOG_LEVEL").filter(|v| !v.trim().is_empty()),
            json_log_path: lookup("CHAT_JSON_LOG_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }

    fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        if let Some(level) = &self.level
            && let Ok(filter) = tracing_subscriber::EnvFilter::try_new(level)
        {
            return filter;
        }
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Installs the global subscriber once per process.
///
/// Environment variables:
/// - `CHAT_OBSERVABILITY_ENABLED`: enable/disable flag (default enabled).
/// - `CHAT_LOG_LEVEL`: level or filter directive (`info`, `chat_continuation=debug`).
/// - `CHAT_JSON_LOG_PATH`: write JSONL to this file instead of the console.
/// - `RUST_LOG`: fallback filter.
pub fn init_observability() {
    INIT.get_or_init(|| install(&ObservabilitySettings::from_env()));
}

fn install(settings: &ObservabilitySettings) {
    if !settings.enabled {
        return;
    }
    let env_filter = settings.env_filter();

    match &settings.json_log_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                let _ = std::fs::create_dir_all(parent);
            }
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(DEFAULT_LOG_FILE);
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_target(false)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
        }
        None => {
            // stdout carries the streamed reply.
            let console_layer = tracing_subscriber::fmt::layer()
                .compact()
                .with_target(false)
                .with_writer(std::io::stderr);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_enabled_console_output() {
        let settings = ObservabilitySettings::from_lookup(|_| None);
        assert!(settings.enabled);
        assert_eq!(settings.level, None);
        assert_eq!(settings.json_log_path, None);
    }

    #[test]
    fn reads_flag_level_and_path() {
        let settings = ObservabilitySettings::from_lookup(|key| match key {
            "CHAT_OBSERVABILITY_ENABLED" => Some("off".into()),
            "CHAT_LOG_LEVEL" => Some("debug".into()),
            "CHAT_JSON_LOG_PATH" => Some("logs/chat.jsonl".into()),
            _ => None,
        });
        assert!(!settings.enabled);
        assert_eq!(settings.level.as_deref(), Some("debug"));
        assert_eq!(settings.json_log_path, Some(PathBuf::from("logs/chat.jsonl")));
    }

    #[test]
    fn unrecognized_flag_keeps_logging_on() {
        assert_eq!(parse_bool("maybe"), None);
        let settings = ObservabilitySettings::from_lookup(|key| {
            (key == "CHAT_OBSERVABILITY_ENABLED").then(|| "maybe".to_string())
        });
        assert!(settings.enabled);
    }
}
