//! System prompt assembly and per-conversation file context.
use std::collections::HashMap;

use crate::config::DEFAULT_CONTINUATION_MARKER;

/// Longest file text, in characters, embedded into the system prompt.
pub const MAX_FILE_CONTEXT_CHARS: usize = 30_000;

const FILES_HEADER: &str = "The user uploaded the following files:";

/// Extracted text of one uploaded file.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileContext {
    pub id: String,
    pub filename: String,
    pub extension: String,
    /// Extracted text; empty when only metadata survived.
    #[serde(default)]
    pub text: String,
    /// Extraction failure, if any.
    #[serde(default)]
    pub error: Option<String>,
    pub size: u64,
}

impl FileContext {
    /// Whether the file contributes text to a prompt.
    pub fn is_usable(&self) -> bool {
        self.error.is_none() && !self.text.is_empty()
    }
}

/// Default system prompt. It asks the model to end with the continuation
/// marker when it runs out of room.
pub fn default_system_prompt() -> String {
    system_prompt_with_marker(DEFAULT_CONTINUATION_MARKER)
}

pub fn system_prompt_with_marker(marker: &str) -> String {
    format!(
        "You are a helpful assistant that analyses documents and answers questions. \
         Reply in the language of the question.\n\n\
         IMPORTANT: your replies have a length limit. Keep comparison tables compact and \
         abbreviate where needed. If a table is too long, split it and finish the first part \
         first. When part of the answer is still missing, end with \"{marker}\" so the rest \
         can be requested.\n\n\
         MATH: always write formulas as LaTeX with $...$ for inline math and $$...$$ for \
         display math."
    )
}

/// Appends usable file contexts to `base`.
///
/// Files with an extraction error or no text are skipped; each text is cut to
/// `MAX_FILE_CONTEXT_CHARS`.
pub fn compose_system_prompt(base: &str, files: &[FileContext]) -> String {
    let sections: Vec<String> = files
        .iter()
        .filter(|file| file.is_usable())
        .map(|file| {
            format!(
                "=== File: {} ===\n{}\n=== End File ===",
                file.filename,
                truncate_chars(&file.text, MAX_FILE_CONTEXT_CHARS)
            )
        })
        .collect();

    if sections.is_empty() {
        return base.to_string();
    }
    format!("{base}\n\n{FILES_HEADER}\n\n{}", sections.join("\n\n"))
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Settings and file context owned by one conversation and threaded
/// explicitly into every turn request.
#[derive(Clone, Debug)]
pub struct ConversationContext {
    pub base_prompt: String,
    session_files: Vec<FileContext>,
    pending_files: Vec<FileContext>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(default_system_prompt())
    }
}

impl ConversationContext {
    pub fn new(base_prompt: impl Into<String>) -> Self {
        Self {
            base_prompt: base_prompt.into(),
            session_files: Vec::new(),
            pending_files: Vec::new(),
        }
    }

    /// Stages files for the next turn.
    pub fn attach_files(&mut self, files: impl IntoIterator<Item = FileContext>) {
        self.pending_files.extend(files);
    }

    /// Files remembered across turns.
    pub fn session_files(&self) -> &[FileContext] {
        &self.session_files
    }

    pub fn pending_files(&self) -> &[FileContext] {
        &self.pending_files
    }

    /// Merges staged files into the session set and returns the usable files
    /// for the next request. Later files replace earlier ones with the same id.
    pub fn take_request_files(&mut self) -> Vec<FileContext> {
        let pending = std::mem::take(&mut self.pending_files);
        self.session_files = merge_by_id(self.session_files.drain(..).chain(pending));
        self.session_files
            .iter()
            .filter(|file| file.is_usable())
            .cloned()
            .collect()
    }

    /// Builds the system prompt for the next request, consuming staged files.
    pub fn next_system_prompt(&mut self) -> String {
        let files = self.take_request_files();
        compose_system_prompt(&self.base_prompt, &files)
    }
}

fn merge_by_id(files: impl Iterator<Item = FileContext>) -> Vec<FileContext> {
    let mut order: Vec<String> = Vec::new();
    let mut by_id: HashMap<String, FileContext> = HashMap::new();
    for file in files {
        if !by_id.contains_key(&file.id) {
            order.push(file.id.clone());
        }
        by_id.insert(file.id.clone(), file);
    }
    order
        .into_iter()
        .filter_map(|id| by_id.remove(&id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(id: &str, name: &str, text: &str) -> FileContext {
        FileContext {
            id: id.into(),
            filename: name.into(),
            extension: "txt".into(),
            text: text.into(),
            error: None,
            size: text.len() as u64,
        }
    }

    #[test]
    fn prompt_without_files_is_the_base_prompt() {
        assert_eq!(compose_system_prompt("base", &[]), "base");
    }

    #[test]
    fn unusable_files_are_skipped() {
        let mut broken = file("2", "scan.pdf", "");
        broken.error = Some("extraction failed".into());
        let prompt = compose_system_prompt(
            "base",
            &[file("1", "notes.txt", "hello"), broken, file("3", "empty.txt", "")],
        );
        assert_eq!(
            prompt,
            "base\n\nThe user uploaded the following files:\n\n\
             === File: notes.txt ===\nhello\n=== End File ==="
        );
    }

    #[test]
    fn file_text_is_cut_to_limit() {
        let long = "é".repeat(MAX_FILE_CONTEXT_CHARS + 10);
        let prompt = compose_system_prompt("b", &[file("1", "big.txt", &long)]);
        let embedded = prompt
            .split("=== File: big.txt ===\n")
            .nth(1)
            .and_then(|rest| rest.split("\n=== End File ===").next())
            .expect("section");
        assert_eq!(embedded.chars().count(), MAX_FILE_CONTEXT_CHARS);
    }

    #[test]
    fn request_files_merge_session_and_pending_by_id() {
        let mut ctx = ConversationContext::new("base");
        ctx.attach_files([file("a", "a.txt", "v1"), file("b", "b.txt", "b")]);
        let first = ctx.take_request_files();
        assert_eq!(first.len(), 2);
        assert!(ctx.pending_files().is_empty());

        ctx.attach_files([file("a", "a.txt", "v2")]);
        let second = ctx.take_request_files();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].text, "v2");
        assert_eq!(ctx.session_files().len(), 2);

        let third = ctx.take_request_files();
        assert_eq!(third, second);
    }

    #[test]
    fn metadata_only_session_files_are_not_sent() {
        let mut ctx = ConversationContext::new("base");
        ctx.attach_files([file("a", "restored.pdf", "")]);
        assert!(ctx.take_request_files().is_empty());
        assert_eq!(ctx.session_files().len(), 1);
        assert_eq!(ctx.next_system_prompt(), "base");
    }

    #[test]
    fn default_prompt_mentions_marker() {
        assert!(default_system_prompt().contains("\"[LANJUT]\""));
    }

    #[test]
    fn file_context_reads_camel_case_wire_format() {
        let parsed: FileContext = serde_json::from_value(serde_json::json!({
            "id": "f1",
            "filename": "a.csv",
            "extension": "csv",
            "text": "x,y",
            "error": null,
            "size": 3
        }))
        .expect("parse");
        assert!(parsed.is_usable());
    }
}
