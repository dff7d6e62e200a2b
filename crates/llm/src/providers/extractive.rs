//! Deterministic offline generator.
//!
//! Reads the numbered evidence blocks of a grounded prompt and answers by
//! quoting the leading sentence of each block with its citation marker.
//! Evidence blocks look like:
//!
//! ```text
//! [2] documents q3-risk-memo chunk:0
//! BioMed Research was flagged for elevated counterparty risk.
//! ```

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
use compass_core::AppResult;
use regex::Regex;
use std::sync::LazyLock;

/// Default number of characters quoted per evidence block.
const DEFAULT_SNIPPET_CHARS: usize = 220;

/// Evidence blocks quoted in one answer.
const MAX_QUOTED_BLOCKS: usize = 6;

/// Phrase emitted when the prompt carries no evidence blocks.
pub const NO_EVIDENCE_REPLY: &str = "I could not find this information in the available sources.";

/// `[n] label` header followed by one content line.
static EVIDENCE_BLOCK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?m)^\[(\d+)\][^\n]*\n([^\n\[][^\n]*)$").ok());

/// Extractive client: no network, no sampling, same prompt → same answer.
#[derive(Debug, Clone)]
pub struct ExtractiveClient {
    snippet_chars: usize,
}

impl ExtractiveClient {
    pub fn new() -> Self {
        Self::with_snippet_chars(DEFAULT_SNIPPET_CHARS)
    }

    pub fn with_snippet_chars(snippet_chars: usize) -> Self {
        Self {
            snippet_chars: snippet_chars.max(16),
        }
    }

    fn compose(&self, prompt: &str) -> String {
        let Some(re) = EVIDENCE_BLOCK.as_ref() else {
            return NO_EVIDENCE_REPLY.to_string();
        };
        let lines: Vec<String> = re
            .captures_iter(prompt)
            .take(MAX_QUOTED_BLOCKS)
            .map(|caps| {
                let marker = &caps[1];
                let sentence = leading_sentence(caps[2].trim(), self.snippet_chars);
                format!("- {} [{}]", sentence, marker)
            })
            .collect();

        if lines.is_empty() {
            return NO_EVIDENCE_REPLY.to_string();
        }

        format!(
            "Here is what the available sources show:\n{}",
            lines.join("\n")
        )
    }
}

impl Default for ExtractiveClient {
    fn default() -> Self {
        Self::new()
    }
}

/// First sentence of `text`, cut at a word boundary when longer than `max_chars`.
fn leading_sentence(text: &str, max_chars: usize) -> String {
    let sentence = match text.find(". ") {
        Some(end) => &text[..=end],
        None => text,
    };

    if sentence.chars().count() <= max_chars {
        return sentence.trim_end_matches('.').to_string();
    }

    let cut: String = sentence.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(space) => format!("{}...", &cut[..space]),
        None => format!("{}...", cut),
    }
}

#[async_trait::async_trait]
impl LlmClient for ExtractiveClient {
    fn provider_name(&self) -> &str {
        "extractive"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        let content = self.compose(&request.prompt);
        let prompt_words = request.prompt.split_whitespace().count() as u32;
        let completion_words = content.split_whitespace().count() as u32;

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            usage: LlmUsage::new(prompt_words, completion_words),
            done: true,
        })
    }
}
