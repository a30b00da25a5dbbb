//! Token accounting helpers

use super::TokenUsage;
use serde::{Deserialize, Serialize};

/// Rough token estimates, used for logging prompt sizes
pub struct TokenCounter;

impl TokenCounter {
    /// Rough estimation of tokens in text using simple heuristics
    pub fn estimate_tokens(text: &str) -> u32 {
        if text.is_empty() {
            return 0;
        }

        // ~4 characters per token for English text, weighted by word count
        let char_count = text.chars().count() as f64;
        let word_count = text.split_whitespace().count() as f64;
        let estimated_tokens = (word_count * 1.3) + (char_count * 0.25);

        (estimated_tokens * 1.1).ceil() as u32
    }
}

/// Token usage summed over every backend call made for one request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CumulativeUsage {
    pub completion_tokens: u64,
    pub prompt_tokens: u64,
    pub total_tokens: u64,
}

impl CumulativeUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one call's usage
    pub fn record(&mut self, usage: &TokenUsage) {
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.total_tokens += u64::from(usage.total_tokens);
    }

    /// Add usage when the backend reported any
    pub fn record_opt(&mut self, usage: Option<&TokenUsage>) {
        if let Some(usage) = usage {
            self.record(usage);
        }
    }
}
