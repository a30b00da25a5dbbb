//! Context optimization: conversation summaries and context file selection

pub mod selector;
pub mod summary;

pub use selector::{
    latest_code_context, ContextBufferUpdate, ContextFileSet, ContextSelector,
    FixedContextSelector, IgnoreRules, LlmContextSelector,
};
pub use summary::{
    conversation_hash, latest_chat_summary, BatchSummarizer, CacheEntry, MemorySummaryCache,
    SummaryCache, SummaryOutcome,
};
