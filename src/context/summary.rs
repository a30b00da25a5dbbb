//! Rolling conversation summaries with a hash-checked, TTL-bound cache

use crate::chat::ChatMessage;
use crate::llm::{
    CumulativeUsage, GenerationConfig, Message, PromptContext, PromptTemplate, PromptTemplates,
    ResolvedModel,
};
use crate::utils::errors::KaiError;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, RwLock};
use tracing::{debug, info};

/// Fingerprint of an ordered message list over its `(role, content)` pairs
///
/// Each field is length-prefixed, so moving text between messages or fields
/// changes the hash.
pub fn conversation_hash(messages: &[ChatMessage]) -> String {
    let mut hasher = Sha256::new();
    for message in messages {
        let role = message.role.as_str().as_bytes();
        let content = serde_json::to_string(&message.content).unwrap_or_default();

        hasher.update((role.len() as u64).to_le_bytes());
        hasher.update(role);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(content.as_bytes());
    }

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// A cached summary
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub summary_text: String,
    pub created_at: DateTime<Utc>,
    pub source_hash: String,
    /// Id of the last message the summary covers
    pub chat_id: Option<String>,
}

impl CacheEntry {
    /// Whether the entry is younger than `ttl` at `now`
    pub fn is_fresh(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match now.signed_duration_since(self.created_at).to_std() {
            Ok(age) => age < ttl,
            // Entry from the future (clock skew): treat as fresh
            Err(_) => true,
        }
    }
}

/// Storage for summaries, shared by all requests
#[async_trait]
pub trait SummaryCache: Send + Sync {
    /// Fresh entry for `key`, if any
    async fn get(&self, key: &str) -> Option<CacheEntry>;

    /// Store or overwrite the entry for `key`
    async fn set(&self, key: &str, entry: CacheEntry);

    /// Drop the entry for `key`
    async fn invalidate(&self, key: &str);

    /// Drop every expired entry, returning how many were removed
    async fn evict_expired(&self) -> usize;

    /// Serialize regenerations of one history under `key`; hold the guard across get → generate → set
    ///
    /// Different histories sharing a key do not wait on each other.
    async fn lock_key(&self, key: &str, source_hash: &str) -> OwnedMutexGuard<()>;
}

/// In-process summary cache with TTL expiry and per-key single-flight
pub struct MemorySummaryCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MemorySummaryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn key_lock(&self, key: &str, source_hash: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(format!("{}:{}", key, source_hash))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl SummaryCache for MemorySummaryCache {
    async fn get(&self, key: &str) -> Option<CacheEntry> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_fresh(self.ttl, Utc::now()))
            .cloned()
    }

    async fn set(&self, key: &str, entry: CacheEntry) {
        self.entries.write().await.insert(key.to_string(), entry);
    }

    async fn invalidate(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    async fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(self.ttl, now));
        let removed = before - entries.len();

        // Locks nobody is holding or waiting on can go as well
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);

        removed
    }

    async fn lock_key(&self, key: &str, source_hash: &str) -> OwnedMutexGuard<()> {
        self.key_lock(key, source_hash).lock_owned().await
    }
}

/// Result of summarizing a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub summary: String,
    /// Id of the last summarized message
    pub chat_id: Option<String>,
    /// Served from the cache without backend calls
    pub cached: bool,
}

/// Most recent `chatSummary` annotation as `(summary, chatId)`
pub fn latest_chat_summary(messages: &[ChatMessage]) -> Option<(String, String)> {
    messages.iter().rev().find_map(|message| {
        message
            .annotations_of_type("chatSummary")
            .last()
            .and_then(|annotation| {
                let summary = annotation.get("summary")?.as_str()?;
                let chat_id = annotation.get("chatId")?.as_str()?;
                Some((summary.to_string(), chat_id.to_string()))
            })
    })
}

/// Summarizes history in fixed-size batches and merges the partial results
pub struct BatchSummarizer {
    cache: Arc<dyn SummaryCache>,
    model: ResolvedModel,
    batch_size: usize,
    max_tokens: u32,
}

impl BatchSummarizer {
    pub fn new(cache: Arc<dyn SummaryCache>, model: ResolvedModel, batch_size: usize) -> Self {
        Self {
            cache,
            model,
            batch_size: batch_size.max(1),
            max_tokens: 8000,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Summary of `messages`, served from the cache when the history is unchanged
    pub async fn summarize(
        &self,
        messages: &[ChatMessage],
        cache_key: &str,
        usage: &mut CumulativeUsage,
    ) -> Result<SummaryOutcome> {
        let source_hash = conversation_hash(messages);
        let chat_id = messages.last().map(|m| m.id.clone());

        let _guard = self.cache.lock_key(cache_key, &source_hash).await;

        if let Some(entry) = self.cache.get(cache_key).await {
            if entry.source_hash == source_hash {
                debug!("Summary cache hit for key '{}'", cache_key);
                return Ok(SummaryOutcome {
                    summary: entry.summary_text,
                    chat_id: entry.chat_id,
                    cached: true,
                });
            }
        }

        let (seed, remaining) = match latest_chat_summary(messages) {
            Some((summary, cutoff_id)) => {
                let start = messages
                    .iter()
                    .position(|m| m.id == cutoff_id)
                    .map(|index| index + 1)
                    .unwrap_or(0);
                (Some(summary), &messages[start..])
            }
            None => (None, messages),
        };

        let summary_text = self.generate_summary(seed.as_deref(), remaining, usage).await?;

        self.cache
            .set(
                cache_key,
                CacheEntry {
                    summary_text: summary_text.clone(),
                    created_at: Utc::now(),
                    source_hash,
                    chat_id: chat_id.clone(),
                },
            )
            .await;

        Ok(SummaryOutcome {
            summary: summary_text,
            chat_id,
            cached: false,
        })
    }

    async fn generate_summary(
        &self,
        seed: Option<&str>,
        messages: &[ChatMessage],
        usage: &mut CumulativeUsage,
    ) -> Result<String> {
        if messages.is_empty() {
            return Ok(seed.unwrap_or_default().to_string());
        }

        let batches: Vec<&[ChatMessage]> = messages.chunks(self.batch_size).collect();
        info!(
            "Summarizing {} messages in {} batch(es) with {}",
            messages.len(),
            batches.len(),
            self.model.model_id()
        );

        let batch_template = PromptTemplates::summary_batch();
        let mut partials = Vec::with_capacity(batches.len());
        for batch in &batches {
            let context = PromptContext::new()
                .with_variable("seed", seed.unwrap_or("(none)"))
                .with_variable("transcript", transcript(batch));
            partials.push(self.call(&batch_template, &context, usage).await?);
        }

        if partials.len() == 1 {
            return Ok(partials.remove(0));
        }

        let summaries = partials
            .iter()
            .enumerate()
            .map(|(i, partial)| format!("<summary part=\"{}\">\n{}\n</summary>", i + 1, partial))
            .collect::<Vec<_>>()
            .join("\n\n");
        let context = PromptContext::new().with_variable("summaries", summaries);
        self.call(&PromptTemplates::summary_merge(), &context, usage)
            .await
    }

    async fn call(
        &self,
        template: &PromptTemplate,
        context: &PromptContext,
        usage: &mut CumulativeUsage,
    ) -> Result<String> {
        let (system, user) = template.fill(context).map_err(KaiError::summary)?;
        let config = GenerationConfig::with_max_tokens(self.max_tokens);

        let response = self
            .model
            .provider
            .generate(
                &[Message::user(user)],
                Some(&system),
                self.model.model_id(),
                Some(&config),
            )
            .await?;

        usage.record_opt(response.usage.as_ref());
        Ok(response.text().to_string())
    }
}

/// Plain-text rendering of messages for the summary prompt
fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|message| format!("[{}]: {}", message.role.as_str(), message.content.text()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
