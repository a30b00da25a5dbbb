//! Context file selection: which project files go into the prompt

use crate::chat::normalizer::LOCKFILE_NAMES;
use crate::chat::{ChatMessage, FileMap};
use crate::llm::{
    CumulativeUsage, GenerationConfig, Message, MessageRole, PromptContext, PromptTemplates,
    ResolvedModel,
};
use crate::utils::errors::KaiError;
use crate::utils::path::{file_name, relative_to_root};
use crate::Result;
use async_trait::async_trait;
use glob::Pattern;
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, info, warn};

/// Selected files, absolute path -> content, in selection order
pub type ContextFileSet = IndexMap<String, String>;

/// Paths never offered to the model
pub const IGNORE_PATTERNS: [&str; 12] = [
    "node_modules/**",
    "**/node_modules/**",
    ".git/**",
    "dist/**",
    "build/**",
    ".next/**",
    "coverage/**",
    ".cache/**",
    ".vscode/**",
    ".idea/**",
    "**/*.log",
    "**/.DS_Store",
];

lazy_static! {
    static ref UPDATE_BLOCK: Regex =
        Regex::new(r"(?s)<updateContextBuffer>(.*?)</updateContextBuffer>").unwrap();
    static ref INCLUDE_FILE: Regex = Regex::new(r#"<includeFile\s+path="([^"]*)"\s*/?>"#).unwrap();
    static ref EXCLUDE_FILE: Regex = Regex::new(r#"<excludeFile\s+path="([^"]*)"\s*/?>"#).unwrap();
}

/// Picks the subset of project files relevant to the current turn
#[async_trait]
pub trait ContextSelector: Send + Sync {
    async fn select(
        &self,
        messages: &[ChatMessage],
        files: &FileMap,
        summary: &str,
        usage: &mut CumulativeUsage,
    ) -> Result<ContextFileSet>;
}

/// Glob-based filter for files that are never useful context
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    pub fn new(patterns: &[&str]) -> Self {
        let patterns = patterns
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid glob pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// Whether a project-relative path is ignored
    pub fn is_ignored(&self, relative_path: &str) -> bool {
        LOCKFILE_NAMES.contains(&file_name(relative_path))
            || self.patterns.iter().any(|p| p.matches(relative_path))
    }
}

impl Default for IgnoreRules {
    fn default() -> Self {
        Self::new(&IGNORE_PATTERNS)
    }
}

/// Readable, non-ignored files as `(absolute path, relative path, content)`
fn candidate_files<'a>(
    files: &'a FileMap,
    project_root: &str,
    ignore: &IgnoreRules,
) -> Vec<(&'a str, String, &'a str)> {
    files
        .iter()
        .filter_map(|(path, entry)| {
            let content = entry.as_ref()?.text_content()?;
            let relative = relative_to_root(path, project_root);
            if ignore.is_ignored(&relative) {
                return None;
            }
            Some((path.as_str(), relative, content))
        })
        .collect()
}

/// Relative paths listed by the most recent `codeContext` annotation
pub fn latest_code_context(messages: &[ChatMessage]) -> Vec<String> {
    messages
        .iter()
        .rev()
        .find_map(|message| message.annotations_of_type("codeContext").last())
        .and_then(|annotation| annotation.get("files")?.as_array().cloned())
        .map(|files| {
            files
                .iter()
                .filter_map(|f| f.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

/// Selector that includes every readable, non-ignored file
pub struct FixedContextSelector {
    project_root: String,
    ignore: IgnoreRules,
}

impl FixedContextSelector {
    pub fn new<S: Into<String>>(project_root: S) -> Self {
        Self {
            project_root: project_root.into(),
            ignore: IgnoreRules::default(),
        }
    }
}

#[async_trait]
impl ContextSelector for FixedContextSelector {
    async fn select(
        &self,
        _messages: &[ChatMessage],
        files: &FileMap,
        _summary: &str,
        _usage: &mut CumulativeUsage,
    ) -> Result<ContextFileSet> {
        Ok(candidate_files(files, &self.project_root, &self.ignore)
            .into_iter()
            .map(|(path, _, content)| (path.to_string(), content.to_string()))
            .collect())
    }
}

/// Requested changes to the context buffer
#[derive(Debug, Default, PartialEq)]
pub struct ContextBufferUpdate {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

impl ContextBufferUpdate {
    /// Parse an `<updateContextBuffer>` block out of a model response
    pub fn parse(response: &str) -> Option<Self> {
        let block = UPDATE_BLOCK.captures(response)?;
        let body = block.get(1).map(|m| m.as_str()).unwrap_or_default();

        let collect = |re: &Regex| -> Vec<String> {
            re.captures_iter(body)
                .map(|c| c[1].trim().to_string())
                .filter(|p| !p.is_empty())
                .collect()
        };

        Some(Self {
            include: collect(&INCLUDE_FILE),
            exclude: collect(&EXCLUDE_FILE),
        })
    }
}

/// Selector that asks the model which files to add to or drop from the buffer
pub struct LlmContextSelector {
    model: ResolvedModel,
    project_root: String,
    max_files: usize,
    ignore: IgnoreRules,
}

impl LlmContextSelector {
    pub fn new<S: Into<String>>(model: ResolvedModel, project_root: S, max_files: usize) -> Self {
        Self {
            model,
            project_root: project_root.into(),
            max_files,
            ignore: IgnoreRules::default(),
        }
    }

    fn apply_update(
        &self,
        current: Vec<String>,
        update: &ContextBufferUpdate,
        candidates: &IndexMap<String, (&str, &str)>,
    ) -> Vec<String> {
        let mut selected: Vec<String> = current
            .into_iter()
            .filter(|path| !update.exclude.contains(path))
            .collect();

        let mut added = 0;
        for path in &update.include {
            let relative = relative_to_root(path, &self.project_root);
            if !candidates.contains_key(&relative) {
                warn!("Model selected unknown file '{}', skipping", path);
                continue;
            }
            if selected.contains(&relative) {
                continue;
            }
            if added == self.max_files {
                warn!(
                    "Model selected more than {} new files, dropping '{}'",
                    self.max_files, relative
                );
                continue;
            }
            selected.push(relative);
            added += 1;
        }

        selected
    }
}

#[async_trait]
impl ContextSelector for LlmContextSelector {
    async fn select(
        &self,
        messages: &[ChatMessage],
        files: &FileMap,
        summary: &str,
        usage: &mut CumulativeUsage,
    ) -> Result<ContextFileSet> {
        // relative path -> (absolute path, content)
        let candidates: IndexMap<String, (&str, &str)> =
            candidate_files(files, &self.project_root, &self.ignore)
                .into_iter()
                .map(|(absolute, relative, content)| (relative, (absolute, content)))
                .collect();

        let current: Vec<String> = latest_code_context(messages)
            .into_iter()
            .map(|path| relative_to_root(&path, &self.project_root))
            .filter(|path| candidates.contains_key(path))
            .collect();

        let user_request = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.text())
            .unwrap_or_default();

        let context = PromptContext::new()
            .with_variable("max_files", self.max_files.to_string())
            .with_variable(
                "candidates",
                candidates.keys().cloned().collect::<Vec<_>>().join("\n"),
            )
            .with_variable("current_context", current.join("\n"))
            .with_variable("summary", summary)
            .with_variable("user_request", user_request);

        let (system, user) = PromptTemplates::context_selection()
            .fill(&context)
            .map_err(KaiError::context)?;

        let response = self
            .model
            .provider
            .generate(
                &[Message::user(user)],
                Some(&system),
                self.model.model_id(),
                Some(&GenerationConfig::with_max_tokens(1000)),
            )
            .await?;
        usage.record_opt(response.usage.as_ref());

        let selected = match ContextBufferUpdate::parse(response.text()) {
            Some(update) => {
                debug!(
                    "Context update: include {:?}, exclude {:?}",
                    update.include, update.exclude
                );
                let update = ContextBufferUpdate {
                    include: update.include,
                    exclude: update
                        .exclude
                        .iter()
                        .map(|p| relative_to_root(p, &self.project_root))
                        .collect(),
                };
                self.apply_update(current, &update, &candidates)
            }
            None => {
                warn!("Context selection response had no <updateContextBuffer>, keeping current context");
                current
            }
        };

        info!("Selected {} context file(s)", selected.len());

        Ok(selected
            .into_iter()
            .filter_map(|relative| {
                candidates.get(&relative).map(|(absolute, content)| {
                    (absolute.to_string(), content.to_string())
                })
            })
            .collect())
    }
}
