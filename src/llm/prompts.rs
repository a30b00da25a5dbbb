//! Prompt templates for the relay's backend calls

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Instruction sent as a user message when a segment stopped at the length limit
pub const CONTINUE_PROMPT: &str = "Continue your prior response. IMPORTANT: Immediately begin from where you left off without any interruptions.\nDo not repeat any content, including artifact and action tags.";

/// Headings every summary must use, in order
pub const SUMMARY_HEADINGS: [&str; 6] = [
    "# Project Overview",
    "# Conversation Context",
    "# Implementation Status",
    "# Requirements",
    "# Critical Memory",
    "# Next Actions",
];

/// Template for backend interactions
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub system_message: String,
    pub user_template: String,
    pub variables: Vec<String>,
}

/// Context for filling prompt templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptContext {
    pub variables: HashMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.variables.insert(key.into(), value.into());
        self
    }
}

impl PromptTemplate {
    /// Fill the template, returning `(system, user)` messages
    pub fn fill(&self, context: &PromptContext) -> Result<(String, String), String> {
        for variable in &self.variables {
            if !context.variables.contains_key(variable) {
                return Err(format!("Missing required variable: {}", variable));
            }
        }

        let mut system_message = self.system_message.clone();
        let mut user_message = self.user_template.clone();

        for (key, value) in &context.variables {
            let placeholder = format!("{{{{{}}}}}", key);
            system_message = system_message.replace(&placeholder, value);
            user_message = user_message.replace(&placeholder, value);
        }

        Ok((system_message, user_message))
    }
}

/// Predefined templates
pub struct PromptTemplates;

impl PromptTemplates {
    /// Summarize one batch of conversation, continuing from a previous summary
    pub fn summary_batch() -> PromptTemplate {
        PromptTemplate {
            system_message: format!(
                r#"You are a software engineer working on a project. You keep a running summary of the conversation between you and the user so work can continue when the full history is no longer available.

Write the summary using exactly these sections, in this order:

{}

Under each heading write short bullet points. Keep file paths, names, versions and decisions verbatim. Drop small talk and anything already superseded. If a section has nothing to report, write "- none".

The previous summary (if any) is authoritative for everything before the new messages; fold the new messages into it rather than starting over."#,
                SUMMARY_HEADINGS.join("\n")
            ),
            user_template: "<previous_summary>\n{{seed}}\n</previous_summary>\n\n<new_messages>\n{{transcript}}\n</new_messages>\n\nWrite the updated summary now.".to_string(),
            variables: vec!["seed".to_string(), "transcript".to_string()],
        }
    }

    /// Merge several batch summaries into one
    pub fn summary_merge() -> PromptTemplate {
        PromptTemplate {
            system_message: format!(
                r#"You merge partial summaries of one long conversation into a single summary.

The partial summaries are in chronological order; later ones win when they disagree. Use exactly these sections, in this order:

{}

Remove duplicates and keep every file path, name and decision that is still current."#,
                SUMMARY_HEADINGS.join("\n")
            ),
            user_template: "{{summaries}}\n\nWrite the merged summary now.".to_string(),
            variables: vec!["summaries".to_string()],
        }
    }

    /// Pick the files relevant to the next response
    pub fn context_selection() -> PromptTemplate {
        PromptTemplate {
            system_message: r#"You are a software engineer deciding which project files another engineer needs to answer the user's latest request.

You will get the list of project files, the files already in the context buffer and a summary of the conversation.

Respond only with an update to the context buffer:

<updateContextBuffer>
  <includeFile path="path/relative/to/project"/>
  <excludeFile path="path/relative/to/project"/>
</updateContextBuffer>

Rules:
- Only use paths from the list of project files.
- Include at most {{max_files}} files that are not already in the buffer.
- Exclude buffered files that are no longer needed.
- If nothing changes, return an empty <updateContextBuffer></updateContextBuffer>."#
                .to_string(),
            user_template: "<project_files>\n{{candidates}}\n</project_files>\n\n<current_context_buffer>\n{{current_context}}\n</current_context_buffer>\n\n<chat_summary>\n{{summary}}\n</chat_summary>\n\n<user_request>\n{{user_request}}\n</user_request>".to_string(),
            variables: vec![
                "max_files".to_string(),
                "candidates".to_string(),
                "current_context".to_string(),
                "summary".to_string(),
                "user_request".to_string(),
            ],
        }
    }
}

/// Base system prompt for build mode, where the model writes artifacts
pub fn build_system_prompt(cwd: &str) -> String {
    format!(
        r#"You are KAI, an expert AI assistant and senior software developer pairing with the user on a project.

<system_constraints>
  - The project lives in {cwd}. All file paths you write are relative to it.
  - Do not modify files marked as locked.
</system_constraints>

<artifact_info>
  Create a single, comprehensive artifact per response containing every step needed: shell commands to run and files to create or update.

  - Wrap the artifact in <kaiArtifact id="kebab-case-id" title="Title">...</kaiArtifact>.
  - Each step is a <kaiAction type="shell">command</kaiAction> or <kaiAction type="file" filePath="relative/path">full file content</kaiAction>.
  - Always write complete file contents, never placeholders or diffs.
  - Order actions so dependencies come first.
</artifact_info>

Think step by step before writing the artifact. Be concise outside the artifact."#
    )
}

/// Base system prompt for discuss mode, where the model only advises
pub fn discuss_system_prompt(cwd: &str) -> String {
    format!(
        r#"You are KAI, an expert AI assistant and senior software developer. You are in discuss mode: help the user reason about their project in {cwd}, answer questions and propose plans.

Do not write artifacts or file actions. Reference files by their path relative to the project root and keep code snippets short."#
    )
}
