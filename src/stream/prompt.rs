//! System prompt assembly and message trimming for the response phase

use crate::chat::{ChatMessage, ChatMode, DesignScheme, FileMap, SelectedAgent, SupabaseState};
use crate::context::ContextFileSet;
use crate::llm::prompts::{build_system_prompt, discuss_system_prompt};
use crate::utils::path::relative_to_root;
use std::fmt::Write;

/// Inputs of the response-phase system prompt
#[derive(Debug, Clone, Copy)]
pub struct SystemPromptBuilder<'a> {
    project_root: &'a str,
    chat_mode: ChatMode,
    context_optimization: bool,
    context_files: Option<&'a ContextFileSet>,
    summary: Option<&'a str>,
    files: Option<&'a FileMap>,
    agent: Option<&'a SelectedAgent>,
    design_scheme: Option<&'a DesignScheme>,
    supabase: Option<&'a SupabaseState>,
}

impl<'a> SystemPromptBuilder<'a> {
    pub fn new(project_root: &'a str, chat_mode: ChatMode, context_optimization: bool) -> Self {
        Self {
            project_root,
            chat_mode,
            context_optimization,
            context_files: None,
            summary: None,
            files: None,
            agent: None,
            design_scheme: None,
            supabase: None,
        }
    }

    pub fn context_files(mut self, files: &'a ContextFileSet) -> Self {
        self.context_files = Some(files);
        self
    }

    pub fn summary(mut self, summary: &'a str) -> Self {
        if !summary.trim().is_empty() {
            self.summary = Some(summary);
        }
        self
    }

    /// Full file map, used to list locked files
    pub fn files(mut self, files: &'a FileMap) -> Self {
        self.files = Some(files);
        self
    }

    pub fn agent(mut self, agent: Option<&'a SelectedAgent>) -> Self {
        self.agent = agent;
        self
    }

    pub fn design_scheme(mut self, scheme: Option<&'a DesignScheme>) -> Self {
        self.design_scheme = scheme;
        self
    }

    pub fn supabase(mut self, supabase: Option<&'a SupabaseState>) -> Self {
        self.supabase = supabase;
        self
    }

    fn augments_build(&self) -> bool {
        self.chat_mode == ChatMode::Build && self.context_optimization
    }

    pub fn build(&self) -> String {
        let mut prompt = match self.chat_mode {
            ChatMode::Build => build_system_prompt(self.project_root),
            ChatMode::Discuss => discuss_system_prompt(self.project_root),
        };

        if self.augments_build() {
            if let Some(files) = self.context_files.filter(|f| !f.is_empty()) {
                let _ = write!(
                    prompt,
                    "\n\nBelow is the artifact containing the context loaded into the context buffer. \
                     You have knowledge of these files and may need to change them to fulfill the current request.\n\
                     CONTEXT BUFFER:\n---\n{}\n---",
                    self.code_context(files)
                );
            }
            if let Some(summary) = self.summary {
                let _ = write!(
                    prompt,
                    "\n\nBelow is the chat history so far.\nCHAT SUMMARY:\n---\n{}\n---",
                    summary
                );
            }
        }

        if self.chat_mode == ChatMode::Build {
            let locked = self.locked_files();
            if !locked.is_empty() {
                prompt.push_str(
                    "\n\nIMPORTANT: The following files are locked and MUST NOT be modified. \
                     Do not include them in any file action:",
                );
                for path in locked {
                    let _ = write!(prompt, "\n- {}", path);
                }
            }
        }

        if let Some(scheme) = self.design_scheme {
            prompt.push_str(&design_section(scheme));
        }
        if let Some(supabase) = self.supabase {
            prompt.push_str(&supabase_section(supabase));
        }
        if let Some(agent) = self.agent {
            let _ = write!(prompt, "\n\n## Active Agent: {}\n{}", agent.name, agent.instructions.trim());
        }

        prompt
    }

    fn code_context(&self, files: &ContextFileSet) -> String {
        let mut artifact = String::from("<kaiArtifact id=\"code-content\" title=\"Code Content\">\n");
        for (path, content) in files {
            let _ = writeln!(
                artifact,
                "<kaiAction type=\"file\" filePath=\"{}\">\n{}\n</kaiAction>",
                relative_to_root(path, self.project_root),
                content
            );
        }
        artifact.push_str("</kaiArtifact>");
        artifact
    }

    fn locked_files(&self) -> Vec<String> {
        self.files
            .map(|files| {
                files
                    .iter()
                    .filter(|(_, entry)| entry.as_ref().is_some_and(|e| e.is_locked()))
                    .map(|(path, _)| relative_to_root(path, self.project_root))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn design_section(scheme: &DesignScheme) -> String {
    let mut section = String::from("\n\n<design_scheme>");
    if !scheme.palette.is_empty() {
        section.push_str("\n  Palette:");
        for (role, color) in &scheme.palette {
            let _ = write!(section, "\n    {}: {}", role, color);
        }
    }
    if !scheme.font.is_empty() {
        let _ = write!(section, "\n  Fonts: {}", scheme.font.join(", "));
    }
    if !scheme.features.is_empty() {
        let _ = write!(section, "\n  Features: {}", scheme.features.join(", "));
    }
    section.push_str("\n  Use this design scheme for every UI you create.\n</design_scheme>");
    section
}

fn supabase_section(supabase: &SupabaseState) -> String {
    let status = if !supabase.is_connected {
        "The user has not connected Supabase. Remind them to connect it before creating database operations."
    } else if !supabase.has_selected_project {
        "Supabase is connected but no project is selected. Remind the user to select a project."
    } else {
        "Supabase is connected and a project is selected."
    };

    let mut section = format!("\n\n<supabase_state>\n  {}", status);
    if supabase.is_connected && supabase.has_selected_project {
        if let Some(credentials) = &supabase.credentials {
            if let Some(url) = &credentials.supabase_url {
                let _ = write!(section, "\n  VITE_SUPABASE_URL={}", url);
            }
            if let Some(key) = &credentials.anon_key {
                let _ = write!(section, "\n  VITE_SUPABASE_ANON_KEY={}", key);
            }
        }
    }
    section.push_str("\n</supabase_state>");
    section
}

/// Messages sent to the backend once a summary replaces the older history
///
/// Keeps the messages after `chat_id`; without a usable cutoff only the most
/// recent message survives.
pub fn trim_to_summary(messages: &[ChatMessage], chat_id: Option<&str>) -> Vec<ChatMessage> {
    let after_cutoff = chat_id
        .and_then(|id| messages.iter().position(|m| m.id == id))
        .map(|index| &messages[index + 1..])
        .filter(|rest| !rest.is_empty());

    match after_cutoff {
        Some(rest) => rest.to_vec(),
        None => messages.last().cloned().into_iter().collect(),
    }
}
