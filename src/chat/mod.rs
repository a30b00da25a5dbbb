//! Chat request data model

use crate::llm::{Message, MessageRole};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod normalizer;

pub use normalizer::{normalize, ModelDefaults, NormalizedConversation};

/// One message of the conversation as sent by the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Messages the UI sent without an id get a fresh one
    #[serde(default = "generate_message_id")]
    pub id: String,
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Opaque annotations attached to earlier responses
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Value>,
}

fn generate_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Plain text or a list of typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentPart {
    Text { text: String },
    Image { image: String },
    #[serde(other)]
    Unsupported,
}

impl MessageContent {
    /// Concatenated text of the message; non-text parts are skipped
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Rewrite every text part, leaving other parts untouched
    pub fn map_text<F>(&self, mut f: F) -> Self
    where
        F: FnMut(&str) -> String,
    {
        match self {
            Self::Text(text) => Self::Text(f(text)),
            Self::Parts(parts) => Self::Parts(
                parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text { text } => ContentPart::Text { text: f(text) },
                        other => other.clone(),
                    })
                    .collect(),
            ),
        }
    }

    /// Text of every text part, in order
    pub fn text_parts(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }
}

impl ChatMessage {
    pub fn new<I: Into<String>, S: Into<String>>(id: I, role: MessageRole, content: S) -> Self {
        Self {
            id: id.into(),
            role,
            content: MessageContent::Text(content.into()),
            created_at: None,
            annotations: Vec::new(),
        }
    }

    /// Annotations whose `type` field equals `kind`
    pub fn annotations_of_type<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.annotations
            .iter()
            .filter(move |a| a.get("type").and_then(|t| t.as_str()) == Some(kind))
    }

    /// Convert to a backend message (text only)
    pub fn to_llm_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.text(),
        }
    }
}

/// Project files keyed by absolute path; `None` marks a deleted entry
pub type FileMap = IndexMap<String, Option<FileEntry>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FileEntry {
    File {
        content: String,
        #[serde(rename = "isBinary", default)]
        is_binary: bool,
        #[serde(rename = "isLocked", default)]
        is_locked: bool,
    },
    Folder {
        #[serde(rename = "isLocked", default)]
        is_locked: bool,
    },
}

impl FileEntry {
    pub fn is_locked(&self) -> bool {
        match self {
            Self::File { is_locked, .. } | Self::Folder { is_locked } => *is_locked,
        }
    }

    /// Content of a readable text file
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::File {
                content,
                is_binary: false,
                ..
            } => Some(content),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Discuss,
    #[default]
    Build,
}

/// Colors, fonts and features the user picked for generated UIs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DesignScheme {
    pub palette: IndexMap<String, String>,
    pub features: Vec<String>,
    pub font: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupabaseState {
    pub is_connected: bool,
    pub has_selected_project: bool,
    pub credentials: Option<SupabaseCredentials>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SupabaseCredentials {
    pub anon_key: Option<String>,
    pub supabase_url: Option<String>,
}

/// Agent persona active for this turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedAgent {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub files: FileMap,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub context_optimization: bool,
    #[serde(default)]
    pub chat_mode: ChatMode,
    #[serde(default)]
    pub design_scheme: Option<DesignScheme>,
    #[serde(default)]
    pub supabase: Option<SupabaseState>,
    #[serde(default)]
    pub selected_agent: Option<SelectedAgent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_deserializes_ui_payload() {
        let body = json!({
            "messages": [
                { "id": "1", "role": "user", "content": "[Model: m]\n\n[Provider: p]\n\nhello",
                  "createdAt": "2024-05-01T10:00:00Z" },
                { "id": "2", "role": "assistant", "content": [{ "type": "text", "text": "hi" }],
                  "annotations": [{ "type": "chatSummary", "summary": "s", "chatId": "1" }] }
            ],
            "files": {
                "/home/project/src/main.rs": { "type": "file", "content": "fn main() {}", "isBinary": false },
                "/home/project/src": { "type": "folder" },
                "/home/project/gone.rs": null
            },
            "contextOptimization": true,
            "chatMode": "discuss",
            "selectedAgent": { "name": "Reviewer", "instructions": "Review carefully." }
        });

        let request: ChatRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.chat_mode, ChatMode::Discuss);
        assert!(request.context_optimization);
        assert_eq!(request.files.len(), 3);
        assert!(request.files["/home/project/gone.rs"].is_none());
        assert_eq!(request.messages[1].content.text(), "hi");
        assert_eq!(request.messages[1].annotations_of_type("chatSummary").count(), 1);
        assert_eq!(request.selected_agent.unwrap().name, "Reviewer");
        assert!(request.prompt_id.is_none());
    }

    #[test]
    fn test_defaults_for_minimal_request() {
        let request: ChatRequest = serde_json::from_value(json!({ "messages": [] })).unwrap();
        assert_eq!(request.chat_mode, ChatMode::Build);
        assert!(!request.context_optimization);
        assert!(request.files.is_empty());
    }

    #[test]
    fn test_map_text_keeps_images() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { text: "a".to_string() },
            ContentPart::Image { image: "data:".to_string() },
        ]);

        let mapped = content.map_text(|t| t.to_uppercase());
        assert_eq!(mapped.text(), "A");
        match mapped {
            MessageContent::Parts(parts) => assert_eq!(parts.len(), 2),
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn test_missing_ids_are_generated() {
        let request: ChatRequest = serde_json::from_value(json!({
            "messages": [
                { "role": "user", "content": "a" },
                { "role": "user", "content": "b" }
            ]
        }))
        .unwrap();

        assert!(!request.messages[0].id.is_empty());
        assert_ne!(request.messages[0].id, request.messages[1].id);
    }
}
