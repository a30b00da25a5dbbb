//! Message normalization: model/provider hints and assistant noise removal

use super::{ChatMessage, MessageContent};
use crate::llm::MessageRole;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

/// Dependency lockfiles whose embedded content is replaced by a placeholder
pub const LOCKFILE_NAMES: [&str; 5] = [
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "Cargo.lock",
    "bun.lockb",
];

lazy_static! {
    static ref MODEL_HINT: Regex = Regex::new(r"^\[Model: (.*?)\]\n\n").unwrap();
    static ref PROVIDER_HINT: Regex = Regex::new(r"\[Provider: (.*?)\]\n\n").unwrap();
    static ref THOUGHT_BLOCK: Regex =
        Regex::new(r#"(?s)<div class="__kaiThought__">.*?</div>"#).unwrap();
    static ref THINK_BLOCK: Regex = Regex::new(r"(?s)<think>.*?</think>").unwrap();
    static ref FILE_ACTION: Regex = Regex::new(
        r#"(?s)(<kaiAction[^>]*?filePath="([^"]*)"[^>]*>)(.*?)(</kaiAction>)"#
    )
    .unwrap();
}

/// Model and provider used when no message carries a hint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDefaults {
    pub model: String,
    pub provider: String,
}

/// Result of normalizing one request's messages
#[derive(Debug, Clone)]
pub struct NormalizedConversation {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    pub provider: String,
}

/// Model and provider of one user message, plus its sanitized content
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedProperties {
    pub model: String,
    pub provider: String,
    pub content: MessageContent,
}

/// Pull `[Model: …]` / `[Provider: …]` hints out of a user message
pub fn extract_properties(message: &ChatMessage, defaults: &ModelDefaults) -> ExtractedProperties {
    let mut model = None;
    let mut provider = None;

    for text in message.content.text_parts() {
        if model.is_none() {
            model = MODEL_HINT.captures(text).map(|c| c[1].to_string());
        }
        if provider.is_none() {
            provider = PROVIDER_HINT.captures(text).map(|c| c[1].to_string());
        }
    }

    ExtractedProperties {
        model: model.unwrap_or_else(|| defaults.model.clone()),
        provider: provider.unwrap_or_else(|| defaults.provider.clone()),
        content: message.content.map_text(strip_hints),
    }
}

/// Remove model/provider hints from a text
pub fn strip_hints(text: &str) -> String {
    let without_model = MODEL_HINT.replace(text, "");
    PROVIDER_HINT.replace(&without_model, "").into_owned()
}

/// Remove thought markup and lockfile bodies from assistant output
pub fn sanitize_assistant_text(text: &str) -> String {
    let text = THOUGHT_BLOCK.replace_all(text, "");
    let text = THINK_BLOCK.replace_all(&text, "");

    FILE_ACTION
        .replace_all(&text, |caps: &Captures| {
            let path = &caps[2];
            match lockfile_name(path) {
                Some(name) => format!("{}[{} content removed]{}", &caps[1], name, &caps[4]),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lockfile_name(path: &str) -> Option<&'static str> {
    let file_name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    LOCKFILE_NAMES.iter().copied().find(|name| *name == file_name)
}

/// Normalize every message and determine the effective model and provider
///
/// The output has the same length and order as the input; only content changes.
pub fn normalize(messages: Vec<ChatMessage>, defaults: &ModelDefaults) -> NormalizedConversation {
    let mut model = defaults.model.clone();
    let mut provider = defaults.provider.clone();

    let messages = messages
        .into_iter()
        .map(|mut message| {
            match message.role {
                MessageRole::User => {
                    // Each user message resets to the defaults; the last one wins
                    let extracted = extract_properties(&message, defaults);
                    model = extracted.model;
                    provider = extracted.provider;
                    message.content = extracted.content;
                }
                MessageRole::Assistant => {
                    message.content = message.content.map_text(sanitize_assistant_text);
                }
                MessageRole::System => {}
            }
            message
        })
        .collect();

    NormalizedConversation {
        messages,
        model,
        provider,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> ModelDefaults {
        ModelDefaults {
            model: "default-model".to_string(),
            provider: "openrouter".to_string(),
        }
    }

    #[test]
    fn test_extract_properties_strips_hints() {
        let message = ChatMessage::new(
            "1",
            MessageRole::User,
            "[Model: gpt-4o]\n\n[Provider: OpenAI]\n\nBuild a todo app",
        );

        let extracted = extract_properties(&message, &defaults());
        assert_eq!(extracted.model, "gpt-4o");
        assert_eq!(extracted.provider, "OpenAI");
        assert_eq!(extracted.content.text(), "Build a todo app");
    }

    #[test]
    fn test_last_user_message_wins() {
        let messages = vec![
            ChatMessage::new("1", MessageRole::User, "[Model: a]\n\n[Provider: P1]\n\nfirst"),
            ChatMessage::new("2", MessageRole::Assistant, "reply"),
            ChatMessage::new("3", MessageRole::User, "[Model: b]\n\n[Provider: P2]\n\nsecond"),
        ];

        let normalized = normalize(messages, &defaults());
        assert_eq!(normalized.model, "b");
        assert_eq!(normalized.provider, "P2");
        assert_eq!(normalized.messages.len(), 3);
        assert_eq!(normalized.messages[0].content.text(), "first");
        assert_eq!(normalized.messages[2].id, "3");
    }

    #[test]
    fn test_defaults_without_hints() {
        let messages = vec![ChatMessage::new("1", MessageRole::User, "plain")];
        let normalized = normalize(messages, &defaults());
        assert_eq!(normalized.model, "default-model");
        assert_eq!(normalized.provider, "openrouter");
        assert_eq!(normalized.messages[0].content.text(), "plain");
    }

    #[test]
    fn test_assistant_thoughts_are_stripped() {
        let text = "<div class=\"__kaiThought__\">pondering\nmore</div>Answer<think>hidden</think> done";
        assert_eq!(sanitize_assistant_text(text), "Answer done");
    }

    #[test]
    fn test_lockfile_content_is_replaced() {
        let text = concat!(
            "<kaiAction type=\"file\" filePath=\"package-lock.json\">{\"huge\": true}</kaiAction>",
            "<kaiAction type=\"file\" filePath=\"src/main.ts\">console.log(1)</kaiAction>",
            "<kaiAction type=\"file\" filePath=\"crates/app/Cargo.lock\">[[package]]</kaiAction>",
        );

        let sanitized = sanitize_assistant_text(text);
        assert!(sanitized.contains("filePath=\"package-lock.json\">[package-lock.json content removed]</kaiAction>"));
        assert!(sanitized.contains("console.log(1)"));
        assert!(sanitized.contains("[Cargo.lock content removed]"));
        assert!(!sanitized.contains("huge"));
    }

    #[test]
    fn test_user_and_system_text_is_not_sanitized() {
        let messages = vec![
            ChatMessage::new("0", MessageRole::System, "<think>keep</think>"),
            ChatMessage::new("1", MessageRole::User, "<think>keep</think>"),
        ];
        let normalized = normalize(messages, &defaults());
        assert_eq!(normalized.messages[0].content.text(), "<think>keep</think>");
        assert_eq!(normalized.messages[1].content.text(), "<think>keep</think>");
    }
}
