//! Typed events of the client data stream and their line encoding
//!
//! Every event is one `<prefix>:<json>\n` line:
//! `0` text, `g` reasoning, `2` progress data, `3` error, `8` annotations, `d` finish.

use crate::llm::{CumulativeUsage, FinishReason};
use serde::{Deserialize, Serialize};

/// Pipeline phase a progress annotation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Summary,
    Context,
    Response,
    Continuation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    InProgress,
    Complete,
    Error,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// `{ type: "progress", label, status, order, message }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "progress")]
pub struct ProgressAnnotation {
    pub label: Phase,
    pub status: ProgressStatus,
    pub order: u64,
    pub message: String,
}

/// Out-of-band metadata attached to the assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Annotation {
    /// Files used as context, relative to the project root
    CodeContext { files: Vec<String> },
    /// Rolling summary; `chatId` is the last message it covers
    ChatSummary {
        summary: String,
        #[serde(rename = "chatId")]
        chat_id: String,
    },
    /// Token usage of every backend call for the request
    Usage { value: CumulativeUsage },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FinishPayload<'a> {
    finish_reason: String,
    usage: &'a CumulativeUsage,
}

/// One event on the client stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text(String),
    Reasoning(String),
    Progress(ProgressAnnotation),
    Error(String),
    Annotation(Annotation),
    Finish {
        finish_reason: FinishReason,
        usage: CumulativeUsage,
    },
}

/// Prefix of reasoning lines
pub const REASONING_PREFIX: char = 'g';

impl StreamEvent {
    /// Channel prefix of the wire line
    pub fn prefix(&self) -> char {
        match self {
            Self::Text(_) => '0',
            Self::Reasoning(_) => REASONING_PREFIX,
            Self::Progress(_) => '2',
            Self::Error(_) => '3',
            Self::Annotation(_) => '8',
            Self::Finish { .. } => 'd',
        }
    }

    /// Encode as a `<prefix>:<json>\n` line
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let payload = match self {
            Self::Text(text) | Self::Reasoning(text) | Self::Error(text) => {
                serde_json::to_string(text)?
            }
            Self::Progress(progress) => serde_json::to_string(&[progress])?,
            Self::Annotation(annotation) => serde_json::to_string(&[annotation])?,
            Self::Finish {
                finish_reason,
                usage,
            } => serde_json::to_string(&FinishPayload {
                finish_reason: finish_reason.to_string(),
                usage,
            })?,
        };

        Ok(format!("{}:{}\n", self.prefix(), payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn payload(line: &str) -> Value {
        let (_, json) = line.split_once(':').unwrap();
        serde_json::from_str(json.trim_end()).unwrap()
    }

    #[test]
    fn test_text_and_reasoning_lines() {
        assert_eq!(StreamEvent::Text("hi \"there\"\n".into()).encode().unwrap(), "0:\"hi \\\"there\\\"\\n\"\n");
        assert_eq!(StreamEvent::Reasoning("hmm".into()).encode().unwrap(), "g:\"hmm\"\n");
        assert_eq!(StreamEvent::Error("boom".into()).encode().unwrap(), "3:\"boom\"\n");
    }

    #[test]
    fn test_progress_line() {
        let line = StreamEvent::Progress(ProgressAnnotation {
            label: Phase::Summary,
            status: ProgressStatus::InProgress,
            order: 1,
            message: "Analysing Request".to_string(),
        })
        .encode()
        .unwrap();

        assert!(line.starts_with("2:["));
        let value = payload(&line);
        assert_eq!(value[0]["type"], "progress");
        assert_eq!(value[0]["label"], "summary");
        assert_eq!(value[0]["status"], "in-progress");
        assert_eq!(value[0]["order"], 1);
    }

    #[test]
    fn test_annotation_lines() {
        let summary = StreamEvent::Annotation(Annotation::ChatSummary {
            summary: "s".to_string(),
            chat_id: "m9".to_string(),
        })
        .encode()
        .unwrap();
        assert!(summary.starts_with("8:"));
        assert_eq!(payload(&summary)[0]["type"], "chatSummary");
        assert_eq!(payload(&summary)[0]["chatId"], "m9");

        let context = StreamEvent::Annotation(Annotation::CodeContext {
            files: vec!["src/a.ts".to_string()],
        })
        .encode()
        .unwrap();
        assert_eq!(payload(&context)[0]["type"], "codeContext");
        assert_eq!(payload(&context)[0]["files"][0], "src/a.ts");

        let usage = StreamEvent::Annotation(Annotation::Usage {
            value: CumulativeUsage {
                completion_tokens: 1,
                prompt_tokens: 2,
                total_tokens: 3,
            },
        })
        .encode()
        .unwrap();
        assert_eq!(payload(&usage)[0]["value"]["totalTokens"], 3);
    }

    #[test]
    fn test_finish_line() {
        let line = StreamEvent::Finish {
            finish_reason: FinishReason::Length,
            usage: CumulativeUsage::default(),
        }
        .encode()
        .unwrap();
        assert!(line.starts_with("d:"));
        assert_eq!(payload(&line)["finishReason"], "length");
        assert_eq!(payload(&line)["usage"]["promptTokens"], 0);
    }

    #[test]
    fn test_annotations_round_trip_from_client() {
        let value = serde_json::json!({ "type": "codeContext", "files": ["a"] });
        let annotation: Annotation = serde_json::from_value(value).unwrap();
        assert_eq!(annotation, Annotation::CodeContext { files: vec!["a".to_string()] });
    }
}
