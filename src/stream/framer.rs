//! Re-frames reasoning lines as visible thought markup
//!
//! Clients render only text lines, so a run of `g:` lines becomes text lines
//! wrapped in a thought container.

use super::events::{StreamEvent, REASONING_PREFIX};
use lazy_static::lazy_static;

/// CSS class of the injected thought container
pub const THOUGHT_CLASS: &str = "__kaiThought__";

lazy_static! {
    static ref OPEN_LINE: String = text_line(&format!("<div class=\"{}\">", THOUGHT_CLASS));
    static ref CLOSE_LINE: String = text_line("</div>\n");
}

fn text_line(text: &str) -> String {
    // A `String` always serializes
    format!("0:{}\n", serde_json::Value::String(text.to_string()))
}

fn is_reasoning(line: &str) -> bool {
    line.starts_with(REASONING_PREFIX)
}

/// Stateful line transformer, applied to every outgoing line
#[derive(Debug, Default)]
pub struct ThoughtFramer {
    in_reasoning: bool,
}

impl ThoughtFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform one encoded line into the bytes sent to the client
    pub fn frame(&mut self, line: &str) -> String {
        let reasoning = is_reasoning(line);
        let mut framed = String::with_capacity(line.len() + OPEN_LINE.len());

        match (self.in_reasoning, reasoning) {
            (false, true) => framed.push_str(&OPEN_LINE),
            (true, false) => framed.push_str(&CLOSE_LINE),
            _ => {}
        }
        self.in_reasoning = reasoning;

        if reasoning {
            // `g:<payload>` -> `0:<payload>`
            let payload = line
                .split_once(':')
                .map(|(_, payload)| payload)
                .unwrap_or_default()
                .trim_end_matches('\n');
            framed.push_str("0:");
            framed.push_str(payload);
            framed.push('\n');
        } else {
            framed.push_str(line);
        }

        framed
    }

    /// Closing line for a reasoning block still open at end of stream
    pub fn finish(&mut self) -> Option<String> {
        if std::mem::take(&mut self.in_reasoning) {
            Some(CLOSE_LINE.clone())
        } else {
            None
        }
    }

    /// Frame an event directly
    pub fn frame_event(&mut self, event: &StreamEvent) -> Result<String, serde_json::Error> {
        Ok(self.frame(&event.encode()?))
    }
}
