//! Client data stream: wire events, ordered emission, thought framing and
//! multi-segment continuation

pub mod continuation;
pub mod emitter;
pub mod events;
pub mod framer;
pub mod prompt;

pub use continuation::{ContinuationController, ModelHint, TurnOutcome, TurnState};
pub use emitter::{LineSender, ProgressEmitter};
pub use events::{Annotation, Phase, ProgressAnnotation, ProgressStatus, StreamEvent};
pub use framer::ThoughtFramer;
pub use prompt::{trim_to_summary, SystemPromptBuilder};
