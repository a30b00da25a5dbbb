//! Ordered emission of progress, annotations and content to the client stream

use super::events::{Annotation, Phase, ProgressAnnotation, ProgressStatus, StreamEvent};
use super::framer::ThoughtFramer;
use crate::llm::{CumulativeUsage, FinishReason};
use crate::utils::errors::KaiError;
use crate::Result;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Lines sent to the response body
pub type LineSender = mpsc::Sender<String>;

/// Writes events for one request, in order, through the thought framer
///
/// Progress `order` values are strictly increasing, and every phase gets at
/// most one in-progress and one terminal annotation.
pub struct ProgressEmitter {
    tx: LineSender,
    framer: ThoughtFramer,
    order: u64,
    phases: HashMap<Phase, ProgressStatus>,
    closed: bool,
}

impl ProgressEmitter {
    pub fn new(tx: LineSender) -> Self {
        Self {
            tx,
            framer: ThoughtFramer::new(),
            order: 0,
            phases: HashMap::new(),
            closed: false,
        }
    }

    /// Order of the last progress annotation, 0 before any
    pub fn order(&self) -> u64 {
        self.order
    }

    /// Current status of a phase, if it started
    pub fn phase_status(&self, phase: Phase) -> Option<ProgressStatus> {
        self.phases.get(&phase).copied()
    }

    /// Mark a phase as in progress
    pub async fn begin(&mut self, phase: Phase, message: &str) -> Result<()> {
        if self.phases.contains_key(&phase) {
            debug!("Phase {:?} already started", phase);
            return Ok(());
        }
        self.progress(phase, ProgressStatus::InProgress, message).await
    }

    /// Mark a phase as complete
    pub async fn complete(&mut self, phase: Phase, message: &str) -> Result<()> {
        self.terminate(phase, ProgressStatus::Complete, message).await
    }

    /// Mark a phase as failed
    pub async fn fail(&mut self, phase: Phase, message: &str) -> Result<()> {
        self.terminate(phase, ProgressStatus::Error, message).await
    }

    /// Fail every phase that started but has not terminated
    pub async fn fail_open(&mut self, message: &str) -> Result<()> {
        let mut open: Vec<Phase> = self
            .phases
            .iter()
            .filter(|(_, status)| !status.is_terminal())
            .map(|(phase, _)| *phase)
            .collect();
        open.sort_by_key(|phase| *phase as u8);

        for phase in open {
            self.fail(phase, message).await?;
        }
        Ok(())
    }

    pub async fn annotate(&mut self, annotation: Annotation) -> Result<()> {
        self.send(StreamEvent::Annotation(annotation)).await
    }

    pub async fn text(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.send(StreamEvent::Text(text.to_string())).await
    }

    pub async fn reasoning(&mut self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.send(StreamEvent::Reasoning(text.to_string())).await
    }

    /// In-band error event
    pub async fn error(&mut self, message: &str) -> Result<()> {
        self.send(StreamEvent::Error(message.to_string())).await
    }

    pub async fn finish(&mut self, finish_reason: FinishReason, usage: CumulativeUsage) -> Result<()> {
        self.send(StreamEvent::Finish {
            finish_reason,
            usage,
        })
        .await
    }

    /// Flush a dangling thought container; further events are dropped
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.framer.finish() {
            Some(line) => self.send_line(line).await,
            None => Ok(()),
        }
    }

    async fn terminate(&mut self, phase: Phase, status: ProgressStatus, message: &str) -> Result<()> {
        if self.phase_status(phase).is_some_and(|s| s.is_terminal()) {
            debug!("Phase {:?} already terminated, ignoring {:?}", phase, status);
            return Ok(());
        }
        if !self.phases.contains_key(&phase) {
            self.progress(phase, ProgressStatus::InProgress, message).await?;
        }
        self.progress(phase, status, message).await
    }

    async fn progress(&mut self, phase: Phase, status: ProgressStatus, message: &str) -> Result<()> {
        self.order += 1;
        self.phases.insert(phase, status);
        self.send(StreamEvent::Progress(ProgressAnnotation {
            label: phase,
            status,
            order: self.order,
            message: message.to_string(),
        }))
        .await
    }

    async fn send(&mut self, event: StreamEvent) -> Result<()> {
        if self.closed {
            trace!("Emitter closed, dropping {:?}", event.prefix());
            return Ok(());
        }
        let line = self.framer.frame_event(&event)?;
        self.send_line(line).await
    }

    async fn send_line(&mut self, line: String) -> Result<()> {
        self.tx
            .send(line)
            .await
            .map_err(|_| KaiError::cancelled("client disconnected"))
    }
}
