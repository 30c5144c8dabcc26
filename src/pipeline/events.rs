use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender, unbounded};

use super::FileOutcome;

/// Progress published by the worker. The presentation layer owns the
/// receiving end; the worker never reads shared state back.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted { total_files: usize, skipped: usize },
    FileStarted { path: PathBuf, index: usize, total: usize },
    ChunkTranslated { path: PathBuf, chunk: usize, chunks: usize },
    RepairAttempt { path: PathBuf, attempt: usize, errors: usize },
    FileFinished { path: PathBuf, outcome: FileOutcome, percent: u8 },
    RewritePass { iteration: usize, files_changed: usize },
    CheckpointSaved { files_processed: usize },
    Log(String),
    RunFinished { clean: usize, flagged: usize, failed: usize },
}

/// Sending half handed to the pipeline. Events are dropped silently once the
/// receiver is gone.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<Sender<ProgressEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, Receiver<ProgressEvent>) {
        let (sender, receiver) = unbounded();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink with no receiver.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(ProgressEvent::Log(message.into()));
    }
}
