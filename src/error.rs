use thiserror::Error;

use crate::path::{Path, Tag};

/// Contract violations detected when validating a tracker.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("task `{task}` references untracked path {path}")]
    UntrackedPath { task: String, path: Path },

    #[error("tag `{tag}` holds task `{task}` which is not in the task set")]
    UntrackedTaggedTask { tag: Tag, task: String },
}

/// Terminal error of a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The tracker handed to the runner violated its own invariants.
    #[error("invalid tracker: {0}")]
    InvalidTracker(#[from] TrackerError),

    /// One or more tasks failed; the ordered userland errors are attached.
    #[error("{} task failure(s) during the run", .0.len())]
    Failures(Vec<anyhow::Error>),
}

impl RunnerError {
    /// The captured task failures, in the order they were recorded.
    pub fn failures(&self) -> &[anyhow::Error] {
        match self {
            RunnerError::InvalidTracker(_) => &[],
            RunnerError::Failures(failures) => failures,
        }
    }
}
