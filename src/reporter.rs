//! Terminal observers for interactive runs.
//!
//! Both reporters are plain [`RunnerCallbacks`] implementations, so they can
//! be combined with anything else through
//! [`CallbackFanout`](crate::callbacks::CallbackFanout).

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::callbacks::RunnerCallbacks;
use crate::path::Path;
use crate::task::TaskRef;
use crate::tracker::Tracker;

/// Logs every transition as a styled line through `tracing`.
#[derive(Default)]
pub struct ConsoleReporter;

impl RunnerCallbacks for ConsoleReporter {
    fn on_task_running(&self, _tracker: &Tracker, task: &TaskRef) {
        info!("{} {}", style("run ").cyan(), task.name());
    }

    fn on_task_stopped(&self, _tracker: &Tracker, task: &TaskRef) {
        info!("{} {}", style("done").green(), task.name());
    }

    fn on_task_failed(&self, _tracker: &Tracker, task: &TaskRef) {
        info!("{} {}", style("fail").red().bold(), task.name());
    }

    fn on_path_added(&self, _tracker: &Tracker, path: &Path) {
        info!("{} {path}", style("new ").magenta());
    }

    fn on_path_outdated(&self, _tracker: &Tracker, path: &Path) {
        info!("{} {path}", style("stale").yellow());
    }

    fn on_path_up_to_date(&self, _tracker: &Tracker, path: &Path) {
        info!("{} {path}", style("fresh").green());
    }
}

/// Tracks path convergence with a progress bar: the length grows as paths
/// become outdated and the position advances as they come back up to date.
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap()
                .progress_chars("=>-"),
        );
        ProgressReporter { bar }
    }

    /// Clears the bar; call after the run returns.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunnerCallbacks for ProgressReporter {
    fn on_task_running(&self, _tracker: &Tracker, task: &TaskRef) {
        self.bar.set_message(task.name());
    }

    fn on_path_outdated(&self, _tracker: &Tracker, _path: &Path) {
        self.bar.inc_length(1);
    }

    fn on_path_up_to_date(&self, _tracker: &Tracker, _path: &Path) {
        self.bar.inc(1);
    }
}
