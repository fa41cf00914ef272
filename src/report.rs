//! Run diagnostics collected through the callback surface.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::callbacks::RunnerCallbacks;
use crate::event::Event;
use crate::path::Path;
use crate::task::TaskRef;
use crate::tracker::Tracker;

/// Execution metrics for one task, keyed by task name in the report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskReport {
    /// Completed runs, successful or not.
    pub runs: usize,
    /// How many of those runs failed.
    pub failures: usize,
    /// Wall-clock time spent inside `run`, summed over all runs.
    pub busy: Duration,
}

/// Aggregated summary of a run, serializable for dashboards or logs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub tasks: BTreeMap<String, TaskReport>,
    pub events: usize,
    pub paths_added: usize,
    pub paths_outdated: usize,
    pub paths_up_to_date: usize,
}

impl RunReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Default)]
struct TaskStats {
    report: TaskReport,
    started: Option<Instant>,
}

/// Observer that accumulates a [`RunReport`].
///
/// Hooks run under the runner's lock, so the bookkeeping here is a handful
/// of map updates and nothing more.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use karakuri::{Runner, Tracker, report::Diagnostics};
/// # let tracker = Tracker::new();
/// let diagnostics = Arc::new(Diagnostics::default());
/// Runner::new(&tracker)
///     .callbacks(diagnostics.clone())
///     .run([])?;
/// println!("{}", diagnostics.report().to_json().unwrap());
/// # Ok::<(), karakuri::RunnerError>(())
/// ```
#[derive(Default)]
pub struct Diagnostics {
    state: Mutex<DiagnosticsState>,
}

#[derive(Default)]
struct DiagnosticsState {
    tasks: BTreeMap<String, TaskStats>,
    events: usize,
    paths_added: usize,
    paths_outdated: usize,
    paths_up_to_date: usize,
}

impl Diagnostics {
    /// Snapshot of everything recorded so far.
    pub fn report(&self) -> RunReport {
        let state = self.state.lock().unwrap();
        RunReport {
            tasks: state
                .tasks
                .iter()
                .map(|(name, stats)| (name.clone(), stats.report.clone()))
                .collect(),
            events: state.events,
            paths_added: state.paths_added,
            paths_outdated: state.paths_outdated,
            paths_up_to_date: state.paths_up_to_date,
        }
    }
}

impl RunnerCallbacks for Diagnostics {
    fn on_task_running(&self, _tracker: &Tracker, task: &TaskRef) {
        let mut state = self.state.lock().unwrap();
        state.tasks.entry(task.name()).or_default().started = Some(Instant::now());
    }

    fn on_task_stopped(&self, _tracker: &Tracker, task: &TaskRef) {
        let mut state = self.state.lock().unwrap();
        let stats = state.tasks.entry(task.name()).or_default();
        stats.report.runs += 1;
        if let Some(started) = stats.started.take() {
            stats.report.busy += started.elapsed();
        }
    }

    fn on_task_failed(&self, _tracker: &Tracker, task: &TaskRef) {
        let mut state = self.state.lock().unwrap();
        state.tasks.entry(task.name()).or_default().report.failures += 1;
    }

    fn on_path_added(&self, _tracker: &Tracker, _path: &Path) {
        self.state.lock().unwrap().paths_added += 1;
    }

    fn on_path_outdated(&self, _tracker: &Tracker, _path: &Path) {
        self.state.lock().unwrap().paths_outdated += 1;
    }

    fn on_path_up_to_date(&self, _tracker: &Tracker, _path: &Path) {
        self.state.lock().unwrap().paths_up_to_date += 1;
    }

    fn on_event(&self, _tracker: &Tracker, _event: &Event) {
        self.state.lock().unwrap().events += 1;
    }
}
