use std::sync::Arc;

use crate::event::Event;
use crate::path::Path;
use crate::task::TaskRef;
use crate::tracker::Tracker;

/// Observer hooks fired on runner state transitions.
///
/// Every hook defaults to a no-op and receives the tracker snapshot current
/// at the moment of the transition. Hooks fire *after* the transition they
/// describe, while the runner still holds its internal lock: implementations
/// must tolerate reentrancy themselves, return quickly, and never call back
/// into the runner. A panicking hook terminates the run.
#[allow(unused_variables)]
pub trait RunnerCallbacks: Send + Sync {
    /// A task entered the running state.
    fn on_task_running(&self, tracker: &Tracker, task: &TaskRef) {}

    /// A task entered the stopped state.
    fn on_task_stopped(&self, tracker: &Tracker, task: &TaskRef) {}

    /// A task's run failed. Fired in addition to, not instead of,
    /// [`on_task_stopped`](Self::on_task_stopped).
    fn on_task_failed(&self, tracker: &Tracker, task: &TaskRef) {}

    /// A path was added to the tracker.
    fn on_path_added(&self, tracker: &Tracker, path: &Path) {}

    fn on_path_outdated(&self, tracker: &Tracker, path: &Path) {}

    fn on_path_updating(&self, tracker: &Tracker, path: &Path) {}

    fn on_path_up_to_date(&self, tracker: &Tracker, path: &Path) {}

    /// The runner is about to apply an event.
    fn on_event(&self, tracker: &Tracker, event: &Event) {}
}

/// The default observer: ignores everything.
#[derive(Default)]
pub struct NoopCallbacks;

impl RunnerCallbacks for NoopCallbacks {}

/// Broadcasts every notification to a list of observers, in order.
#[derive(Default)]
pub struct CallbackFanout(pub Vec<Arc<dyn RunnerCallbacks>>);

impl CallbackFanout {
    pub fn new(observers: impl IntoIterator<Item = Arc<dyn RunnerCallbacks>>) -> Self {
        CallbackFanout(observers.into_iter().collect())
    }
}

impl RunnerCallbacks for CallbackFanout {
    fn on_task_running(&self, tracker: &Tracker, task: &TaskRef) {
        for observer in &self.0 {
            observer.on_task_running(tracker, task);
        }
    }

    fn on_task_stopped(&self, tracker: &Tracker, task: &TaskRef) {
        for observer in &self.0 {
            observer.on_task_stopped(tracker, task);
        }
    }

    fn on_task_failed(&self, tracker: &Tracker, task: &TaskRef) {
        for observer in &self.0 {
            observer.on_task_failed(tracker, task);
        }
    }

    fn on_path_added(&self, tracker: &Tracker, path: &Path) {
        for observer in &self.0 {
            observer.on_path_added(tracker, path);
        }
    }

    fn on_path_outdated(&self, tracker: &Tracker, path: &Path) {
        for observer in &self.0 {
            observer.on_path_outdated(tracker, path);
        }
    }

    fn on_path_updating(&self, tracker: &Tracker, path: &Path) {
        for observer in &self.0 {
            observer.on_path_updating(tracker, path);
        }
    }

    fn on_path_up_to_date(&self, tracker: &Tracker, path: &Path) {
        for observer in &self.0 {
            observer.on_path_up_to_date(tracker, path);
        }
    }

    fn on_event(&self, tracker: &Tracker, event: &Event) {
        for observer in &self.0 {
            observer.on_event(tracker, event);
        }
    }
}
