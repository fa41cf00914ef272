//! Declarative instructions for the runner.
//!
//! An [`Event`] names a set of paths and/or tasks through selector closures,
//! optionally swaps the selection for a regenerated one, and carries
//! [`EventFlags`] describing what should happen to whatever survives. Events
//! are the only way the outside world mutates a running graph; the runner
//! also feeds its own progress back in as events flagged
//! [`hint_local`](EventFlags::hint_local).

use std::collections::HashSet;
use std::fmt;

use crate::path::{Path, Tag};
use crate::task::TaskRef;
use crate::tracker::Tracker;

/// Lifecycle state of a path.
///
/// `Outdated` and `UpToDate` are the surface states callers normally put in
/// events. The other three belong to the runner's own progress machinery:
/// `Updating` marks outputs of a running task, `Updated` is the transient
/// completion signal (resolved to `UpToDate` or back to `Outdated` the
/// moment it is observed), and `Poisoned` latches a failed update.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PathState {
    Outdated,
    Updating,
    Updated,
    UpToDate,
    Poisoned,
}

impl PathState {
    /// Terminal states let a run quiesce; everything else keeps it alive.
    pub fn is_terminal(self) -> bool {
        matches!(self, PathState::UpToDate | PathState::Poisoned)
    }
}

/// Lifecycle state of a task. `Zombie` marks a task removed while running;
/// it is deleted for real once its worker returns.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TaskState {
    Stopped,
    Running,
    Zombie,
}

pub type PathSelector = Box<dyn Fn(&Tracker) -> Vec<Path> + Send>;
pub type PathRegenerator = Box<dyn Fn(&Tracker, &HashSet<Path>) -> Vec<Path> + Send>;
pub type TaskSelector = Box<dyn Fn(&Tracker) -> Vec<TaskRef> + Send>;
pub type TaskRegenerator = Box<dyn Fn(&Tracker, &HashSet<TaskRef>) -> Vec<TaskRef> + Send>;

/// Flags refining how an event is applied.
#[derive(Clone, Debug, PartialEq)]
pub struct EventFlags {
    /// Marks an event that arises from the runner's own task execution, as
    /// opposed to a change of the outside world. Advisory: it does not
    /// affect correctness, only observability.
    pub hint_local: bool,
    /// Target state for the paths that survive the event.
    pub paths_state: PathState,
    /// When present, replaces the tag set of every surviving selected task.
    pub tasks_tags: Option<Vec<Tag>>,
    /// When a task is removed by this event, transition its former output
    /// paths to `Outdated`.
    pub removed_tasks_outdate_paths: bool,
}

impl Default for EventFlags {
    fn default() -> Self {
        EventFlags {
            hint_local: false,
            paths_state: PathState::UpToDate,
            tasks_tags: None,
            removed_tasks_outdate_paths: false,
        }
    }
}

/// An instruction to mutate the graph and/or transition states.
///
/// All parts default to absent. Selectors receive the current tracker
/// snapshot and must be pure with respect to runner state; regenerators
/// additionally receive the selection and return its replacement.
#[derive(Default)]
pub struct Event {
    pub(crate) path_selector: Option<PathSelector>,
    pub(crate) path_regenerator: Option<PathRegenerator>,
    pub(crate) task_selector: Option<TaskSelector>,
    pub(crate) task_regenerator: Option<TaskRegenerator>,
    pub(crate) flags: EventFlags,
}

impl Event {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event selecting a fixed set of paths.
    pub fn for_paths(paths: impl IntoIterator<Item = Path>) -> Self {
        let paths: Vec<Path> = paths.into_iter().collect();
        Event::new().select_paths(move |_| paths.clone())
    }

    /// Event selecting a fixed set of tasks.
    pub fn for_tasks(tasks: impl IntoIterator<Item = TaskRef>) -> Self {
        let tasks: Vec<TaskRef> = tasks.into_iter().collect();
        Event::new().select_tasks(move |_| tasks.clone())
    }

    pub fn select_paths(
        mut self,
        selector: impl Fn(&Tracker) -> Vec<Path> + Send + 'static,
    ) -> Self {
        self.path_selector = Some(Box::new(selector));
        self
    }

    pub fn regenerate_paths(
        mut self,
        regenerator: impl Fn(&Tracker, &HashSet<Path>) -> Vec<Path> + Send + 'static,
    ) -> Self {
        self.path_regenerator = Some(Box::new(regenerator));
        self
    }

    pub fn select_tasks(
        mut self,
        selector: impl Fn(&Tracker) -> Vec<TaskRef> + Send + 'static,
    ) -> Self {
        self.task_selector = Some(Box::new(selector));
        self
    }

    pub fn regenerate_tasks(
        mut self,
        regenerator: impl Fn(&Tracker, &HashSet<TaskRef>) -> Vec<TaskRef> + Send + 'static,
    ) -> Self {
        self.task_regenerator = Some(Box::new(regenerator));
        self
    }

    pub fn flags(mut self, flags: EventFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Shorthand for setting only [`EventFlags::paths_state`].
    pub fn paths_state(mut self, state: PathState) -> Self {
        self.flags.paths_state = state;
        self
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("paths", &self.path_selector.is_some())
            .field("regen_paths", &self.path_regenerator.is_some())
            .field("tasks", &self.task_selector.is_some())
            .field("regen_tasks", &self.task_regenerator.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}
