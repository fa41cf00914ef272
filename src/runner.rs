//! The event-driven scheduler.
//!
//! [`Runner`] drives a tracker snapshot until every path is terminal. The
//! algorithm works as follows:
//!
//! 1. A poller thread drains the caller's lazy event stream into an
//!    unbounded channel.
//! 2. The main loop drains the channel into a batch and applies it under
//!    the state lock: selectors run against the current tracker, selected
//!    items are regenerated, removed or re-tagged, and surviving paths
//!    transition to the flagged state.
//! 3. The loop then scans for stopped tasks that produce an outdated path
//!    and whose inputs are all up to date, and spawns one worker thread per
//!    such task.
//! 4. Workers report back through the same channel: an `updating` event at
//!    dispatch, then `updated` or `poisoned` at completion. A completion
//!    only confirms a path that is still `updating`; a path outdated again
//!    mid-flight is demoted back to `outdated` and will be rescheduled.
//! 5. The loop exits once the stream is exhausted, the channel is empty and
//!    every path is `up_to_date` or `poisoned`.
//!
//! Task failures never propagate directly; they are recorded in order and
//! surfaced as one [`RunnerError::Failures`], on the next iteration by
//! default or at quiescence with `keep_going`.

use std::collections::{HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, trace, warn};

use crate::callbacks::{NoopCallbacks, RunnerCallbacks};
use crate::error::RunnerError;
use crate::event::{Event, EventFlags, PathState, TaskState};
use crate::path::Path;
use crate::task::TaskRef;
use crate::tracker::{Replacement, Tracker};

/// How long an idle iteration parks on the event channel before rechecking.
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Blocking entry point with default options: paths start `up_to_date`,
/// the first failure aborts the run.
pub fn run_tracker<I>(tracker: &Tracker, events: I) -> Result<(), RunnerError>
where
    I: IntoIterator<Item = Event>,
    I::IntoIter: Send + 'static,
{
    Runner::new(tracker).run(events)
}

/// Configures and executes one run over a tracker snapshot.
///
/// ```no_run
/// # use karakuri::{Runner, Tracker};
/// # let tracker = Tracker::new();
/// Runner::new(&tracker)
///     .outdated(true)
///     .keep_going(true)
///     .run([])?;
/// # Ok::<(), karakuri::RunnerError>(())
/// ```
pub struct Runner {
    tracker: Tracker,
    outdated: bool,
    keep_going: bool,
    callbacks: Arc<dyn RunnerCallbacks>,
}

impl Runner {
    /// Snapshots `tracker`; later changes to the caller's copy are invisible
    /// to the run.
    pub fn new(tracker: &Tracker) -> Self {
        Runner {
            tracker: tracker.clone(),
            outdated: false,
            keep_going: false,
            callbacks: Arc::new(NoopCallbacks),
        }
    }

    /// Seed every path as `outdated` instead of `up_to_date`.
    pub fn outdated(mut self, outdated: bool) -> Self {
        self.outdated = outdated;
        self
    }

    /// Keep scheduling independent tasks after a failure and only raise the
    /// aggregate error at quiescence.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Observer hooks for state transitions. See [`RunnerCallbacks`] for the
    /// locking caveats.
    pub fn callbacks(mut self, callbacks: Arc<dyn RunnerCallbacks>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Runs until the event stream is exhausted and the graph quiesces.
    pub fn run<I>(self, events: I) -> Result<(), RunnerError>
    where
        I: IntoIterator<Item = Event>,
        I::IntoIter: Send + 'static,
    {
        self.tracker.validate()?;

        debug!(
            paths = self.tracker.paths().count(),
            tasks = self.tracker.tasks().count(),
            outdated = self.outdated,
            keep_going = self.keep_going,
            "starting run"
        );

        let inner = Arc::new(Inner::new(self.tracker, self.outdated, self.callbacks));
        let (tx, rx) = unbounded();

        let poll_tx = tx.clone();
        let iterator = events.into_iter();
        let poller = thread::spawn(move || {
            for event in iterator {
                if poll_tx.send(event).is_err() {
                    break;
                }
            }
        });

        Inner::drive(&inner, &poller, &rx, &tx, self.keep_going)
    }
}

/// State shared between the main loop and worker threads. One mutex guards
/// everything mutable; the event channel is the only other communication
/// path.
struct Inner {
    state: Mutex<RunnerState>,
    callbacks: Arc<dyn RunnerCallbacks>,
}

struct RunnerState {
    tracker: Tracker,
    path_states: HashMap<Path, PathState>,
    paths_by_state: HashMap<PathState, HashSet<Path>>,
    task_states: HashMap<TaskRef, TaskState>,
    tasks_by_state: HashMap<TaskState, HashSet<TaskRef>>,
    failures: Vec<anyhow::Error>,
}

/// Synthetic event describing the progress of a task's outputs.
fn completion(task: &TaskRef, state: PathState) -> Event {
    Event::for_paths(task.output_paths()).flags(EventFlags {
        hint_local: true,
        paths_state: state,
        ..EventFlags::default()
    })
}

impl Inner {
    fn new(tracker: Tracker, outdated: bool, callbacks: Arc<dyn RunnerCallbacks>) -> Self {
        let seed = if outdated {
            PathState::Outdated
        } else {
            PathState::UpToDate
        };

        let mut path_states = HashMap::new();
        let mut paths_by_state: HashMap<PathState, HashSet<Path>> = HashMap::new();
        for path in tracker.paths() {
            path_states.insert(path.clone(), seed);
            paths_by_state.entry(seed).or_default().insert(path.clone());
        }

        let mut task_states = HashMap::new();
        let mut tasks_by_state: HashMap<TaskState, HashSet<TaskRef>> = HashMap::new();
        for task in tracker.tasks() {
            task_states.insert(task.clone(), TaskState::Stopped);
            tasks_by_state
                .entry(TaskState::Stopped)
                .or_default()
                .insert(task.clone());
        }

        Inner {
            state: Mutex::new(RunnerState {
                tracker,
                path_states,
                paths_by_state,
                task_states,
                tasks_by_state,
                failures: Vec::new(),
            }),
            callbacks,
        }
    }

    fn drive(
        inner: &Arc<Inner>,
        poller: &JoinHandle<()>,
        rx: &Receiver<Event>,
        tx: &Sender<Event>,
        keep_going: bool,
    ) -> Result<(), RunnerError> {
        let mut batch = Vec::new();
        loop {
            while let Ok(event) = rx.try_recv() {
                batch.push(event);
            }

            if !keep_going && inner.has_failures() {
                // A failing worker queues its poisoned event before recording
                // the failure, so one final drain always observes the
                // poisoned outputs before the aggregate error surfaces.
                while let Ok(event) = rx.try_recv() {
                    batch.push(event);
                }
                inner.apply_events(std::mem::take(&mut batch));
                return Err(RunnerError::Failures(inner.take_failures()));
            }

            inner.apply_events(std::mem::take(&mut batch));
            Inner::dispatch_ready(inner, tx);

            if poller.is_finished() && rx.is_empty() && inner.quiescent() {
                break;
            }

            // Bounded backoff instead of a hot spin; both user events and
            // worker completions wake the loop through the channel.
            if let Ok(event) = rx.recv_timeout(IDLE_BACKOFF) {
                batch.push(event);
            }
        }

        let failures = inner.take_failures();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(RunnerError::Failures(failures))
        }
    }

    /// Applies a batch of events in order, serialized under the state lock.
    /// Never blocks on task execution.
    fn apply_events(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        for event in events {
            self.callbacks.on_event(&state.tracker, &event);
            if event.flags.hint_local {
                trace!(?event, "applying event");
            } else {
                debug!(?event, "applying event");
            }

            if let Some(selector) = &event.path_selector {
                let mut selected: HashSet<Path> = selector(&state.tracker).into_iter().collect();

                if let Some(regenerator) = &event.path_regenerator {
                    let regenerated: HashSet<Path> =
                        regenerator(&state.tracker, &selected).into_iter().collect();
                    let removed: Vec<Path> = selected.difference(&regenerated).cloned().collect();
                    let added: Vec<Path> = regenerated.difference(&selected).cloned().collect();

                    for path in &removed {
                        self.remove_path(state, path);
                    }
                    for path in &added {
                        self.add_path(state, path, event.flags.paths_state);
                    }
                    selected = regenerated;
                }

                if event.flags.paths_state == PathState::Updated {
                    // Only a path still marked `updating` gets confirmed; any
                    // other state means the completion is stale and the path
                    // must go back to being rebuilt.
                    for path in &selected {
                        match state.path_states.get(path) {
                            Some(PathState::Updating) => {
                                self.set_path_state(state, path, PathState::UpToDate);
                            }
                            Some(_) => self.set_path_state(state, path, PathState::Outdated),
                            None => {}
                        }
                    }
                } else {
                    for path in &selected {
                        if state.path_states.contains_key(path) {
                            self.set_path_state(state, path, event.flags.paths_state);
                        }
                    }
                }
            }

            if let Some(selector) = &event.task_selector {
                let mut selected: HashSet<TaskRef> =
                    selector(&state.tracker).into_iter().collect();

                if let Some(regenerator) = &event.task_regenerator {
                    let regenerated: HashSet<TaskRef> =
                        regenerator(&state.tracker, &selected).into_iter().collect();
                    let removed: Vec<TaskRef> =
                        selected.difference(&regenerated).cloned().collect();
                    let added: Vec<TaskRef> =
                        regenerated.difference(&selected).cloned().collect();

                    for task in &removed {
                        self.remove_task(state, task);
                        if event.flags.removed_tasks_outdate_paths {
                            for path in task.output_paths() {
                                if state.path_states.contains_key(&path) {
                                    self.set_path_state(state, &path, PathState::Outdated);
                                }
                            }
                        }
                    }
                    for task in &added {
                        self.add_task(state, task);
                    }
                    selected = regenerated;
                }

                if let Some(tags) = &event.flags.tasks_tags {
                    for task in &selected {
                        if state.task_states.contains_key(task) {
                            state.tracker = state.tracker.replaced(
                                Replacement::new()
                                    .remove_tasks([task.clone()])
                                    .add_tagged_task(task.clone(), tags.iter().cloned()),
                            );
                        }
                    }
                }
            }
        }
    }

    /// Selects and spawns every task that can make an outdated path
    /// progress. Runs under the state lock; dispatched tasks transition to
    /// `running` before the scan continues, so one scan never picks the same
    /// task or output twice.
    fn dispatch_ready(inner: &Arc<Inner>, events: &Sender<Event>) {
        let mut guard = inner.state.lock().unwrap();
        let state = &mut *guard;

        let available: Vec<TaskRef> = state
            .tasks_by_state
            .get(&TaskState::Stopped)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default();
        let outdated: Vec<Path> = state
            .paths_by_state
            .get(&PathState::Outdated)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default();

        let mut claimed: HashSet<Path> = HashSet::new();
        let mut dispatched: HashSet<TaskRef> = HashSet::new();

        for path in &outdated {
            if claimed.contains(path) {
                continue;
            }
            for task in &available {
                if dispatched.contains(task) || !task.output_paths().contains(path) {
                    continue;
                }
                let inputs_ready = task
                    .input_paths()
                    .iter()
                    .all(|input| state.path_states.get(input) == Some(&PathState::UpToDate));
                if !inputs_ready {
                    continue;
                }

                claimed.extend(task.output_paths());
                dispatched.insert(task.clone());
                Inner::dispatch(inner, state, task, events);
                break;
            }
        }
    }

    fn dispatch(
        inner: &Arc<Inner>,
        state: &mut RunnerState,
        task: &TaskRef,
        events: &Sender<Event>,
    ) {
        debug!(task = %task.name(), "dispatching");
        // The updating transition rides the queue like any other event; until
        // it applies, the outputs stay outdated but the task itself is
        // already running and out of the candidate pool.
        let _ = events.send(completion(task, PathState::Updating));
        inner.set_task_state(state, task, TaskState::Running);

        let worker = Arc::clone(inner);
        let task = task.clone();
        let events = events.clone();
        thread::spawn(move || worker.run_task(task, events));
    }

    /// Worker body: one per dispatched task.
    fn run_task(&self, task: TaskRef, events: Sender<Event>) {
        let span = tracing::debug_span!("task", name = %task.name());
        let _enter = span.enter();

        let result = match catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(result) => result,
            Err(panic) => {
                let message = if let Some(message) = panic.downcast_ref::<&str>() {
                    format!("task panicked: {message}")
                } else if let Some(message) = panic.downcast_ref::<String>() {
                    format!("task panicked: {message}")
                } else {
                    String::from("task panicked")
                };
                Err(anyhow::anyhow!(message))
            }
        };

        match result {
            Ok(()) => {
                trace!("task completed");
                let _ = events.send(completion(&task, PathState::Updated));
            }
            Err(error) => {
                warn!(error = %error, "task failed");
                // Queue the poisoned transition first: whoever observes the
                // failure below can then always drain it.
                let _ = events.send(completion(&task, PathState::Poisoned));
                let mut guard = self.state.lock().unwrap();
                let state = &mut *guard;
                self.callbacks.on_task_failed(&state.tracker, &task);
                state.failures.push(error);
            }
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        if state.task_states.get(&task) == Some(&TaskState::Zombie) {
            // The task was removed mid-run; its deletion was deferred to us.
            self.delete_task(state, &task);
        } else {
            self.set_task_state(state, &task, TaskState::Stopped);
        }
    }

    fn quiescent(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.path_states.values().all(|state| state.is_terminal())
    }

    fn has_failures(&self) -> bool {
        !self.state.lock().unwrap().failures.is_empty()
    }

    fn take_failures(&self) -> Vec<anyhow::Error> {
        std::mem::take(&mut self.state.lock().unwrap().failures)
    }

    fn set_path_state(&self, state: &mut RunnerState, path: &Path, next: PathState) {
        if let Some(prev) = state.path_states.insert(path.clone(), next) {
            if let Some(bucket) = state.paths_by_state.get_mut(&prev) {
                bucket.remove(path);
            }
        }
        state
            .paths_by_state
            .entry(next)
            .or_default()
            .insert(path.clone());

        match next {
            PathState::Outdated => self.callbacks.on_path_outdated(&state.tracker, path),
            PathState::Updating => self.callbacks.on_path_updating(&state.tracker, path),
            PathState::UpToDate => self.callbacks.on_path_up_to_date(&state.tracker, path),
            PathState::Updated | PathState::Poisoned => {}
        }
    }

    fn add_path(&self, state: &mut RunnerState, path: &Path, path_state: PathState) {
        state.tracker = state
            .tracker
            .replaced(Replacement::new().add_paths([path.clone()]));
        state.path_states.insert(path.clone(), path_state);
        state
            .paths_by_state
            .entry(path_state)
            .or_default()
            .insert(path.clone());

        // Paths are never added in the updating state; that transition only
        // happens to existing outputs of a dispatched task.
        self.callbacks.on_path_added(&state.tracker, path);
        match path_state {
            PathState::Outdated => self.callbacks.on_path_outdated(&state.tracker, path),
            PathState::UpToDate => self.callbacks.on_path_up_to_date(&state.tracker, path),
            _ => {}
        }
    }

    fn remove_path(&self, state: &mut RunnerState, path: &Path) {
        state.tracker = state
            .tracker
            .replaced(Replacement::new().remove_paths([path.clone()]));
        if let Some(prev) = state.path_states.remove(path) {
            if let Some(bucket) = state.paths_by_state.get_mut(&prev) {
                bucket.remove(path);
            }
        }
    }

    fn add_task(&self, state: &mut RunnerState, task: &TaskRef) {
        state.tracker = state
            .tracker
            .replaced(Replacement::new().add_tasks([task.clone()]));
        state.task_states.insert(task.clone(), TaskState::Stopped);
        state
            .tasks_by_state
            .entry(TaskState::Stopped)
            .or_default()
            .insert(task.clone());
    }

    /// Removes a task, deferring deletion to the worker when it is running.
    fn remove_task(&self, state: &mut RunnerState, task: &TaskRef) {
        match state.task_states.get(task) {
            Some(TaskState::Running) => self.set_task_state(state, task, TaskState::Zombie),
            Some(TaskState::Zombie) | None => {}
            Some(TaskState::Stopped) => self.delete_task(state, task),
        }
    }

    fn delete_task(&self, state: &mut RunnerState, task: &TaskRef) {
        state.tracker = state
            .tracker
            .replaced(Replacement::new().remove_tasks([task.clone()]));
        if let Some(prev) = state.task_states.remove(task) {
            if let Some(bucket) = state.tasks_by_state.get_mut(&prev) {
                bucket.remove(task);
            }
        }
    }

    fn set_task_state(&self, state: &mut RunnerState, task: &TaskRef, next: TaskState) {
        if let Some(prev) = state.task_states.insert(task.clone(), next) {
            if let Some(bucket) = state.tasks_by_state.get_mut(&prev) {
                bucket.remove(task);
            }
        }
        state
            .tasks_by_state
            .entry(next)
            .or_default()
            .insert(task.clone());

        match next {
            TaskState::Stopped => self.callbacks.on_task_stopped(&state.tracker, task),
            TaskState::Running => self.callbacks.on_task_running(&state.tracker, task),
            TaskState::Zombie => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::TrackerError;
    use crate::path;
    use crate::path::Tag;
    use crate::task::testing::Probe;

    impl Inner {
        fn path_state(&self, path: &Path) -> Option<PathState> {
            self.state.lock().unwrap().path_states.get(path).copied()
        }

        fn task_state(&self, task: &TaskRef) -> Option<TaskState> {
            self.state.lock().unwrap().task_states.get(task).copied()
        }
    }

    fn tracker_with(paths: Vec<Path>, tasks: Vec<TaskRef>) -> Tracker {
        Tracker::new().replaced(Replacement::new().add_paths(paths).add_tasks(tasks))
    }

    fn new_inner(tracker: Tracker, outdated: bool) -> Arc<Inner> {
        Arc::new(Inner::new(tracker, outdated, Arc::new(NoopCallbacks)))
    }

    /// Drives a run with an empty event stream, keeping the shared state
    /// around so the end states of paths and tasks can be inspected.
    fn drive_to_end(
        tracker: &Tracker,
        keep_going: bool,
    ) -> (Arc<Inner>, Result<(), RunnerError>) {
        let inner = new_inner(tracker.clone(), true);
        let (tx, rx) = unbounded();
        let poller = thread::spawn(|| {});
        let result = Inner::drive(&inner, &poller, &rx, &tx, keep_going);
        (inner, result)
    }

    fn outdate(path: Path) -> Event {
        Event::for_paths([path]).paths_state(PathState::Outdated)
    }

    /// The priming event of the scenarios: marks one path up to date.
    fn prime(path: Path) -> Event {
        Event::for_paths([path])
    }

    #[test]
    fn test_line_run() {
        let task12 = Probe::new("12", vec![path![1]], vec![path![2]]);
        let task23 = Probe::new("23", vec![path![2]], vec![path![3]]);
        let tracker = tracker_with(
            vec![path![1], path![2], path![3]],
            vec![TaskRef::new(task12.clone()), TaskRef::new(task23.clone())],
        );

        Runner::new(&tracker)
            .outdated(true)
            .run([prime(path![1])])
            .unwrap();

        assert_eq!(task12.run_count(), 1);
        assert_eq!(task23.run_count(), 1);
        assert!(task12.last_finish() <= task23.first_start());
    }

    #[test]
    fn test_up_to_date_line_run_does_nothing() {
        let task12 = Probe::new("12", vec![path![1]], vec![path![2]]);
        let task23 = Probe::new("23", vec![path![2]], vec![path![3]]);
        let tracker = tracker_with(
            vec![path![1], path![2], path![3]],
            vec![TaskRef::new(task12.clone()), TaskRef::new(task23.clone())],
        );

        Runner::new(&tracker)
            .outdated(false)
            .run([prime(path![1])])
            .unwrap();

        assert_eq!(task12.run_count(), 0);
        assert_eq!(task23.run_count(), 0);
    }

    #[test]
    fn test_line_run_initializing_task() {
        let task0 = Probe::new("0", vec![], vec![path![1]]);
        let task12 = Probe::new("12", vec![path![1]], vec![path![2]]);
        let task23 = Probe::new("23", vec![path![2]], vec![path![3]]);
        let tracker = tracker_with(
            vec![path![1], path![2], path![3]],
            vec![
                TaskRef::new(task0.clone()),
                TaskRef::new(task12.clone()),
                TaskRef::new(task23.clone()),
            ],
        );

        Runner::new(&tracker).outdated(true).run([]).unwrap();

        assert_eq!(task0.run_count(), 1);
        assert_eq!(task12.run_count(), 1);
        assert_eq!(task23.run_count(), 1);
        assert!(task0.last_finish() <= task12.first_start());
        assert!(task12.last_finish() <= task23.first_start());
    }

    #[test]
    fn test_join_initializing_task() {
        let task0 = Probe::new("0", vec![], vec![path![1]]);
        let task12 = Probe::new("12", vec![path![1]], vec![path![2]]);
        let task13 = Probe::new("13", vec![path![1]], vec![path![3]]);
        let task234 = Probe::new("234", vec![path![2], path![3]], vec![path![4]]);
        let tracker = tracker_with(
            vec![path![4], path![3], path![2], path![1]],
            vec![
                TaskRef::new(task0.clone()),
                TaskRef::new(task12.clone()),
                TaskRef::new(task13.clone()),
                TaskRef::new(task234.clone()),
            ],
        );

        Runner::new(&tracker).outdated(true).run([]).unwrap();

        assert_eq!(task0.run_count(), 1);
        assert_eq!(task12.run_count(), 1);
        assert_eq!(task13.run_count(), 1);
        assert_eq!(task234.run_count(), 1);
        assert!(task0.last_finish() <= task12.first_start());
        assert!(task0.last_finish() <= task13.first_start());
        assert!(task12.last_finish() <= task234.first_start());
        assert!(task13.last_finish() <= task234.first_start());
    }

    #[test]
    fn test_failure() {
        let tracker = tracker_with(
            vec![path![1]],
            vec![TaskRef::new(Probe::failing("f", vec![path![1]], "boom"))],
        );

        let (inner, result) = drive_to_end(&tracker, false);
        let error = result.unwrap_err();

        assert!(matches!(error, RunnerError::Failures(_)));
        assert_eq!(error.failures().len(), 1);
        assert!(error.failures()[0].to_string().contains("boom"));
        // The failed task's output ends poisoned, not merely outdated.
        assert_eq!(inner.path_state(&path![1]), Some(PathState::Poisoned));
    }

    #[test]
    fn test_failure_keep_going() {
        let task2 = Probe::new("2", vec![], vec![path![2]]);
        let task23 = Probe::new("23", vec![path![2]], vec![path![3]]);
        let tracker = tracker_with(
            vec![path![1], path![2], path![3]],
            vec![
                TaskRef::new(Probe::failing("f", vec![path![1]], "boom")),
                TaskRef::new(task2.clone()),
                TaskRef::new(task23.clone()),
            ],
        );

        let (inner, result) = drive_to_end(&tracker, true);
        let error = result.unwrap_err();

        assert_eq!(error.failures().len(), 1);
        assert_eq!(task2.run_count(), 1);
        assert_eq!(task23.run_count(), 1);
        // The failure latches its own output while the independent chain
        // still converges.
        assert_eq!(inner.path_state(&path![1]), Some(PathState::Poisoned));
        assert_eq!(inner.path_state(&path![2]), Some(PathState::UpToDate));
        assert_eq!(inner.path_state(&path![3]), Some(PathState::UpToDate));
    }

    #[test]
    fn test_empty_tracker_returns_immediately() {
        run_tracker(&Tracker::new(), []).unwrap();
    }

    #[test]
    fn test_invalid_tracker_is_rejected() {
        let tracker = Tracker::new().replaced(
            Replacement::new().add_tasks([TaskRef::new(Probe::new("t", vec![], vec![path![1]]))]),
        );

        let error = run_tracker(&tracker, []).unwrap_err();
        assert!(matches!(
            error,
            RunnerError::InvalidTracker(TrackerError::UntrackedPath { .. })
        ));
    }

    #[test]
    fn test_lazy_stream_reruns_outdated_path() {
        let task = Probe::new("t", vec![], vec![path![1]]);
        let tracker = tracker_with(vec![path![1]], vec![TaskRef::new(task.clone())]);

        let rounds = 3;
        let yielded = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&yielded);
        let events = std::iter::from_fn(move || {
            if counter.fetch_add(1, Ordering::SeqCst) < rounds {
                // Give the previous round enough time to converge.
                thread::sleep(Duration::from_millis(50));
                Some(outdate(path![1]))
            } else {
                None
            }
        });

        Runner::new(&tracker).outdated(true).run(events).unwrap();

        // One initial run plus one per invalidation round.
        assert_eq!(task.run_count(), rounds + 1);
    }

    #[test]
    fn test_late_completion_is_demoted() {
        let tracker = tracker_with(vec![path![1]], vec![]);
        let inner = new_inner(tracker, true);

        // A worker claims the path...
        inner.apply_events(vec![
            Event::for_paths([path![1]]).paths_state(PathState::Updating),
        ]);
        assert_eq!(inner.path_state(&path![1]), Some(PathState::Updating));

        // ...the world outdates it mid-flight...
        inner.apply_events(vec![outdate(path![1])]);

        // ...so the completion must not confirm it.
        inner.apply_events(vec![
            Event::for_paths([path![1]]).paths_state(PathState::Updated),
        ]);
        assert_eq!(inner.path_state(&path![1]), Some(PathState::Outdated));
    }

    #[test]
    fn test_completion_confirms_updating_path() {
        let tracker = tracker_with(vec![path![1]], vec![]);
        let inner = new_inner(tracker, true);

        inner.apply_events(vec![
            Event::for_paths([path![1]]).paths_state(PathState::Updating),
        ]);
        inner.apply_events(vec![
            Event::for_paths([path![1]]).paths_state(PathState::Updated),
        ]);

        assert_eq!(inner.path_state(&path![1]), Some(PathState::UpToDate));
        assert!(inner.quiescent());
    }

    #[test]
    fn test_poisoned_counts_as_terminal() {
        let tracker = tracker_with(vec![path![1]], vec![]);
        let inner = new_inner(tracker, true);
        assert!(!inner.quiescent());

        inner.apply_events(vec![
            Event::for_paths([path![1]]).paths_state(PathState::Poisoned),
        ]);

        assert_eq!(inner.path_state(&path![1]), Some(PathState::Poisoned));
        assert!(inner.quiescent());
    }

    #[test]
    fn test_removing_running_task_defers_to_zombie() {
        let task = TaskRef::new(Probe::new("t", vec![], vec![path![1]]));
        let tracker = tracker_with(vec![path![1]], vec![task.clone()]);
        let inner = new_inner(tracker, true);

        {
            let mut guard = inner.state.lock().unwrap();
            let state = &mut *guard;
            inner.set_task_state(state, &task, TaskState::Running);
        }

        inner.apply_events(vec![
            Event::for_tasks([task.clone()]).regenerate_tasks(|_, _| vec![]),
        ]);

        // Deletion is deferred while the worker is alive.
        assert_eq!(inner.task_state(&task), Some(TaskState::Zombie));
        assert!(inner.state.lock().unwrap().tracker.contains_task(&task));

        // The worker returns and finds the zombie marker.
        let (tx, _rx) = unbounded();
        inner.run_task(task.clone(), tx);

        assert_eq!(inner.task_state(&task), None);
        assert!(!inner.state.lock().unwrap().tracker.contains_task(&task));
    }

    #[test]
    fn test_removed_tasks_outdate_their_outputs() {
        let task = TaskRef::new(Probe::new("t", vec![], vec![path![1]]));
        let tracker = tracker_with(vec![path![1]], vec![task.clone()]);
        let inner = new_inner(tracker, false);
        assert_eq!(inner.path_state(&path![1]), Some(PathState::UpToDate));

        inner.apply_events(vec![
            Event::for_tasks([task.clone()])
                .regenerate_tasks(|_, _| vec![])
                .flags(EventFlags {
                    removed_tasks_outdate_paths: true,
                    ..EventFlags::default()
                }),
        ]);

        assert_eq!(inner.task_state(&task), None);
        assert_eq!(inner.path_state(&path![1]), Some(PathState::Outdated));
    }

    #[test]
    fn test_event_replaces_task_tags() {
        let task = TaskRef::new(Probe::new("t", vec![], vec![path![1]]));
        let tracker = Tracker::new().replaced(
            Replacement::new()
                .add_paths([path![1]])
                .add_tagged_task(task.clone(), [Tag::from("old")]),
        );
        let inner = new_inner(tracker, false);

        inner.apply_events(vec![Event::for_tasks([task.clone()]).flags(EventFlags {
            tasks_tags: Some(vec![Tag::from("new")]),
            ..EventFlags::default()
        })]);

        let state = inner.state.lock().unwrap();
        assert!(state.tracker.tasks_by_tags([&Tag::from("old")]).is_empty());
        assert_eq!(state.tracker.tasks_by_tags([&Tag::from("new")]).len(), 1);
    }

    #[test]
    fn test_path_regeneration_swaps_selection() {
        let tracker = tracker_with(vec![path![1]], vec![]);
        let inner = new_inner(tracker, false);

        inner.apply_events(vec![
            Event::for_paths([path![1]])
                .regenerate_paths(|_, _| vec![path![2]])
                .paths_state(PathState::Outdated),
        ]);

        let state = inner.state.lock().unwrap();
        assert!(!state.tracker.contains_path(&path![1]));
        assert!(state.tracker.contains_path(&path![2]));
        drop(state);
        assert_eq!(inner.path_state(&path![1]), None);
        assert_eq!(inner.path_state(&path![2]), Some(PathState::Outdated));
    }
}
