use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::path::Path;

/// A unit of work with declared input and output paths.
///
/// Tasks are records: running one may touch the outside world (write files,
/// call services) but must never mutate the task itself or any tracker or
/// runner state. The scheduler relies on this to treat a task as the same
/// value before, during and after execution.
///
/// Concrete task types additionally need value semantics
/// (`PartialEq + Eq + Hash`) to be wrapped in a [`TaskRef`]; two tasks that
/// compare equal are interchangeable as far as the tracker is concerned.
pub trait Task: Send + Sync + 'static {
    /// Performs the task's work.
    fn run(&self) -> anyhow::Result<()>;

    /// The paths this task consumes.
    fn input_paths(&self) -> Vec<Path>;

    /// The paths this task produces.
    fn output_paths(&self) -> Vec<Path>;

    /// Human-readable label used in logs and reports, never for identity.
    fn name(&self) -> String {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full).to_string()
    }
}

/// Object-safe mirror of [`Task`] plus erased equality and hashing. The
/// blanket impl below is where the type erasure happens.
trait DynTask: Send + Sync {
    fn run(&self) -> anyhow::Result<()>;
    fn input_paths(&self) -> Vec<Path>;
    fn output_paths(&self) -> Vec<Path>;
    fn name(&self) -> String;
    fn dyn_eq(&self, other: &dyn Any) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T> DynTask for T
where
    T: Task + PartialEq + Eq + Hash,
{
    fn run(&self) -> anyhow::Result<()> {
        Task::run(self)
    }

    fn input_paths(&self) -> Vec<Path> {
        Task::input_paths(self)
    }

    fn output_paths(&self) -> Vec<Path> {
        Task::output_paths(self)
    }

    fn name(&self) -> String {
        Task::name(self)
    }

    fn dyn_eq(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| self == other)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        // Values of different types must not collide just because their
        // fields happen to hash alike.
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A cheaply cloneable handle to a type-erased task.
///
/// This is what the tracker and runner store; equality and hashing delegate
/// to the wrapped value, so a `TaskRef` works as a map key exactly like the
/// concrete task would.
#[derive(Clone)]
pub struct TaskRef(Arc<dyn DynTask>);

impl TaskRef {
    pub fn new<T>(task: T) -> Self
    where
        T: Task + PartialEq + Eq + Hash,
    {
        TaskRef(Arc::new(task))
    }

    pub fn run(&self) -> anyhow::Result<()> {
        self.0.run()
    }

    pub fn input_paths(&self) -> Vec<Path> {
        self.0.input_paths()
    }

    pub fn output_paths(&self) -> Vec<Path> {
        self.0.output_paths()
    }

    pub fn name(&self) -> String {
        self.0.name()
    }

    /// Recovers the concrete task type, if it matches.
    pub fn downcast_ref<T: Task>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl<T> From<T> for TaskRef
where
    T: Task + PartialEq + Eq + Hash,
{
    fn from(task: T) -> Self {
        TaskRef::new(task)
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(other.0.as_any())
    }
}

impl Eq for TaskRef {}

impl Hash for TaskRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.dyn_hash(state);
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task({})", self.name())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::*;

    /// Test task that counts its runs and records when each one started and
    /// finished. Identity covers name and declared paths only, so the
    /// counters don't disturb equality.
    #[derive(Clone)]
    pub(crate) struct Probe {
        name: &'static str,
        inputs: Vec<Path>,
        outputs: Vec<Path>,
        fail_with: Option<&'static str>,
        delay: Duration,
        pub ran: Arc<AtomicUsize>,
        pub started: Arc<Mutex<Vec<Instant>>>,
        pub finished: Arc<Mutex<Vec<Instant>>>,
    }

    impl Probe {
        pub fn new(name: &'static str, inputs: Vec<Path>, outputs: Vec<Path>) -> Self {
            Probe {
                name,
                inputs,
                outputs,
                fail_with: None,
                delay: Duration::from_millis(1),
                ran: Arc::default(),
                started: Arc::default(),
                finished: Arc::default(),
            }
        }

        pub fn failing(name: &'static str, outputs: Vec<Path>, message: &'static str) -> Self {
            Probe {
                fail_with: Some(message),
                ..Probe::new(name, vec![], outputs)
            }
        }

        pub fn run_count(&self) -> usize {
            self.ran.load(Ordering::SeqCst)
        }

        pub fn first_start(&self) -> Instant {
            self.started.lock().unwrap()[0]
        }

        pub fn last_finish(&self) -> Instant {
            *self.finished.lock().unwrap().last().unwrap()
        }
    }

    impl Task for Probe {
        fn run(&self) -> anyhow::Result<()> {
            self.started.lock().unwrap().push(Instant::now());
            std::thread::sleep(self.delay);
            if let Some(message) = self.fail_with {
                anyhow::bail!("{message}");
            }
            self.ran.fetch_add(1, Ordering::SeqCst);
            self.finished.lock().unwrap().push(Instant::now());
            Ok(())
        }

        fn input_paths(&self) -> Vec<Path> {
            self.inputs.clone()
        }

        fn output_paths(&self) -> Vec<Path> {
            self.outputs.clone()
        }

        fn name(&self) -> String {
            self.name.to_string()
        }
    }

    impl PartialEq for Probe {
        fn eq(&self, other: &Self) -> bool {
            self.name == other.name && self.inputs == other.inputs && self.outputs == other.outputs
        }
    }

    impl Eq for Probe {}

    impl Hash for Probe {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.name.hash(state);
            self.inputs.hash(state);
            self.outputs.hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::testing::Probe;
    use super::*;
    use crate::path;

    #[test]
    fn test_value_identity() {
        let a = TaskRef::new(Probe::new("t", vec![path![1]], vec![path![2]]));
        let b = TaskRef::new(Probe::new("t", vec![path![1]], vec![path![2]]));
        let c = TaskRef::new(Probe::new("other", vec![path![1]], vec![path![2]]));

        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<TaskRef> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_downcast() {
        let task = TaskRef::new(Probe::new("t", vec![], vec![path![1]]));
        let probe = task.downcast_ref::<Probe>().unwrap();
        assert_eq!(probe.run_count(), 0);
        task.run().unwrap();
        assert_eq!(probe.run_count(), 1);
    }
}
