//! The bipartite graph of paths and tasks.
//!
//! A [`Tracker`] is a value: its only mutator, [`Tracker::replaced`], leaves
//! the receiver untouched and returns a fresh tracker with the requested
//! items swapped out. The runner leans on this to hold a consistent snapshot
//! while it assembles the next one, and callbacks can read the tracker they
//! are handed without any locking discipline.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use crate::error::TrackerError;
use crate::path::{Path, Tag};
use crate::task::TaskRef;

/// A batch of changes for [`Tracker::replaced`].
///
/// All parts default to empty; removals apply before additions, so replacing
/// an item is expressed by listing it on both sides.
#[derive(Default)]
pub struct Replacement {
    old_paths: HashSet<Path>,
    new_paths: HashSet<Path>,
    old_tasks: HashSet<TaskRef>,
    new_tasks: HashSet<TaskRef>,
    new_tagged_tasks: HashMap<TaskRef, Vec<Tag>>,
}

impl Replacement {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths to drop from the path set.
    pub fn remove_paths(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        self.old_paths.extend(paths);
        self
    }

    /// Paths to add to the path set.
    pub fn add_paths(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        self.new_paths.extend(paths);
        self
    }

    /// Tasks to drop from the task set and from every tag bucket.
    pub fn remove_tasks(mut self, tasks: impl IntoIterator<Item = TaskRef>) -> Self {
        self.old_tasks.extend(tasks);
        self
    }

    /// Tasks to add, untagged.
    pub fn add_tasks(mut self, tasks: impl IntoIterator<Item = TaskRef>) -> Self {
        self.new_tasks.extend(tasks);
        self
    }

    /// A task to add together with the tags it should carry. Combined with
    /// [`remove_tasks`](Self::remove_tasks) on the same task, this replaces
    /// its tag set wholesale.
    pub fn add_tagged_task(
        mut self,
        task: TaskRef,
        tags: impl IntoIterator<Item = Tag>,
    ) -> Self {
        self.new_tagged_tasks
            .entry(task)
            .or_default()
            .extend(tags);
        self
    }
}

/// Bipartite graph of paths and tasks with tag and input/output indexes.
#[derive(Clone, Default)]
pub struct Tracker {
    paths: HashSet<Path>,
    tasks: HashSet<TaskRef>,
    tasks_by_tags: HashMap<Tag, HashSet<TaskRef>>,
    tasks_by_inputs: HashMap<Path, HashSet<TaskRef>>,
    tasks_by_outputs: HashMap<Path, HashSet<TaskRef>>,
}

impl Tracker {
    /// An empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// All tracked paths.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter()
    }

    /// All tracked tasks.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskRef> {
        self.tasks.iter()
    }

    pub fn contains_path(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn contains_task(&self, task: &TaskRef) -> bool {
        self.tasks.contains(task)
    }

    /// Pairs of tags and the tasks carrying them. Untagged tasks are absent.
    pub fn tagged_tasks(&self) -> impl Iterator<Item = (&Tag, &HashSet<TaskRef>)> {
        self.tasks_by_tags.iter()
    }

    /// Tasks carrying *all* of the given tags. An empty query or a tag with
    /// no bucket yields the empty set.
    pub fn tasks_by_tags<'a>(&self, tags: impl IntoIterator<Item = &'a Tag>) -> HashSet<TaskRef> {
        intersect(&self.tasks_by_tags, tags)
    }

    /// Tasks consuming *all* of the given paths; same empty semantics as
    /// [`tasks_by_tags`](Self::tasks_by_tags).
    pub fn tasks_by_inputs<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a Path>,
    ) -> HashSet<TaskRef> {
        intersect(&self.tasks_by_inputs, paths)
    }

    /// Tasks producing *all* of the given paths.
    pub fn tasks_by_outputs<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a Path>,
    ) -> HashSet<TaskRef> {
        intersect(&self.tasks_by_outputs, paths)
    }

    /// The sole transformation: returns a tracker with `replacement` applied.
    ///
    /// Path and task sets are recomputed as `(current ∖ removed) ∪ added`;
    /// tagged additions imply task membership. Tag buckets keep their
    /// surviving members, removed tasks disappear from every bucket, and
    /// buckets left empty are dropped. Both reverse indexes are rebuilt from
    /// scratch over the new sets; callers are expected to batch their
    /// changes into one call rather than chain many small ones.
    pub fn replaced(&self, replacement: Replacement) -> Tracker {
        let Replacement {
            old_paths,
            new_paths,
            old_tasks,
            new_tasks,
            new_tagged_tasks,
        } = replacement;

        let paths: HashSet<Path> = self
            .paths
            .difference(&old_paths)
            .cloned()
            .chain(new_paths)
            .collect();

        let tasks: HashSet<TaskRef> = self
            .tasks
            .difference(&old_tasks)
            .cloned()
            .chain(new_tasks)
            .chain(new_tagged_tasks.keys().cloned())
            .collect();

        let mut tasks_by_tags: HashMap<Tag, HashSet<TaskRef>> = HashMap::new();
        for (tag, bucket) in &self.tasks_by_tags {
            let bucket: HashSet<TaskRef> = bucket
                .iter()
                .filter(|task| !old_tasks.contains(*task))
                .cloned()
                .collect();
            if !bucket.is_empty() {
                tasks_by_tags.insert(tag.clone(), bucket);
            }
        }
        for (task, tags) in new_tagged_tasks {
            for tag in tags {
                tasks_by_tags.entry(tag).or_default().insert(task.clone());
            }
        }

        let mut tasks_by_inputs: HashMap<Path, HashSet<TaskRef>> =
            paths.iter().map(|path| (path.clone(), HashSet::new())).collect();
        let mut tasks_by_outputs = tasks_by_inputs.clone();
        for task in &tasks {
            for path in task.input_paths() {
                if let Some(bucket) = tasks_by_inputs.get_mut(&path) {
                    bucket.insert(task.clone());
                }
            }
            for path in task.output_paths() {
                if let Some(bucket) = tasks_by_outputs.get_mut(&path) {
                    bucket.insert(task.clone());
                }
            }
        }

        Tracker {
            paths,
            tasks,
            tasks_by_tags,
            tasks_by_inputs,
            tasks_by_outputs,
        }
    }

    /// Checks the structural invariants: every path a task mentions is
    /// tracked, and every tagged task is in the task set. The remaining
    /// invariants (set semantics, index consistency) hold by construction.
    pub fn validate(&self) -> Result<(), TrackerError> {
        for task in &self.tasks {
            for path in task.input_paths().into_iter().chain(task.output_paths()) {
                if !self.paths.contains(&path) {
                    return Err(TrackerError::UntrackedPath {
                        task: task.name(),
                        path,
                    });
                }
            }
        }
        for (tag, bucket) in &self.tasks_by_tags {
            for task in bucket {
                if !self.tasks.contains(task) {
                    return Err(TrackerError::UntrackedTaggedTask {
                        tag: tag.clone(),
                        task: task.name(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Trackers are equivalent when they track the same paths and tasks; the tag
/// index is presentation, not identity.
impl PartialEq for Tracker {
    fn eq(&self, other: &Self) -> bool {
        self.paths == other.paths && self.tasks == other.tasks
    }
}

impl Eq for Tracker {}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("paths", &self.paths.len())
            .field("tasks", &self.tasks.len())
            .field("tags", &self.tasks_by_tags.len())
            .finish()
    }
}

fn intersect<'a, K>(
    index: &HashMap<K, HashSet<TaskRef>>,
    keys: impl IntoIterator<Item = &'a K>,
) -> HashSet<TaskRef>
where
    K: Eq + Hash + 'a,
{
    let mut buckets = keys.into_iter().map(|key| index.get(key));
    let first = match buckets.next() {
        // Zero keys intersect to nothing, not to everything.
        None => return HashSet::new(),
        Some(None) => return HashSet::new(),
        Some(Some(bucket)) => bucket,
    };

    let mut result = first.clone();
    for bucket in buckets {
        match bucket {
            None => return HashSet::new(),
            Some(bucket) => result.retain(|task| bucket.contains(task)),
        }
        if result.is_empty() {
            break;
        }
    }
    result
}
