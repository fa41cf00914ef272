//! Turning plain callables and commands into tracked tasks.
//!
//! The runner core only understands [`Task`] values; this module is the thin
//! layer that scripts trackers together out of closures and subprocesses.
//! Every task added through [`TrackerBuilder`] also gets a unique synthetic
//! output path tagged with [`task_path_tag`], so downstream tasks can depend
//! on *the task itself* instead of a named artifact.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::process::Command;
use std::sync::{Arc, LazyLock};

use anyhow::Context;

use crate::error::RunnerError;
use crate::event::Event;
use crate::path::{Path, Token};
use crate::runner::Runner;
use crate::task::{Task, TaskRef};
use crate::tracker::{Replacement, Tracker};

/// First component of every path standing for a task itself rather than a
/// named artifact. Stable within a process.
pub fn task_path_tag() -> Path {
    static TAG: LazyLock<Token> = LazyLock::new(Token::fresh);
    Path::Token(*TAG)
}

type Callee = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// A task wrapping a native callable.
///
/// Identity is the callee *pointer* plus the declared name and paths: two
/// `ScriptedTask`s are equal only when they share the same wrapped closure,
/// which clones of one task do and independently built tasks never do.
#[derive(Clone)]
pub struct ScriptedTask {
    name: String,
    input_paths: Vec<Path>,
    output_paths: Vec<Path>,
    callee: Callee,
}

impl ScriptedTask {
    pub fn new(
        name: impl Into<String>,
        input_paths: Vec<Path>,
        output_paths: Vec<Path>,
        callee: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        ScriptedTask {
            name: name.into(),
            input_paths,
            output_paths,
            callee: Arc::new(callee),
        }
    }

    fn push_output(&mut self, path: Path) {
        self.output_paths.push(path);
    }
}

impl Task for ScriptedTask {
    fn run(&self) -> anyhow::Result<()> {
        (self.callee)()
    }

    fn input_paths(&self) -> Vec<Path> {
        self.input_paths.clone()
    }

    fn output_paths(&self) -> Vec<Path> {
        self.output_paths.clone()
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

impl PartialEq for ScriptedTask {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.callee, &other.callee)
            && self.name == other.name
            && self.input_paths == other.input_paths
            && self.output_paths == other.output_paths
    }
}

impl Eq for ScriptedTask {}

impl Hash for ScriptedTask {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.callee).cast::<()>() as usize).hash(state);
        self.name.hash(state);
        self.input_paths.hash(state);
        self.output_paths.hash(state);
    }
}

impl fmt::Debug for ScriptedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScriptedTask({})", self.name)
    }
}

/// A task that runs an external command to completion; a non-zero exit
/// status is a failure.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct CommandTask {
    program: String,
    args: Vec<String>,
    current_dir: Option<String>,
    input_paths: Vec<Path>,
    output_paths: Vec<Path>,
}

impl CommandTask {
    pub fn new(
        program: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        CommandTask {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            current_dir: None,
            input_paths: Vec::new(),
            output_paths: Vec::new(),
        }
    }

    pub fn current_dir(mut self, dir: impl Into<String>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn inputs(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        self.input_paths.extend(paths);
        self
    }

    pub fn outputs(mut self, paths: impl IntoIterator<Item = Path>) -> Self {
        self.output_paths.extend(paths);
        self
    }
}

impl Task for CommandTask {
    fn run(&self) -> anyhow::Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let status = command
            .status()
            .with_context(|| format!("failed to spawn `{}`", self.program))?;
        if !status.success() {
            anyhow::bail!("`{}` exited with {status}", self.program);
        }
        Ok(())
    }

    fn input_paths(&self) -> Vec<Path> {
        self.input_paths.clone()
    }

    fn output_paths(&self) -> Vec<Path> {
        self.output_paths.clone()
    }

    fn name(&self) -> String {
        self.program.clone()
    }
}

/// Accumulates scripted tasks into a [`Tracker`] and runs it.
///
/// Declared input and output paths are registered alongside each task, so
/// the resulting tracker is always valid; the synthetic task path of a
/// previously added task (see [`task_path`](Self::task_path)) can be used as
/// an input to sequence tasks directly.
#[derive(Default)]
pub struct TrackerBuilder {
    tracker: Tracker,
    task_paths: HashMap<TaskRef, Path>,
}

impl TrackerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tracker assembled so far.
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// The synthetic output path of a task added through this builder.
    pub fn task_path(&self, task: &TaskRef) -> Option<&Path> {
        self.task_paths.get(task)
    }

    /// Adds a closure task. Returns the handle, whose synthetic path other
    /// tasks may list among their inputs.
    pub fn add_fn(
        &mut self,
        name: impl Into<String>,
        input_paths: Vec<Path>,
        output_paths: Vec<Path>,
        callee: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> TaskRef {
        let mut task = ScriptedTask::new(name, input_paths, output_paths, callee);
        let task_path = fresh_task_path();
        task.push_output(task_path.clone());
        self.insert(TaskRef::new(task), task_path)
    }

    /// Adds a command task.
    pub fn add_command(&mut self, command: CommandTask) -> TaskRef {
        let task_path = fresh_task_path();
        let command = command.outputs([task_path.clone()]);
        self.insert(TaskRef::new(command), task_path)
    }

    fn insert(&mut self, task: TaskRef, task_path: Path) -> TaskRef {
        let mut paths = task.input_paths();
        paths.extend(task.output_paths());
        self.tracker = self.tracker.replaced(
            Replacement::new()
                .add_paths(paths)
                .add_tasks([task.clone()]),
        );
        self.task_paths.insert(task.clone(), task_path);
        task
    }

    /// A runner over the assembled tracker, for callers that want to tweak
    /// options or callbacks.
    pub fn runner(&self) -> Runner {
        Runner::new(&self.tracker)
    }

    /// Runs the assembled tracker with every path initially outdated, so
    /// each task executes at least once.
    pub fn run<I>(self, events: I) -> Result<(), RunnerError>
    where
        I: IntoIterator<Item = Event>,
        I::IntoIter: Send + 'static,
    {
        self.runner().outdated(true).run(events)
    }
}

fn fresh_task_path() -> Path {
    Path::seq([task_path_tag(), Path::Token(Token::fresh())])
}
