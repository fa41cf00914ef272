#![deny(
    unsafe_code,
    clippy::panic,
)]

pub mod callbacks;
pub mod error;
mod event;
#[cfg(feature = "logging")]
pub mod logging;
mod path;
pub mod report;
#[cfg(feature = "reporters")]
pub mod reporter;
mod runner;
pub mod scripting;
mod task;
mod tracker;

pub use crate::callbacks::{CallbackFanout, NoopCallbacks, RunnerCallbacks};
pub use crate::error::{RunnerError, TrackerError};
pub use crate::event::{Event, EventFlags, PathState, TaskState};
pub use crate::path::{Path, Tag, Token};
pub use crate::runner::{Runner, run_tracker};
pub use crate::task::{Task, TaskRef};
pub use crate::tracker::{Replacement, Tracker};
