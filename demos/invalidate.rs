//! External invalidation: a lazy event stream repeatedly outdates a path and
//! the runner rebuilds it each round, quiescing in between.

use std::sync::Arc;
use std::time::Duration;

use karakuri::reporter::ConsoleReporter;
use karakuri::scripting::ScriptedTask;
use karakuri::{Event, PathState, Replacement, Runner, TaskRef, Tracker, path};

fn main() -> anyhow::Result<()> {
    karakuri::logging::init();

    let rebuild = ScriptedTask::new("rebuild", vec![], vec![path!["data"]], || {
        println!("rebuilding data");
        Ok(())
    });
    let tracker = Tracker::new().replaced(
        Replacement::new()
            .add_paths([path!["data"]])
            .add_tasks([TaskRef::new(rebuild)]),
    );

    // Three rounds of invalidation, spaced out the way a slow file watcher
    // would deliver them.
    let mut round = 0;
    let events = std::iter::from_fn(move || {
        if round < 3 {
            round += 1;
            std::thread::sleep(Duration::from_millis(200));
            Some(Event::for_paths([path!["data"]]).paths_state(PathState::Outdated))
        } else {
            None
        }
    });

    Runner::new(&tracker)
        .outdated(true)
        .callbacks(Arc::new(ConsoleReporter))
        .run(events)?;

    Ok(())
}
