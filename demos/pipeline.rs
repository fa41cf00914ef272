//! A three-stage scripted pipeline: fetch -> transform -> publish.
//!
//! Demonstrates the `TrackerBuilder` façade, task-path dependencies, and a
//! fanout of console reporting plus a JSON run report.

use std::sync::{Arc, Mutex};

use karakuri::report::Diagnostics;
use karakuri::reporter::ConsoleReporter;
use karakuri::scripting::TrackerBuilder;
use karakuri::{CallbackFanout, RunnerCallbacks, path};

fn main() -> anyhow::Result<()> {
    karakuri::logging::init();

    let store: Arc<Mutex<Vec<String>>> = Arc::default();
    let mut builder = TrackerBuilder::new();

    let fetch_store = store.clone();
    builder.add_fn("fetch", vec![], vec![path!["raw"]], move || {
        fetch_store.lock().unwrap().push("raw material".into());
        Ok(())
    });

    let transform_store = store.clone();
    let transform = builder.add_fn(
        "transform",
        vec![path!["raw"]],
        vec![path!["clean"]],
        move || {
            let mut store = transform_store.lock().unwrap();
            let refined = store.iter().map(|item| item.to_uppercase()).collect();
            *store = refined;
            Ok(())
        },
    );

    // Publishing depends on the transform task itself through its synthetic
    // path, in addition to the named artifact.
    let transformed = builder.task_path(&transform).unwrap().clone();
    let publish_store = store.clone();
    builder.add_fn(
        "publish",
        vec![path!["clean"], transformed],
        vec![path!["site"]],
        move || {
            for item in publish_store.lock().unwrap().iter() {
                println!("publishing: {item}");
            }
            Ok(())
        },
    );

    let diagnostics = Arc::new(Diagnostics::default());
    let callbacks = CallbackFanout::new([
        Arc::new(ConsoleReporter) as Arc<dyn RunnerCallbacks>,
        diagnostics.clone() as Arc<dyn RunnerCallbacks>,
    ]);

    builder
        .runner()
        .outdated(true)
        .callbacks(Arc::new(callbacks))
        .run([])?;

    println!("{}", diagnostics.report().to_json()?);
    Ok(())
}
