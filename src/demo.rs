// src/demo.rs

//! Sample graph run by the `taskq` binary.
//!
//! ```text
//! fetch ──► [build: compile-core, compile-ui] ──► package
//!                                flaky ─────────┘
//! docs (predicate false, skipped)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::engine::RetryPolicy;
use crate::errors::Result;
use crate::task::{Color, TaskBuilder, TaskGroupBuilder, TaskHandle, TaskSnapshot, Unit};

fn finished(snapshot: &TaskSnapshot) {
    info!(label = %snapshot.label, state = %snapshot.state, "unit finished");
}

fn work(millis: u64) -> impl Fn(&TaskHandle) -> anyhow::Result<()> + Send + Sync + 'static {
    move |handle| {
        for step in 1..=4u64 {
            thread::sleep(Duration::from_millis(millis / 4));
            handle.report_progress((step * 25) as f32);
        }
        handle.log(format_args!("done after {millis}ms"));
        Ok(())
    }
}

/// Build the sample graph. With `fail`, `compile-ui` fails permanently and
/// `package` never runs.
pub fn sample_graph(fail: bool) -> Result<Vec<Unit>> {
    let fetch = TaskBuilder::new("fetch")
        .with_comment("download sources")
        .with_body(work(120))
        .on_finished(finished)
        .build()?;

    let compile_core = TaskBuilder::new("compile-core")
        .with_body(work(200))
        .wait_for(fetch.id())
        .on_finished(finished)
        .build()?;

    let compile_ui = TaskBuilder::new("compile-ui")
        .with_color(Color::rgb(120, 180, 255))
        .with_body(move |handle| {
            if fail {
                anyhow::bail!("ui compiler crashed on attempt {}", handle.attempt());
            }
            work(160)(handle)
        })
        .with_max_retries(1)
        .wait_for(fetch.id())
        .on_failed(|s| info!(label = %s.label, error = ?s.error, "compile step failed"))
        .on_finished(finished)
        .build()?;

    let build = TaskGroupBuilder::new("build")
        .with_children([compile_core.id(), compile_ui.id()])
        .on_start(|s| info!(label = %s.label, "group started"))
        .on_finished(finished)
        .build()?;

    let calls = Arc::new(AtomicU32::new(0));
    let flaky = TaskBuilder::new("flaky")
        .with_comment("fails twice, then succeeds")
        .with_body(move |handle| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                anyhow::bail!("transient failure on attempt {}", handle.attempt());
            }
            Ok(())
        })
        .with_retry(RetryPolicy::exponential(
            3,
            Duration::from_millis(50),
            Duration::from_millis(400),
        ))
        .on_finished(finished)
        .build()?;

    let docs = TaskBuilder::new("docs")
        .with_body(work(40))
        .with_predicate(|| false)
        .with_data("reason", "docs are built nightly")
        .on_finished(finished)
        .build()?;

    let package = TaskBuilder::new("package")
        .with_body(work(80))
        .wait_for_all([build.id(), flaky.id()])
        .on_completed(|s| info!(label = %s.label, "package ready"))
        .on_finished(finished)
        .build()?;

    Ok(vec![
        fetch.into(),
        compile_core.into(),
        compile_ui.into(),
        build.into(),
        flaky.into(),
        docs.into(),
        package.into(),
    ])
}
