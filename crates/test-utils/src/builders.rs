#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use taskq::{SchedulerSettings, Task, TaskBuilder};

/// Task whose body does nothing.
pub fn noop(label: &str) -> TaskBuilder {
    TaskBuilder::new(label).with_body(|_| Ok(()))
}

/// Task whose body always returns an error.
pub fn failing(label: &str) -> TaskBuilder {
    let label_owned = label.to_string();
    TaskBuilder::new(label).with_body(move |h| {
        anyhow::bail!("{label_owned} failed on attempt {}", h.attempt())
    })
}

/// Task whose body fails `failures` times and then succeeds. The returned
/// counter holds the number of executions.
pub fn flaky(label: &str, failures: u32) -> (TaskBuilder, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let builder = TaskBuilder::new(label).with_body(move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) < failures {
            anyhow::bail!("transient failure");
        }
        Ok(())
    });
    (builder, calls)
}

/// Task whose body sleeps for `millis`.
pub fn sleeper(label: &str, millis: u64) -> TaskBuilder {
    TaskBuilder::new(label).with_body(move |_| {
        std::thread::sleep(Duration::from_millis(millis));
        Ok(())
    })
}

/// `labels[0] <- labels[1] <- ...`: each task waits for the previous one.
pub fn chain(labels: &[&str]) -> Vec<Task> {
    let mut out: Vec<Task> = Vec::with_capacity(labels.len());
    for label in labels {
        let mut builder = noop(label);
        if let Some(prev) = out.last() {
            builder = builder.wait_for(prev.id());
        }
        out.push(builder.build().expect("chain task should build"));
    }
    out
}

/// Settings with a short idle timeout so stall detection fires quickly.
pub fn fast_settings(workers: usize) -> SchedulerSettings {
    SchedulerSettings::default()
        .with_max_workers(workers)
        .with_idle_timeout(Duration::from_millis(100))
}
