// tests/coordinator_flow.rs
//
// End-to-end behaviour of the coordinator: ordering, groups, retries and
// callback delivery, driven through the public handle with the real pool.

use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use taskq::{
    CallbackKind, Coordinator, SchedulerError, SchedulerEvent, TaskBuilder, TaskExecutionError,
    TaskGroupBuilder, TaskState, Unit,
};
use taskq_test_utils::builders::{chain, failing, fast_settings, flaky, noop, sleeper};
use taskq_test_utils::recording::RecordingCallbacks;
use taskq_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// Task that appends its label to `log` when it runs.
fn logged(label: &str, log: &Arc<Mutex<Vec<String>>>) -> TaskBuilder {
    let log = Arc::clone(log);
    let name = label.to_string();
    TaskBuilder::new(label).with_body(move |_| {
        log.lock().unwrap().push(name.clone());
        Ok(())
    })
}

#[tokio::test]
async fn chain_runs_in_dependency_order() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(4))?;
    let log = Arc::new(Mutex::new(Vec::new()));

    let a = logged("a", &log).build()?;
    let b = logged("b", &log).wait_for(a.id()).build()?;
    let c = logged("c", &log).wait_for(b.id()).build()?;
    let ids = coordinator
        .add_many(vec![c.into(), a.into(), b.into()])
        .await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    for id in ids {
        let snap = coordinator.snapshot(id).expect("submitted task has a snapshot");
        assert_eq!(snap.state, TaskState::Succeeded);
        assert_eq!(snap.attempt_count, 1);
    }
    Ok(())
}

#[tokio::test]
async fn nothing_runs_before_workers_start() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;
    let units: Vec<Unit> = chain(&["one", "two"]).into_iter().map(Unit::from).collect();
    let ids = coordinator.add_many(units).await?;

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    assert_eq!(coordinator.snapshot(ids[0]).unwrap().state, TaskState::Ready);
    assert_eq!(coordinator.snapshot(ids[1]).unwrap().state, TaskState::Pending);

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;
    assert_eq!(coordinator.snapshot_all().counts().succeeded, 2);
    Ok(())
}

#[tokio::test]
async fn group_of_skipped_children_unblocks_dependent() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;

    let mut scope = coordinator.create_group(TaskGroupBuilder::new("optional"));
    let first = scope.add(noop("lint").with_predicate(|| false).build()?);
    let second = scope.add(noop("format").with_predicate(|| false).build()?);
    let group = scope.commit().await?;

    let after = coordinator
        .add(noop("after").wait_for(group).build()?)
        .await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    assert_eq!(coordinator.snapshot(first).unwrap().state, TaskState::Skipped);
    assert_eq!(coordinator.snapshot(second).unwrap().state, TaskState::Skipped);
    assert_eq!(coordinator.snapshot(group).unwrap().state, TaskState::Skipped);
    assert_eq!(coordinator.snapshot(after).unwrap().state, TaskState::Succeeded);

    let members = coordinator.snapshot(group).unwrap().children;
    assert_eq!(members, vec![first, second]);
    Ok(())
}

#[tokio::test]
async fn dropped_group_scope_submits_nothing() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    {
        let mut scope = coordinator.create_group(TaskGroupBuilder::new("abandoned"));
        scope.add(noop("never").build()?);
    }

    assert!(coordinator.snapshot_all().units.is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_dependency_skips_dependents_by_default() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;
    let root = failing("root").build()?;
    let mid = noop("mid").wait_for(root.id()).build()?;
    let leaf = noop("leaf").wait_for(mid.id()).build()?;
    let (root_id, mid_id, leaf_id) = (root.id(), mid.id(), leaf.id());
    coordinator
        .add_many(vec![root.into(), mid.into(), leaf.into()])
        .await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    assert_eq!(coordinator.snapshot(root_id).unwrap().state, TaskState::Failed);
    for id in [mid_id, leaf_id] {
        let snap = coordinator.snapshot(id).unwrap();
        assert_eq!(snap.state, TaskState::Skipped);
        assert_eq!(snap.attempt_count, 0);
        assert_eq!(snap.error, Some(TaskExecutionError::DependencyFailed(root_id)));
    }
    Ok(())
}

#[tokio::test]
async fn fail_policy_fails_dependents_with_callbacks() -> TestResult {
    init_tracing();

    let settings =
        fast_settings(2).with_dependency_failure(taskq::DependencyFailurePolicy::Fail);
    let coordinator = Coordinator::new(settings)?;
    let recorder = RecordingCallbacks::new();

    let root = failing("root").build()?;
    let dependent = recorder
        .attach(noop("dependent").wait_for(root.id()))
        .build()?;
    let (root_id, dependent_id) = (root.id(), dependent.id());
    coordinator
        .add_many(vec![root.into(), dependent.into()])
        .await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    let snap = coordinator.snapshot(dependent_id).unwrap();
    assert_eq!(snap.state, TaskState::Failed);
    assert_eq!(snap.error, Some(TaskExecutionError::DependencyFailed(root_id)));
    assert_eq!(
        recorder.kinds_for("dependent"),
        vec![CallbackKind::Failed, CallbackKind::Finished]
    );
    Ok(())
}

#[tokio::test]
async fn failing_task_runs_max_retries_plus_one_times() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;
    let (builder, calls) = flaky("always", u32::MAX);
    let id = coordinator
        .add(builder.with_max_retries(2).build()?)
        .await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    let snap = coordinator.snapshot(id).unwrap();
    assert_eq!(snap.state, TaskState::Failed);
    assert_eq!(snap.attempt_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        snap.history
            .iter()
            .filter(|s| **s == TaskState::Retrying)
            .count(),
        2
    );
    Ok(())
}

#[tokio::test]
async fn flaky_task_recovers_after_delayed_retries() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let (builder, calls) = flaky("flaky", 2);
    let policy = taskq::RetryPolicy::fixed(3, std::time::Duration::from_millis(20));
    let id = coordinator.add(builder.with_retry(policy).build()?).await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    let snap = coordinator.snapshot(id).unwrap();
    assert_eq!(snap.state, TaskState::Succeeded);
    assert_eq!(snap.attempt_count, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(snap.error.is_none());
    Ok(())
}

#[tokio::test]
async fn callbacks_fire_in_order_on_the_coordinator_thread() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;
    let recorder = RecordingCallbacks::new();

    let ok = recorder.attach(noop("ok")).build()?;
    let bad = recorder
        .attach(failing("bad").with_max_retries(1))
        .build()?;
    coordinator.add_many(vec![ok.into(), bad.into()]).await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    assert_eq!(
        recorder.kinds_for("ok"),
        vec![
            CallbackKind::Start,
            CallbackKind::Completed,
            CallbackKind::Finished
        ]
    );
    // One on_start even though the task ran twice.
    assert_eq!(
        recorder.kinds_for("bad"),
        vec![
            CallbackKind::Start,
            CallbackKind::Failed,
            CallbackKind::Finished
        ]
    );

    for delivery in recorder.all() {
        assert_eq!(delivery.thread.as_deref(), Some("taskq-coordinator"));
    }
    Ok(())
}

#[tokio::test]
async fn group_callbacks_follow_children() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;
    let recorder = RecordingCallbacks::new();

    let mut scope = coordinator.create_group(recorder.attach_group(TaskGroupBuilder::new("build")));
    scope.add(recorder.attach(noop("core")).build()?);
    scope.add(recorder.attach(noop("ui")).build()?);
    let group = scope.commit().await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;

    assert_eq!(coordinator.snapshot(group).unwrap().state, TaskState::Succeeded);
    assert_eq!(
        recorder.kinds_for("build"),
        vec![
            CallbackKind::Start,
            CallbackKind::Completed,
            CallbackKind::Finished
        ]
    );

    // The group finishes after its last child.
    let finished = recorder.labels_for(CallbackKind::Finished);
    assert_eq!(finished.last().map(String::as_str), Some("build"));
    Ok(())
}

#[tokio::test]
async fn cyclic_batch_is_rejected_atomically() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;

    let a = TaskBuilder::new("a").with_body(|_| Ok(()));
    let b = TaskBuilder::new("b").with_body(|_| Ok(())).wait_for(a.id());
    let a = a.wait_for(b.id());
    let bystander = noop("bystander").build()?;

    let err = coordinator
        .add_many(vec![a.build()?.into(), b.build()?.into(), bystander.into()])
        .await
        .unwrap_err();

    assert!(matches!(err, SchedulerError::CyclicDependency(_)));
    assert!(coordinator.snapshot_all().units.is_empty());
    Ok(())
}

#[tokio::test]
async fn unknown_dependency_is_rejected() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let ghost = noop("ghost").build()?;
    let task = noop("orphan").wait_for(ghost.id()).build()?;

    let err = coordinator.add(task).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Configuration(_)));
    Ok(())
}

#[tokio::test]
async fn progress_reports_are_visible_in_snapshots() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let id = coordinator
        .add(
            TaskBuilder::new("progress")
                .with_body(|task| {
                    task.report_progress(250.0);
                    std::thread::sleep(std::time::Duration::from_millis(300));
                    Ok(())
                })
                .build()?,
        )
        .await?;

    coordinator.start_workers()?;

    let mut snapshots = 0;
    with_timeout(async {
        loop {
            if coordinator.snapshot(id).and_then(|s| s.progress) == Some(100.0) {
                break;
            }
            snapshots += 1;
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    tracing::debug!(snapshots, "progress observed");

    with_timeout(coordinator.wait_idle()).await?;
    Ok(())
}

#[tokio::test]
async fn remove_drops_a_task_with_its_dependents() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let mut events = coordinator.subscribe();
    let root = noop("root").build()?;
    let child = noop("child").wait_for(root.id()).build()?;
    let other = noop("other").build()?;
    let (root_id, child_id, other_id) = (root.id(), child.id(), other.id());
    coordinator
        .add_many(vec![root.clone().into(), child.into(), other.into()])
        .await?;

    let removed = coordinator.remove(root_id).await?;
    assert_eq!(removed, vec![root_id, child_id]);
    assert!(coordinator.snapshot(root_id).is_none());
    assert!(coordinator.snapshot(child_id).is_none());
    assert!(coordinator.snapshot(other_id).is_some());

    let mut announced = Vec::new();
    with_timeout(async {
        while announced.len() < 2 {
            if let Ok(SchedulerEvent::TaskRemoved { task }) = events.recv().await {
                announced.push(task);
            }
        }
    })
    .await;
    assert_eq!(announced, vec![root_id, child_id]);

    let err = coordinator.remove(root_id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::TaskNotFound(_)));

    // A removed id can be submitted again.
    coordinator.add(root).await?;
    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;
    assert_eq!(coordinator.snapshot(root_id).unwrap().state, TaskState::Succeeded);
    Ok(())
}

#[tokio::test]
async fn running_tasks_cannot_be_removed() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let id = coordinator.add(sleeper("busy", 200).build()?).await?;
    coordinator.start_workers()?;
    with_timeout(async {
        while coordinator.snapshot(id).map(|s| s.state) != Some(TaskState::Running) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let err = coordinator.remove(id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState(_)));

    with_timeout(coordinator.wait_idle()).await?;
    assert_eq!(coordinator.snapshot(id).unwrap().state, TaskState::Succeeded);
    Ok(())
}

#[tokio::test]
async fn retry_reruns_a_failed_task_and_the_dependents_it_skipped() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(2))?;
    let (builder, calls) = flaky("fixable", 1);
    let root = builder.build()?;
    let leaf = noop("leaf").wait_for(root.id()).build()?;
    let (root_id, leaf_id) = (root.id(), leaf.id());
    coordinator.add_many(vec![root.into(), leaf.into()]).await?;

    coordinator.start_workers()?;
    with_timeout(coordinator.wait_idle()).await?;
    assert_eq!(coordinator.snapshot(root_id).unwrap().state, TaskState::Failed);
    assert_eq!(coordinator.snapshot(leaf_id).unwrap().state, TaskState::Skipped);

    let reset = coordinator.retry(root_id).await?;
    assert_eq!(reset, vec![root_id, leaf_id]);
    with_timeout(coordinator.wait_idle()).await?;

    let root = coordinator.snapshot(root_id).unwrap();
    assert_eq!(root.state, TaskState::Succeeded);
    assert_eq!(root.attempt_count, 1);
    assert!(root.error.is_none());
    assert_eq!(coordinator.snapshot(leaf_id).unwrap().state, TaskState::Succeeded);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let err = coordinator.retry(root_id).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidState(_)));
    Ok(())
}

#[tokio::test]
async fn polled_predicate_runs_the_task_once_it_turns_true() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let open = Arc::new(AtomicBool::new(false));
    let gate = Arc::clone(&open);
    let id = coordinator
        .add(
            noop("gated")
                .with_predicate(move || gate.load(Ordering::SeqCst))
                .with_predicate_polling(50, Duration::from_millis(10))
                .build()?,
        )
        .await?;
    coordinator.start_workers()?;

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(coordinator.snapshot(id).unwrap().state, TaskState::Pending);
    open.store(true, Ordering::SeqCst);

    with_timeout(coordinator.wait_idle()).await?;
    let snap = coordinator.snapshot(id).unwrap();
    assert_eq!(snap.state, TaskState::Succeeded);
    assert_eq!(snap.attempt_count, 1);
    Ok(())
}

#[tokio::test]
async fn polled_predicate_skips_after_its_last_poll() -> TestResult {
    init_tracing();

    let coordinator = Coordinator::new(fast_settings(1))?;
    let id = coordinator
        .add(
            noop("never")
                .with_predicate(|| false)
                .with_predicate_polling(3, Duration::from_millis(10))
                .build()?,
        )
        .await?;
    coordinator.start_workers()?;

    with_timeout(coordinator.wait_idle()).await?;
    let snap = coordinator.snapshot(id).unwrap();
    assert_eq!(snap.state, TaskState::Skipped);
    assert_eq!(snap.attempt_count, 0);
    Ok(())
}
