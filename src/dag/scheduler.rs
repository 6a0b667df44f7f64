// src/dag/scheduler.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dag::graph::{BatchNode, DependencyGraph};
use crate::dag::scheduler_step::{DelayedRetry, SchedulerStep};
use crate::dag::state_manager::{DependencyStatus, ReadOnlyStateManager, StateManager, Tracker};
use crate::dag::task_info::{GroupEntry, ScheduledTask, TaskEntry};
use crate::engine::TaskOutcome;
use crate::engine::retry::{RetryController, RetryDecision};
use crate::errors::{Result, SchedulerError, TaskExecutionError};
use crate::task::{CallbackKind, StatusCounts, TaskId, TaskSnapshot, TaskState, Unit};
use crate::types::DependencyFailurePolicy;

/// Scheduler holds the dependency graph plus all mutable task state.
///
/// It is responsible for:
/// - accepting batches of tasks and groups atomically
/// - deciding when a task is ready (dependencies satisfied, predicate true)
/// - handing ready tasks out in FIFO order
/// - recording completions and asking the retry controller what to do next
/// - resolving dependents of failed tasks
/// - removing units and re-running failed ones on request
///
/// It never touches threads or channels; every mutating call returns a
/// [`SchedulerStep`] describing what the caller has to do.
#[derive(Debug)]
pub struct Scheduler {
    graph: DependencyGraph,
    tasks: HashMap<TaskId, TaskEntry>,
    groups: HashMap<TaskId, GroupEntry>,
    /// Every unit in submission order.
    order: Vec<TaskId>,
    /// Ready tasks waiting for a free worker, oldest first.
    ready: VecDeque<TaskId>,
    next_index: u64,
    policy: DependencyFailurePolicy,
    retry: RetryController,
    tracker: Tracker,
    /// Snapshot of every unit, parallel to `order`. Only units marked dirty
    /// are rebuilt after a change.
    snapshots: Vec<Arc<TaskSnapshot>>,
    positions: HashMap<TaskId, usize>,
    /// Bumped whenever any snapshot changes.
    revision: u64,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DependencyFailurePolicy::default())
    }
}

impl Scheduler {
    pub fn new(policy: DependencyFailurePolicy) -> Self {
        Self {
            graph: DependencyGraph::new(),
            tasks: HashMap::new(),
            groups: HashMap::new(),
            order: Vec::new(),
            ready: VecDeque::new(),
            next_index: 0,
            policy,
            retry: RetryController,
            tracker: Tracker::default(),
            snapshots: Vec::new(),
            positions: HashMap::new(),
            revision: 0,
        }
    }

    pub fn policy(&self) -> DependencyFailurePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.graph.contains(id)
    }

    /// Changes whenever any unit's snapshot changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Add a batch of tasks and groups.
    ///
    /// Either the whole batch is accepted or nothing changes: a duplicate id,
    /// an unknown `waits_for` target, a child claimed by two groups or a cycle
    /// rejects the batch before any state is touched.
    pub fn submit(&mut self, units: Vec<Unit>) -> Result<SchedulerStep> {
        let batch: Vec<BatchNode> = units
            .iter()
            .map(|unit| match unit {
                Unit::Task(task) => BatchNode {
                    id: task.id,
                    label: task.label.clone(),
                    deps: task.dependencies.clone(),
                    children: Vec::new(),
                },
                Unit::Group(group) => BatchNode {
                    id: group.id,
                    label: group.label.clone(),
                    deps: Vec::new(),
                    children: group.children.clone(),
                },
            })
            .collect();

        self.graph.validate_batch(&batch)?;
        self.graph.insert_batch(batch);

        let mut added = Vec::with_capacity(units.len());
        for unit in units {
            let index = self.next_index;
            self.next_index += 1;

            let id = unit.id();
            debug!(unit = %id, label = unit.label(), index, "unit added");
            match unit {
                Unit::Task(task) => {
                    self.tasks.insert(id, TaskEntry::new(task, index));
                }
                Unit::Group(group) => {
                    // Adopted children now report a parent.
                    for child in &group.children {
                        self.tracker.mark(*child);
                    }
                    self.groups.insert(id, GroupEntry::new(group, index));
                }
            }
            self.order.push(id);
            added.push(id);
        }

        for id in &added {
            let view = ReadOnlyStateManager::new(&self.graph, &self.tasks, &self.groups);
            if let Some(snapshot) = view.snapshot_of(*id) {
                self.positions.insert(*id, self.snapshots.len());
                self.snapshots.push(Arc::new(snapshot));
            }
        }
        self.revision += 1;

        let mut step = SchedulerStep::default();
        self.settle(&added, &mut step);
        self.sync_snapshots();
        Ok(step)
    }

    /// Hand out up to `limit` ready tasks, oldest first, marking them
    /// `Running`, bumping their attempt count and giving each a fresh
    /// dispatch token.
    pub fn dispatch(&mut self, limit: usize) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        if limit == 0 {
            return step;
        }

        let mut dispatched = Vec::new();
        {
            let mut manager = StateManager::new(
                &self.graph,
                &mut self.tasks,
                &mut self.groups,
                &mut self.tracker,
            );

            while dispatched.len() < limit {
                let Some(id) = self.ready.pop_front() else {
                    break;
                };

                if !manager.transition(id, TaskState::Running) {
                    // Cancelled or removed while queued.
                    continue;
                }

                manager.begin_attempt(id, &mut step);
                dispatched.push(id);
            }
        }

        for id in &dispatched {
            if let Some(entry) = self.tasks.get(id) {
                info!(task = %id, label = %entry.task.label, attempt = entry.attempts, "dispatching task");
                step.newly_scheduled.push(ScheduledTask::from_entry(entry));
            }
        }

        let mut manager = StateManager::new(
            &self.graph,
            &mut self.tasks,
            &mut self.groups,
            &mut self.tracker,
        );
        manager.refresh_groups(&dispatched, &mut step);
        self.sync_snapshots();
        step
    }

    /// Record the end of one execution.
    ///
    /// Completions whose dispatch token does not match the task's current
    /// execution are discarded: late results after a cancel, a clear, a
    /// removal or a manual retry.
    pub fn complete(&mut self, id: TaskId, dispatch: u64, outcome: TaskOutcome) -> SchedulerStep {
        self.record_outcome(id, dispatch, outcome, true)
    }

    /// Like [`complete`](Self::complete), but a failure is final regardless
    /// of the retry policy. Used while the coordinator drains.
    pub fn complete_without_retry(
        &mut self,
        id: TaskId,
        dispatch: u64,
        outcome: TaskOutcome,
    ) -> SchedulerStep {
        self.record_outcome(id, dispatch, outcome, false)
    }

    fn record_outcome(
        &mut self,
        id: TaskId,
        dispatch: u64,
        outcome: TaskOutcome,
        allow_retry: bool,
    ) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(entry) = self.tasks.get(&id) else {
            debug!(task = %id, dispatch, "completion for unknown task; ignoring");
            return step;
        };

        if entry.state != TaskState::Running || entry.dispatch != dispatch {
            debug!(
                task = %id,
                state = %entry.state,
                current_dispatch = entry.dispatch,
                dispatch,
                "stale completion; discarding"
            );
            return step;
        }

        let attempt = entry.attempts;
        match outcome {
            TaskOutcome::Success => {
                info!(task = %id, label = %entry.task.label, attempt, "task succeeded");
                let mut manager = StateManager::new(
                    &self.graph,
                    &mut self.tasks,
                    &mut self.groups,
                    &mut self.tracker,
                );
                manager.transition(id, TaskState::Succeeded);
                manager.record_error(id, None);
                manager.notify(id, CallbackKind::Completed, &mut step);
                manager.notify(id, CallbackKind::Finished, &mut step);
                step.newly_terminal.push(id);
                self.settle(&[id], &mut step);
            }
            TaskOutcome::Failed(error) => {
                let decision = if allow_retry {
                    self.retry.decide(&entry.task.retry, attempt, &error)
                } else {
                    RetryDecision::GiveUp
                };
                let label = entry.task.label.clone();

                let mut manager = StateManager::new(
                    &self.graph,
                    &mut self.tasks,
                    &mut self.groups,
                    &mut self.tracker,
                );
                manager.transition(id, TaskState::Failed);
                manager.record_error(id, Some(error.clone()));

                match decision {
                    RetryDecision::Retry { delay } => {
                        info!(task = %id, label = %label, attempt, ?delay, %error, "task failed; retrying");
                        manager.transition(id, TaskState::Retrying);
                        if delay.is_zero() {
                            manager.transition(id, TaskState::Ready);
                            self.ready.push_back(id);
                            step.newly_ready.push(id);
                        } else {
                            step.delayed_retries.push(DelayedRetry {
                                task: id,
                                dispatch,
                                delay,
                            });
                        }
                    }
                    RetryDecision::GiveUp => {
                        warn!(task = %id, label = %label, attempt, %error, "task failed permanently");
                        manager.notify(id, CallbackKind::Failed, &mut step);
                        manager.notify(id, CallbackKind::Finished, &mut step);
                        step.newly_terminal.push(id);
                        self.settle(&[id], &mut step);
                    }
                }
            }
        }

        self.sync_snapshots();
        step
    }

    /// A delayed retry's timer fired: move the task back to `Ready`.
    pub fn retry_due(&mut self, id: TaskId, dispatch: u64) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let due = self
            .tasks
            .get(&id)
            .is_some_and(|e| e.state == TaskState::Retrying && e.dispatch == dispatch);
        if !due {
            debug!(task = %id, dispatch, "retry timer for task no longer retrying; ignoring");
            return step;
        }

        let mut manager = StateManager::new(
            &self.graph,
            &mut self.tasks,
            &mut self.groups,
            &mut self.tracker,
        );
        if manager.transition(id, TaskState::Ready) {
            self.ready.push_back(id);
            step.newly_ready.push(id);
        }
        self.sync_snapshots();
        step
    }

    /// A predicate timer fired: evaluate the task's predicate again.
    pub fn predicate_due(&mut self, id: TaskId, token: u64) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.tasks.get_mut(&id) {
            Some(entry)
                if entry.state == TaskState::Pending && entry.predicate_wait == Some(token) =>
            {
                entry.predicate_wait = None;
            }
            _ => {
                debug!(task = %id, token, "predicate timer no longer wanted; ignoring");
                return step;
            }
        }

        self.settle(&[id], &mut step);
        self.sync_snapshots();
        step
    }

    /// Store a progress report. Returns `false` if it was discarded.
    pub fn progress(&mut self, id: TaskId, dispatch: u64, value: f32) -> bool {
        match self.tasks.get_mut(&id) {
            Some(entry) if entry.state == TaskState::Running && entry.dispatch == dispatch => {
                entry.progress = Some(value.clamp(0.0, 100.0));
                self.tracker.mark(id);
                self.sync_snapshots();
                true
            }
            _ => false,
        }
    }

    /// Cancel every task that has not reached a terminal state.
    pub fn cancel_all(&mut self) -> SchedulerStep {
        self.cancel_where(true)
    }

    /// Cancel every unfinished task that is not currently executing.
    pub fn cancel_unstarted(&mut self) -> SchedulerStep {
        self.cancel_where(false)
    }

    fn cancel_where(&mut self, include_running: bool) -> SchedulerStep {
        let mut step = SchedulerStep::default();
        let mut cancelled = Vec::new();

        {
            let mut manager = StateManager::new(
                &self.graph,
                &mut self.tasks,
                &mut self.groups,
                &mut self.tracker,
            );
            for &id in &self.order {
                let cancellable = manager.view().task_state(id).is_some_and(|s| {
                    !s.is_terminal() && (include_running || s != TaskState::Running)
                });
                if cancellable && manager.transition(id, TaskState::Cancelled) {
                    manager.notify(id, CallbackKind::Finished, &mut step);
                    cancelled.push(id);
                }
            }
            manager.refresh_groups(&cancelled, &mut step);
        }

        if !cancelled.is_empty() {
            info!(count = cancelled.len(), include_running, "cancelled unfinished tasks");
        }
        self.ready.clear();
        step.newly_terminal.extend(cancelled);
        self.sync_snapshots();
        step
    }

    /// Cancel everything still live, then forget every unit.
    pub fn clear(&mut self) -> SchedulerStep {
        let step = self.cancel_all();

        self.graph.clear();
        self.tasks.clear();
        self.groups.clear();
        self.order.clear();
        self.ready.clear();
        self.snapshots.clear();
        self.positions.clear();
        self.tracker.take_dirty();
        self.revision += 1;
        info!("scheduler cleared");
        step
    }

    /// Remove a unit together with everything nested inside it and every
    /// unit that transitively waits for any of those.
    ///
    /// Refused while any of them is running. Removed ids may be submitted
    /// again later. Returns the removed ids, `id` first.
    pub fn remove(&mut self, id: TaskId) -> Result<(Vec<TaskId>, SchedulerStep)> {
        if !self.graph.contains(id) {
            return Err(SchedulerError::TaskNotFound(id));
        }

        let doomed = self.graph.removal_set(id);
        if let Some(running) = doomed
            .iter()
            .find(|d| self.tasks.get(*d).is_some_and(|e| e.state == TaskState::Running))
        {
            return Err(SchedulerError::InvalidState(format!(
                "cannot remove '{}': task '{}' is running",
                self.graph.label_of(id).unwrap_or_default(),
                self.graph.label_of(*running).unwrap_or_default()
            )));
        }

        let gone: HashSet<TaskId> = doomed.iter().copied().collect();
        let mut parents = Vec::new();
        for unit in &doomed {
            if let Some(parent) = self.graph.parent_of(*unit) {
                if !gone.contains(&parent) && !parents.contains(&parent) {
                    parents.push(parent);
                }
            }
        }

        self.graph.remove_units(&doomed);
        for unit in &doomed {
            self.tasks.remove(unit);
            self.groups.remove(unit);
        }
        for parent in &parents {
            if let Some(entry) = self.groups.get_mut(parent) {
                entry.group.children.retain(|c| !gone.contains(c));
            }
            self.tracker.mark(*parent);
            for ancestor in self.graph.ancestors_of(*parent) {
                self.tracker.mark(ancestor);
            }
        }

        self.order.retain(|u| !gone.contains(u));
        self.ready.retain(|u| !gone.contains(u));
        self.snapshots.retain(|s| !gone.contains(&s.id));
        self.positions = self
            .order
            .iter()
            .enumerate()
            .map(|(pos, unit)| (*unit, pos))
            .collect();
        self.revision += 1;

        info!(unit = %id, removed = doomed.len(), "removed units");

        let mut step = SchedulerStep::default();
        self.settle(&parents, &mut step);
        self.sync_snapshots();
        Ok((doomed, step))
    }

    /// Run a terminally failed task again with a fresh retry budget.
    ///
    /// Dependents that were skipped or failed because of it (directly or
    /// through an enclosing group) are reset as well, and enclosing groups
    /// deliver their terminal callbacks again once they finish. Returns the
    /// reset task ids, `id` first.
    pub fn retry(&mut self, id: TaskId) -> Result<(Vec<TaskId>, SchedulerStep)> {
        let Some(entry) = self.tasks.get(&id) else {
            if self.groups.contains_key(&id) {
                return Err(SchedulerError::InvalidState(format!(
                    "'{}' is a group; retry its failed tasks instead",
                    self.graph.label_of(id).unwrap_or_default()
                )));
            }
            return Err(SchedulerError::TaskNotFound(id));
        };

        if entry.state != TaskState::Failed {
            return Err(SchedulerError::InvalidState(format!(
                "task '{}' is {}; only failed tasks can be retried",
                entry.task.label, entry.state
            )));
        }

        let mut reset = vec![id];
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            let mut sources = vec![next];
            sources.extend(self.graph.ancestors_of(next));

            for source in sources {
                for dependent in self.graph.dependents_of(source) {
                    let blocked = self.tasks.get(dependent).is_some_and(|e| {
                        e.state.is_terminal()
                            && matches!(e.error, Some(TaskExecutionError::DependencyFailed(_)))
                    });
                    if blocked && seen.insert(*dependent) {
                        reset.push(*dependent);
                        queue.push_back(*dependent);
                    }
                }
            }
        }

        {
            let mut manager = StateManager::new(
                &self.graph,
                &mut self.tasks,
                &mut self.groups,
                &mut self.tracker,
            );
            for task in &reset {
                manager.reset(*task);
                for group in self.graph.ancestors_of(*task) {
                    manager.reopen_group(group);
                }
            }
        }
        info!(task = %id, reset = reset.len(), "retrying failed task");

        let mut step = SchedulerStep::default();
        self.settle(&reset, &mut step);
        self.sync_snapshots();
        Ok((reset, step))
    }

    pub fn state_of(&self, id: TaskId) -> Option<TaskState> {
        self.view().unit_state(id)
    }

    /// Ready tasks in dispatch order.
    pub fn ready_set(&self) -> Vec<TaskId> {
        self.ready
            .iter()
            .copied()
            .filter(|id| self.tasks.get(id).is_some_and(|e| e.state == TaskState::Ready))
            .collect()
    }

    /// Whether `id` can never run because a dependency failed.
    ///
    /// Returns `None` if the task is unknown.
    pub fn is_blocked(&self, id: TaskId) -> Option<bool> {
        if !self.tasks.contains_key(&id) {
            return None;
        }
        Some(matches!(
            self.view().dependency_status(id),
            DependencyStatus::Blocked(_)
        ))
    }

    /// Whether every `waits_for` target of `id` is success-compatible.
    ///
    /// Returns `None` if the task is unknown.
    pub fn deps_satisfied(&self, id: TaskId) -> Option<bool> {
        if !self.tasks.contains_key(&id) {
            return None;
        }
        Some(self.view().dependency_status(id) == DependencyStatus::Satisfied)
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.view().snapshot_of(id)
    }

    /// Snapshots of every unit, in submission order. Unchanged units share
    /// their allocation with earlier calls.
    pub fn snapshot_all(&self) -> Vec<Arc<TaskSnapshot>> {
        self.snapshots.clone()
    }

    /// Tasks still waiting on dependencies. Tasks waiting for a predicate
    /// timer are not stuck and are left out.
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                self.tasks.get(id).is_some_and(|e| {
                    e.state == TaskState::Pending && e.predicate_wait.is_none()
                })
            })
            .collect()
    }

    /// Number of tasks (groups excluded) in each state.
    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for entry in self.tasks.values() {
            counts.record(entry.state);
        }
        counts
    }

    /// Whether any task has not reached a terminal state.
    pub fn has_unfinished(&self) -> bool {
        self.tasks.values().any(|e| !e.state.is_terminal())
    }

    /// Delay the retry controller would choose for the next retry of `id`.
    pub fn next_retry_delay(&self, id: TaskId) -> Option<Duration> {
        let entry = self.tasks.get(&id)?;
        Some(entry.task.retry.delay().delay_for(entry.attempts.saturating_sub(1)))
    }

    fn view(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(&self.graph, &self.tasks, &self.groups)
    }

    /// Propagate the consequences of `touched` units changing state: resolve
    /// the pending tasks they affect, queue newly ready ones and deliver
    /// group notifications.
    fn settle(&mut self, touched: &[TaskId], step: &mut SchedulerStep) {
        let first_ready = step.newly_ready.len();
        let first_terminal = step.newly_terminal.len();

        let mut manager = StateManager::new(
            &self.graph,
            &mut self.tasks,
            &mut self.groups,
            &mut self.tracker,
        );
        manager.refresh_groups(touched, step);
        manager.evaluate_pending(touched, self.policy, step);

        let resolved: Vec<TaskId> = step.newly_terminal[first_terminal..].to_vec();
        manager.refresh_groups(&resolved, step);

        self.ready.extend(step.newly_ready[first_ready..].iter().copied());
    }

    /// Rebuild the snapshots of units changed since the last call.
    fn sync_snapshots(&mut self) {
        let dirty = self.tracker.take_dirty();
        if dirty.is_empty() {
            return;
        }

        let view = ReadOnlyStateManager::new(&self.graph, &self.tasks, &self.groups);
        let mut seen = HashSet::with_capacity(dirty.len());
        for id in dirty {
            if !seen.insert(id) {
                continue;
            }
            if let (Some(&pos), Some(snapshot)) = (self.positions.get(&id), view.snapshot_of(id)) {
                self.snapshots[pos] = Arc::new(snapshot);
            }
        }
        self.revision += 1;
    }
}
