// src/dag/state_manager.rs

//! State transitions, readiness evaluation and group aggregation.

use std::collections::{BTreeMap, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, info, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::scheduler_step::{DelayedPredicate, Notification, SchedulerStep};
use crate::dag::task_info::{GroupEntry, TaskEntry};
use crate::errors::TaskExecutionError;
use crate::task::{CallbackKind, TaskId, TaskSnapshot, TaskState};
use crate::types::{DependencyFailurePolicy, UnitKind};

/// Result of checking a task's `waits_for` targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    /// Every target is `Succeeded` or `Skipped`.
    Satisfied,
    /// At least one target has not finished yet.
    Waiting,
    /// This target ended `Failed` or `Cancelled`; the task can never run.
    Blocked(TaskId),
}

/// Read-only view used for dependency checks, aggregation and snapshots.
pub(crate) struct ReadOnlyStateManager<'a> {
    graph: &'a DependencyGraph,
    tasks: &'a HashMap<TaskId, TaskEntry>,
    groups: &'a HashMap<TaskId, GroupEntry>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        tasks: &'a HashMap<TaskId, TaskEntry>,
        groups: &'a HashMap<TaskId, GroupEntry>,
    ) -> Self {
        Self {
            graph,
            tasks,
            groups,
        }
    }

    /// Current state of a task, or the derived state of a group.
    pub fn unit_state(&self, id: TaskId) -> Option<TaskState> {
        if let Some(entry) = self.tasks.get(&id) {
            return Some(entry.state);
        }
        if self.groups.contains_key(&id) {
            return Some(self.group_state(id));
        }
        None
    }

    /// Aggregate state of a group, computed from its children.
    ///
    /// - no children: `Succeeded`
    /// - all children terminal: `Skipped` if all skipped, `Succeeded` if all
    ///   success-compatible, `Failed` if any failed, otherwise `Cancelled`
    /// - otherwise `Running` once any child has left `Pending`, else `Pending`
    pub fn group_state(&self, id: TaskId) -> TaskState {
        let states: Vec<TaskState> = self
            .graph
            .children_of(id)
            .iter()
            .map(|c| self.unit_state(*c).unwrap_or(TaskState::Pending))
            .collect();

        if states.is_empty() {
            return TaskState::Succeeded;
        }

        if states.iter().all(|s| s.is_terminal()) {
            if states.iter().all(|s| *s == TaskState::Skipped) {
                TaskState::Skipped
            } else if states.iter().all(|s| s.is_success_compatible()) {
                TaskState::Succeeded
            } else if states.contains(&TaskState::Failed) {
                TaskState::Failed
            } else {
                TaskState::Cancelled
            }
        } else if states.iter().any(|s| *s != TaskState::Pending) {
            TaskState::Running
        } else {
            TaskState::Pending
        }
    }

    /// Whether any task below this group has been dispatched at least once.
    pub fn group_started(&self, id: TaskId) -> bool {
        self.graph.children_of(id).iter().any(|child| {
            match self.tasks.get(child) {
                Some(entry) => entry.attempts > 0,
                None => self.groups.contains_key(child) && self.group_started(*child),
            }
        })
    }

    /// Canonical dependency satisfaction check.
    ///
    /// A hard failure wins over waiting: there is no point in waiting for the
    /// rest once one target can never succeed.
    pub fn dependency_status(&self, id: TaskId) -> DependencyStatus {
        let mut waiting = false;

        for dep in self.graph.dependencies_of(id) {
            match self.unit_state(*dep) {
                Some(state) if state.is_success_compatible() => {
                    if let Some(root) = self.skipped_by_failure(*dep) {
                        return DependencyStatus::Blocked(root);
                    }
                }
                Some(state) if state.is_hard_failure() => {
                    return DependencyStatus::Blocked(*dep);
                }
                Some(_) => waiting = true,
                None => {
                    warn!(task = %id, dep = %dep, "dependency missing from scheduler tables");
                    waiting = true;
                }
            }
        }

        if waiting {
            DependencyStatus::Waiting
        } else {
            DependencyStatus::Satisfied
        }
    }

    /// The failed unit that caused `id` (or something inside it) to be
    /// skipped, if any. Predicate skips return `None`.
    fn skipped_by_failure(&self, id: TaskId) -> Option<TaskId> {
        if let Some(entry) = self.tasks.get(&id) {
            return match (&entry.state, &entry.error) {
                (TaskState::Skipped, Some(TaskExecutionError::DependencyFailed(root))) => {
                    Some(*root)
                }
                _ => None,
            };
        }

        self.graph
            .children_of(id)
            .iter()
            .find_map(|child| self.skipped_by_failure(*child))
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.tasks.get(&id).map(|e| e.state)
    }

    pub fn snapshot_of(&self, id: TaskId) -> Option<TaskSnapshot> {
        if let Some(entry) = self.tasks.get(&id) {
            let task = &entry.task;
            return Some(TaskSnapshot {
                id,
                index: entry.index,
                kind: UnitKind::Task,
                label: task.label.clone(),
                comment: task.comment.clone(),
                color: task.color,
                state: entry.state,
                attempt_count: entry.attempts,
                max_retries: task.retry.max_retries(),
                progress: entry.progress,
                error: entry.error.clone(),
                parent: self.graph.parent_of(id),
                dependencies: task.dependencies.clone(),
                children: Vec::new(),
                history: entry.history.clone(),
                data: task.data.clone(),
            });
        }

        let entry = self.groups.get(&id)?;
        let group = &entry.group;
        Some(TaskSnapshot {
            id,
            index: entry.index,
            kind: UnitKind::Group,
            label: group.label.clone(),
            comment: group.comment.clone(),
            color: group.color,
            state: self.group_state(id),
            attempt_count: 0,
            max_retries: 0,
            progress: None,
            error: None,
            parent: self.graph.parent_of(id),
            dependencies: Vec::new(),
            children: group.children.clone(),
            history: Vec::new(),
            data: group.data.clone(),
        })
    }
}

/// Bookkeeping shared by every [`StateManager`] over the same tables.
#[derive(Debug, Default)]
pub(crate) struct Tracker {
    /// Units whose snapshot may be out of date.
    dirty: Vec<TaskId>,
    next_token: u64,
}

impl Tracker {
    /// Next value of a counter that never repeats, not even across clears.
    pub fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    pub fn mark(&mut self, id: TaskId) {
        self.dirty.push(id);
    }

    pub fn take_dirty(&mut self) -> Vec<TaskId> {
        std::mem::take(&mut self.dirty)
    }
}

/// Mutating counterpart; the only code that changes task state.
pub(crate) struct StateManager<'a> {
    graph: &'a DependencyGraph,
    tasks: &'a mut HashMap<TaskId, TaskEntry>,
    groups: &'a mut HashMap<TaskId, GroupEntry>,
    tracker: &'a mut Tracker,
}

impl<'a> StateManager<'a> {
    pub fn new(
        graph: &'a DependencyGraph,
        tasks: &'a mut HashMap<TaskId, TaskEntry>,
        groups: &'a mut HashMap<TaskId, GroupEntry>,
        tracker: &'a mut Tracker,
    ) -> Self {
        Self {
            graph,
            tasks,
            groups,
            tracker,
        }
    }

    pub fn view(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(self.graph, self.tasks, self.groups)
    }

    /// Mark a unit and every group whose derived state depends on it.
    fn touch(&mut self, id: TaskId) {
        self.tracker.mark(id);
        for group in self.graph.ancestors_of(id) {
            self.tracker.mark(group);
        }
    }

    /// Apply one edge of the state machine. Invalid edges are refused.
    pub fn transition(&mut self, id: TaskId, next: TaskState) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            warn!(task = %id, ?next, "transition for unknown task; ignoring");
            return false;
        };

        if !entry.state.can_transition_to(next) {
            warn!(
                task = %id,
                label = %entry.task.label,
                from = %entry.state,
                to = %next,
                "refusing invalid state transition"
            );
            return false;
        }

        debug!(task = %id, label = %entry.task.label, from = %entry.state, to = %next, "state transition");
        entry.state = next;
        entry.history.push(next);
        self.touch(id);
        true
    }

    pub fn record_error(&mut self, id: TaskId, error: Option<TaskExecutionError>) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.error = error;
            self.tracker.mark(id);
        }
    }

    /// Count a new execution attempt for a task just moved to `Running`,
    /// give it a fresh dispatch token and report `on_start` if this is its
    /// first dispatch.
    pub fn begin_attempt(&mut self, id: TaskId, step: &mut SchedulerStep) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.attempts += 1;
            entry.progress = None;
            entry.dispatch = self.tracker.token();
            self.tracker.mark(id);
        }
        self.notify(id, CallbackKind::Start, step);
    }

    /// Put a finished task back to `Pending` with a clean slate.
    pub fn reset(&mut self, id: TaskId) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            debug!(task = %id, label = %entry.task.label, from = %entry.state, "resetting task");
            entry.reset();
            self.touch(id);
        }
    }

    /// Let a group deliver its terminal callbacks again once it finishes.
    pub fn reopen_group(&mut self, id: TaskId) {
        if let Some(entry) = self.groups.get_mut(&id) {
            for kind in [CallbackKind::Completed, CallbackKind::Failed, CallbackKind::Finished] {
                entry.fired.remove(&kind);
            }
        }
    }

    /// Queue a callback notification unless that kind already fired.
    pub fn notify(&mut self, id: TaskId, kind: CallbackKind, step: &mut SchedulerStep) {
        let (first_time, callback) = if let Some(entry) = self.tasks.get_mut(&id) {
            (entry.fired.insert(kind), entry.task.callbacks.get(kind))
        } else if let Some(entry) = self.groups.get_mut(&id) {
            (entry.fired.insert(kind), entry.group.callbacks.get(kind))
        } else {
            return;
        };

        if !first_time {
            return;
        }

        if let Some(snapshot) = self.view().snapshot_of(id) {
            step.notifications.push(Notification {
                kind,
                snapshot,
                callback,
            });
        }
    }

    /// Resolve the `Pending` tasks that `seeds` can affect: the seeds
    /// themselves and, transitively, the dependents of every unit that
    /// reaches a terminal state along the way (including dependents of the
    /// groups enclosing it).
    ///
    /// Candidates are visited in submission order. Tasks that become `Ready`
    /// are reported in `step.newly_ready`; the caller owns the ready queue.
    pub fn evaluate_pending(
        &mut self,
        seeds: &[TaskId],
        policy: DependencyFailurePolicy,
        step: &mut SchedulerStep,
    ) {
        let mut queue = BTreeMap::new();
        for &seed in seeds {
            self.enqueue_if_pending(seed, &mut queue);
            self.enqueue_affected(seed, &mut queue);
        }

        while let Some((_, id)) = queue.pop_first() {
            let waiting_on_timer = match self.tasks.get(&id) {
                Some(entry) if entry.state == TaskState::Pending => entry.predicate_wait.is_some(),
                _ => continue,
            };

            match self.view().dependency_status(id) {
                DependencyStatus::Waiting => {}
                DependencyStatus::Blocked(dep) => {
                    self.resolve_blocked(id, dep, policy, step);
                    self.enqueue_affected(id, &mut queue);
                }
                DependencyStatus::Satisfied if waiting_on_timer => {}
                DependencyStatus::Satisfied => {
                    if self.predicate_allows(id) {
                        self.transition(id, TaskState::Ready);
                        step.newly_ready.push(id);
                    } else if self.poll_predicate_later(id, step) {
                        info!(task = %id, "predicate returned false; evaluating again later");
                    } else {
                        info!(task = %id, "predicate returned false; skipping task");
                        self.transition(id, TaskState::Skipped);
                        step.newly_terminal.push(id);
                        self.notify(id, CallbackKind::Finished, step);
                        self.enqueue_affected(id, &mut queue);
                    }
                }
            }
        }
    }

    fn enqueue_if_pending(&self, id: TaskId, queue: &mut BTreeMap<u64, TaskId>) {
        if let Some(entry) = self.tasks.get(&id) {
            if entry.state == TaskState::Pending {
                queue.insert(entry.index, id);
            }
        }
    }

    fn enqueue_affected(&self, id: TaskId, queue: &mut BTreeMap<u64, TaskId>) {
        let mut sources = vec![id];
        sources.extend(self.graph.ancestors_of(id));

        for source in sources {
            for dependent in self.graph.dependents_of(source) {
                self.enqueue_if_pending(*dependent, queue);
            }
        }
    }

    fn resolve_blocked(
        &mut self,
        id: TaskId,
        dep: TaskId,
        policy: DependencyFailurePolicy,
        step: &mut SchedulerStep,
    ) {
        match policy {
            DependencyFailurePolicy::Skip => {
                info!(task = %id, dep = %dep, "dependency failed; skipping dependent");
                if self.transition(id, TaskState::Skipped) {
                    self.record_error(id, Some(TaskExecutionError::DependencyFailed(dep)));
                }
                step.newly_terminal.push(id);
                self.notify(id, CallbackKind::Finished, step);
            }
            DependencyFailurePolicy::Fail => {
                warn!(task = %id, dep = %dep, "dependency failed; failing dependent");
                if self.transition(id, TaskState::Failed) {
                    self.record_error(id, Some(TaskExecutionError::DependencyFailed(dep)));
                }
                step.newly_terminal.push(id);
                self.notify(id, CallbackKind::Failed, step);
                self.notify(id, CallbackKind::Finished, step);
            }
        }
    }

    fn predicate_allows(&self, id: TaskId) -> bool {
        let Some(predicate) = self.tasks.get(&id).and_then(|e| e.task.predicate.clone()) else {
            return true;
        };

        match catch_unwind(AssertUnwindSafe(|| predicate())) {
            Ok(allowed) => allowed,
            Err(_) => {
                warn!(task = %id, "predicate panicked; treating as false");
                false
            }
        }
    }

    /// Spend one predicate re-evaluation, if any are left, and ask the shell
    /// for a timer. The task stays `Pending` until the timer fires.
    fn poll_predicate_later(&mut self, id: TaskId, step: &mut SchedulerStep) -> bool {
        let Some(entry) = self.tasks.get_mut(&id) else {
            return false;
        };
        let Some(poll) = entry.task.predicate_poll else {
            return false;
        };
        if entry.predicate_polls_left == 0 {
            return false;
        }

        let token = self.tracker.token();
        entry.predicate_polls_left -= 1;
        entry.predicate_wait = Some(token);
        step.delayed_predicates.push(DelayedPredicate {
            task: id,
            token,
            delay: poll.interval,
        });
        true
    }

    /// Deliver group lifecycle notifications for every group enclosing (or
    /// equal to) the touched units, innermost first.
    pub fn refresh_groups(&mut self, touched: &[TaskId], step: &mut SchedulerStep) {
        for &id in touched {
            let mut chain = Vec::new();
            if self.groups.contains_key(&id) {
                chain.push(id);
            }
            chain.extend(self.graph.ancestors_of(id));

            for group in chain {
                let (state, started) = {
                    let view = self.view();
                    (view.group_state(group), view.group_started(group))
                };

                if started {
                    self.notify(group, CallbackKind::Start, step);
                }

                if state.is_terminal() {
                    match state {
                        TaskState::Succeeded => self.notify(group, CallbackKind::Completed, step),
                        TaskState::Failed => self.notify(group, CallbackKind::Failed, step),
                        _ => {}
                    }
                    self.notify(group, CallbackKind::Finished, step);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::graph::BatchNode;
    use crate::task::{Task, TaskBuilder};

    fn task(label: &str, deps: &[TaskId]) -> Task {
        TaskBuilder::new(label)
            .with_body(|_| Ok(()))
            .wait_for_all(deps.iter().copied())
            .build()
            .unwrap()
    }

    fn tables(tasks: &[Task]) -> (DependencyGraph, HashMap<TaskId, TaskEntry>) {
        let batch: Vec<BatchNode> = tasks
            .iter()
            .map(|t| BatchNode {
                id: t.id(),
                label: t.label().to_string(),
                deps: t.dependencies().to_vec(),
                children: Vec::new(),
            })
            .collect();
        let mut graph = DependencyGraph::new();
        graph.validate_batch(&batch).unwrap();
        graph.insert_batch(batch);

        let entries = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id(), TaskEntry::new(t.clone(), i as u64)))
            .collect();
        (graph, entries)
    }

    #[test]
    fn evaluation_only_visits_seeds_and_their_dependents() {
        let a = task("a", &[]);
        let b = task("b", &[a.id()]);
        let unrelated = task("unrelated", &[]);
        let (ia, ib, iu) = (a.id(), b.id(), unrelated.id());
        let (graph, mut tasks) = tables(&[a, b, unrelated]);
        let mut groups = HashMap::new();
        let mut tracker = Tracker::default();
        let mut step = SchedulerStep::default();

        let mut manager = StateManager::new(&graph, &mut tasks, &mut groups, &mut tracker);
        manager.evaluate_pending(&[ia], DependencyFailurePolicy::Skip, &mut step);

        assert_eq!(step.newly_ready, vec![ia]);
        assert_eq!(manager.view().task_state(ib), Some(TaskState::Pending));
        assert_eq!(manager.view().task_state(iu), Some(TaskState::Pending));
    }

    #[test]
    fn skips_cascade_through_the_worklist_in_submission_order() {
        let a = task("a", &[]);
        let b = task("b", &[a.id()]);
        let c = task("c", &[b.id()]);
        let d = task("d", &[a.id()]);
        let (ia, ib, ic, id) = (a.id(), b.id(), c.id(), d.id());
        let (graph, mut tasks) = tables(&[a, b, c, d]);
        let mut groups = HashMap::new();
        let mut tracker = Tracker::default();
        let mut step = SchedulerStep::default();

        let mut manager = StateManager::new(&graph, &mut tasks, &mut groups, &mut tracker);
        manager.transition(ia, TaskState::Ready);
        manager.transition(ia, TaskState::Running);
        manager.transition(ia, TaskState::Failed);
        manager.evaluate_pending(&[ia], DependencyFailurePolicy::Skip, &mut step);

        assert_eq!(step.newly_terminal, vec![ib, ic, id]);
        assert!(tracker.take_dirty().contains(&ic));
    }
}
