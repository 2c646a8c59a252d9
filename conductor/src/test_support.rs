//! In-memory collaborators and fixtures for tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Result, anyhow};

use crate::core::types::{Action, ActionStatus, Goal, GoalStatus, WorkItem};
use crate::io::action_store::ActionStore;
use crate::io::goal_store::{GoalStore, StoreError};
use crate::io::inbox::{NotificationBundle, NotificationChannel};
use crate::io::proc_table::{Delivery, ProcessTable, ReapOutcome, SpawnRequest};
use crate::io::reactor::{Doorbell, Signal, SignalId};
use crate::io::session::{Role, Session, Turn};
use crate::io::signals::ShutdownToken;
use crate::io::work_queue::WorkQueue;
use crate::io::workers::{
    ApprovalDecision, ApprovalPolicy, ApprovalRequest, WorkerPool, WorkerStatus, WorkerView,
};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A goal with deterministic defaults and no supervisor.
pub fn goal(id: &str, status: GoalStatus) -> Goal {
    Goal {
        id: id.to_string(),
        name: format!("{id} name"),
        description: Some(format!("{id} description")),
        goal_state: None,
        world_state: None,
        status,
        queue_name: id.to_string(),
        supervisor_pid: 0,
        supervisor_started_at: 0,
    }
}

/// A primitive action with deterministic defaults and no work item.
pub fn action(id: &str, goal_id: &str, status: ActionStatus) -> Action {
    Action {
        id: id.to_string(),
        goal_id: goal_id.to_string(),
        parent_action_id: None,
        description: format!("{id} description"),
        preconditions: None,
        effects: None,
        is_compound: false,
        role: "implementer".to_string(),
        status,
        result: None,
        work_item_id: None,
    }
}

#[derive(Debug, Default)]
pub struct MemoryGoalStore {
    goals: Mutex<BTreeMap<String, Goal>>,
    fail_supervisor_updates: Mutex<bool>,
}

impl MemoryGoalStore {
    pub fn with_goals(goals: impl IntoIterator<Item = Goal>) -> Self {
        let store = Self::default();
        {
            let mut map = locked(&store.goals);
            for goal in goals {
                map.insert(goal.id.clone(), goal);
            }
        }
        store
    }

    /// Current record of `goal_id`. Panics if it does not exist.
    pub fn goal(&self, goal_id: &str) -> Goal {
        locked(&self.goals)
            .get(goal_id)
            .cloned()
            .unwrap_or_else(|| panic!("goal {goal_id} not in store"))
    }

    pub fn snapshot(&self) -> Vec<Goal> {
        locked(&self.goals).values().cloned().collect()
    }

    pub fn fail_supervisor_updates(&self, fail: bool) {
        *locked(&self.fail_supervisor_updates) = fail;
    }

    pub fn set_world_state(&self, goal_id: &str, world_state: &str) {
        if let Some(goal) = locked(&self.goals).get_mut(goal_id) {
            goal.world_state = Some(world_state.to_string());
        }
    }

    fn modify(&self, goal_id: &str, apply: impl FnOnce(&mut Goal)) -> Result<()> {
        let mut goals = locked(&self.goals);
        let goal = goals
            .get_mut(goal_id)
            .ok_or_else(|| StoreError::GoalNotFound(goal_id.to_string()))?;
        apply(goal);
        Ok(())
    }
}

impl GoalStore for MemoryGoalStore {
    fn get(&self, goal_id: &str) -> Result<Goal> {
        let goal = locked(&self.goals)
            .get(goal_id)
            .cloned()
            .ok_or_else(|| StoreError::GoalNotFound(goal_id.to_string()))?;
        Ok(goal)
    }

    fn list_all(&self) -> Result<Vec<Goal>> {
        Ok(self.snapshot())
    }

    fn list_by_status(&self, status: GoalStatus) -> Result<Vec<Goal>> {
        Ok(self
            .snapshot()
            .into_iter()
            .filter(|goal| goal.status == status)
            .collect())
    }

    fn update_status(&self, goal_id: &str, status: GoalStatus) -> Result<()> {
        self.modify(goal_id, |goal| goal.status = status)
    }

    fn update_supervisor(&self, goal_id: &str, pid: i32, started_at: i64) -> Result<()> {
        if *locked(&self.fail_supervisor_updates) {
            return Err(anyhow!("goal store unavailable"));
        }
        self.modify(goal_id, |goal| {
            goal.supervisor_pid = pid;
            goal.supervisor_started_at = started_at;
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryActionStore {
    actions: Mutex<BTreeMap<String, Action>>,
}

impl MemoryActionStore {
    pub fn with_actions(actions: impl IntoIterator<Item = Action>) -> Self {
        let store = Self::default();
        {
            let mut map = locked(&store.actions);
            for action in actions {
                map.insert(action.id.clone(), action);
            }
        }
        store
    }

    /// Current record of `action_id`. Panics if it does not exist.
    pub fn action(&self, action_id: &str) -> Action {
        locked(&self.actions)
            .get(action_id)
            .cloned()
            .unwrap_or_else(|| panic!("action {action_id} not in store"))
    }
}

impl ActionStore for MemoryActionStore {
    fn list_by_goal(&self, goal_id: &str) -> Result<Vec<Action>> {
        Ok(locked(&self.actions)
            .values()
            .filter(|action| action.goal_id == goal_id)
            .cloned()
            .collect())
    }

    fn list_running(&self, goal_id: &str) -> Result<Vec<Action>> {
        Ok(self
            .list_by_goal(goal_id)?
            .into_iter()
            .filter(|action| action.status == ActionStatus::Running)
            .collect())
    }

    fn update_status(
        &self,
        action_id: &str,
        status: ActionStatus,
        result: Option<&str>,
    ) -> Result<()> {
        let mut actions = locked(&self.actions);
        let action = actions
            .get_mut(action_id)
            .ok_or_else(|| StoreError::ActionNotFound(action_id.to_string()))?;
        action.status = status;
        action.result = result.map(str::to_string);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryWorkQueue {
    items: Mutex<HashMap<(String, String), WorkItem>>,
    fail_lookups: Mutex<bool>,
}

impl MemoryWorkQueue {
    pub fn with_items(queue_name: &str, items: impl IntoIterator<Item = WorkItem>) -> Self {
        let queue = Self::default();
        {
            let mut map = locked(&queue.items);
            for item in items {
                map.insert((queue_name.to_string(), item.id.clone()), item);
            }
        }
        queue
    }

    pub fn fail_lookups(&self, fail: bool) {
        *locked(&self.fail_lookups) = fail;
    }
}

impl WorkQueue for MemoryWorkQueue {
    fn get_item(&self, queue_name: &str, item_id: &str) -> Result<Option<WorkItem>> {
        if *locked(&self.fail_lookups) {
            return Err(anyhow!("work queue unavailable"));
        }
        Ok(locked(&self.items)
            .get(&(queue_name.to_string(), item_id.to_string()))
            .cloned())
    }
}

#[derive(Debug, Default)]
struct FakeProcesses {
    next_pid: i32,
    /// Processes that exist (including exited children not yet reaped).
    alive: HashSet<i32>,
    /// Children of ours, mapped to their exit code once they have exited.
    children: HashMap<i32, Option<i32>>,
    ignore_sigterm: HashSet<i32>,
    fail_all_spawns: bool,
    fail_goals: HashSet<String>,
    spawned: Vec<(i32, SpawnRequest)>,
    terminated: Vec<i32>,
    force_killed: Vec<i32>,
    waited: Vec<i32>,
}

/// Scripted process table. Spawned pids start at 10000.
#[derive(Debug, Default)]
pub struct FakeProcessTable {
    state: Mutex<FakeProcesses>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        let table = Self::default();
        locked(&table.state).next_pid = 10_000;
        table
    }

    /// A live process that is not our child.
    pub fn add_live(&self, pid: i32) {
        locked(&self.state).alive.insert(pid);
    }

    /// A child of ours that has exited with `code` and awaits reaping.
    pub fn add_exited(&self, pid: i32, code: i32) {
        let mut state = locked(&self.state);
        state.alive.insert(pid);
        state.children.insert(pid, Some(code));
    }

    pub fn ignore_sigterm(&self, pid: i32) {
        locked(&self.state).ignore_sigterm.insert(pid);
    }

    pub fn fail_spawns(&self, fail: bool) {
        locked(&self.state).fail_all_spawns = fail;
    }

    /// Fail spawns whose arguments name `goal_id`.
    pub fn fail_spawn_for(&self, goal_id: &str) {
        locked(&self.state).fail_goals.insert(goal_id.to_string());
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        locked(&self.state)
            .spawned
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn spawned_pids(&self) -> Vec<i32> {
        locked(&self.state).spawned.iter().map(|(pid, _)| *pid).collect()
    }

    pub fn terminated(&self) -> Vec<i32> {
        locked(&self.state).terminated.clone()
    }

    pub fn force_killed(&self) -> Vec<i32> {
        locked(&self.state).force_killed.clone()
    }

    pub fn waited(&self) -> Vec<i32> {
        locked(&self.state).waited.clone()
    }
}

impl FakeProcesses {
    fn exit(&mut self, pid: i32, code: i32) {
        match self.children.get_mut(&pid) {
            // Children linger as zombies until reaped.
            Some(status) => *status = Some(code),
            None => {
                self.alive.remove(&pid);
            }
        }
    }
}

impl ProcessTable for FakeProcessTable {
    fn spawn_detached(&self, request: &SpawnRequest) -> Result<i32> {
        let mut state = locked(&self.state);
        let named_goal_fails = request
            .args
            .iter()
            .any(|arg| state.fail_goals.contains(arg));
        if state.fail_all_spawns || named_goal_fails {
            return Err(anyhow!("spawn {}: scripted failure", request.program.display()));
        }
        let pid = state.next_pid;
        state.next_pid += 1;
        state.alive.insert(pid);
        state.children.insert(pid, None);
        state.spawned.push((pid, request.clone()));
        Ok(pid)
    }

    fn is_alive(&self, pid: i32) -> bool {
        pid > 0 && locked(&self.state).alive.contains(&pid)
    }

    fn try_reap(&self, pid: i32) -> Result<ReapOutcome> {
        let mut state = locked(&self.state);
        match state.children.get(&pid).copied() {
            Some(None) => Ok(ReapOutcome::StillRunning),
            Some(Some(code)) => {
                state.children.remove(&pid);
                state.alive.remove(&pid);
                Ok(ReapOutcome::Exited {
                    code: Some(code),
                    signal: None,
                })
            }
            None => Ok(ReapOutcome::NotAChild),
        }
    }

    fn reap_exited(&self) -> Result<Vec<i32>> {
        let mut state = locked(&self.state);
        let mut exited: Vec<i32> = state
            .children
            .iter()
            .filter(|(_, status)| status.is_some())
            .map(|(pid, _)| *pid)
            .collect();
        exited.sort_unstable();
        for pid in &exited {
            state.children.remove(pid);
            state.alive.remove(pid);
        }
        Ok(exited)
    }

    fn terminate(&self, pid: i32) -> Result<Delivery> {
        let mut state = locked(&self.state);
        if !state.alive.contains(&pid) {
            return Ok(Delivery::NoSuchProcess);
        }
        state.terminated.push(pid);
        if !state.ignore_sigterm.contains(&pid) {
            state.exit(pid, 143);
        }
        Ok(Delivery::Delivered)
    }

    fn force_kill(&self, pid: i32) -> Result<Delivery> {
        let mut state = locked(&self.state);
        if !state.alive.contains(&pid) {
            return Ok(Delivery::NoSuchProcess);
        }
        state.force_killed.push(pid);
        state.exit(pid, 137);
        Ok(Delivery::Delivered)
    }

    fn wait_exit(&self, pid: i32) -> Result<()> {
        let mut state = locked(&self.state);
        state.waited.push(pid);
        if matches!(state.children.get(&pid), Some(None)) {
            return Err(anyhow!("process {pid} still running"));
        }
        state.children.remove(&pid);
        state.alive.remove(&pid);
        Ok(())
    }
}

/// Session that records turns instead of running an agent.
#[derive(Default)]
pub struct ScriptedSession<'a> {
    turns: Vec<Turn>,
    continues: usize,
    fail_messages: bool,
    on_continue: Option<Box<dyn FnMut() + 'a>>,
}

impl<'a> ScriptedSession<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `process_message` fail.
    pub fn fail_messages(&mut self, fail: bool) {
        self.fail_messages = fail;
    }

    /// Run `hook` on every `continue_turn`, standing in for the agent's
    /// side effects.
    pub fn on_continue(&mut self, hook: impl FnMut() + 'a) {
        self.on_continue = Some(Box::new(hook));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn continues(&self) -> usize {
        self.continues
    }
}

impl Session for ScriptedSession<'_> {
    fn process_message(&mut self, text: &str) -> Result<()> {
        if self.fail_messages {
            return Err(anyhow!("session unavailable"));
        }
        self.turns.push(Turn {
            role: Role::User,
            text: text.to_string(),
        });
        Ok(())
    }

    fn append_system_message(&mut self, text: &str) -> Result<()> {
        self.turns.push(Turn {
            role: Role::System,
            text: text.to_string(),
        });
        Ok(())
    }

    fn continue_turn(&mut self) -> Result<()> {
        self.continues += 1;
        if let Some(hook) = self.on_continue.as_mut() {
            hook();
        }
        Ok(())
    }
}

/// Notification channel serving scripted bundles; fails once exhausted.
pub struct ScriptedChannel {
    signal: Signal,
    bundles: VecDeque<std::result::Result<NotificationBundle, String>>,
    fetches: usize,
}

impl ScriptedChannel {
    pub fn new(doorbell: &Doorbell) -> Self {
        Self {
            signal: doorbell.signal(),
            bundles: VecDeque::new(),
            fetches: 0,
        }
    }

    pub fn push_bundle(&mut self, bundle: std::result::Result<NotificationBundle, String>) {
        self.bundles.push_back(bundle);
    }

    pub fn raise(&self) {
        self.signal.raise();
    }

    pub fn is_raised(&self) -> bool {
        self.signal.is_raised()
    }

    pub fn fetches(&self) -> usize {
        self.fetches
    }
}

impl NotificationChannel for ScriptedChannel {
    fn readiness(&self) -> SignalId {
        self.signal.id()
    }

    fn clear(&self) {
        self.signal.clear();
    }

    fn fetch_bundle(&mut self) -> Result<NotificationBundle> {
        self.fetches += 1;
        match self.bundles.pop_front() {
            Some(Ok(bundle)) => Ok(bundle),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("notification script exhausted")),
        }
    }
}

struct ScriptedWorker {
    id: String,
    status: WorkerStatus,
    approval: Signal,
    pending: Option<ApprovalRequest>,
}

/// Worker pool with scripted workers, approvals, and poll results.
#[derive(Default)]
pub struct ScriptedWorkers {
    workers: Vec<ScriptedWorker>,
    changes_per_poll: usize,
    polls: usize,
    cancel_after: Option<(usize, ShutdownToken)>,
    exit_on_poll: Vec<usize>,
    decisions: Vec<(usize, ApprovalDecision)>,
}

impl ScriptedWorkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_running(&mut self, doorbell: &Doorbell, id: &str) {
        self.add(doorbell, id, WorkerStatus::Running);
    }

    pub fn add_exited(&mut self, doorbell: &Doorbell, id: &str) {
        self.add(doorbell, id, WorkerStatus::Exited);
    }

    fn add(&mut self, doorbell: &Doorbell, id: &str, status: WorkerStatus) {
        self.workers.push(ScriptedWorker {
            id: id.to_string(),
            status,
            approval: doorbell.signal(),
            pending: None,
        });
    }

    /// Block worker `index` on an approval request for `operation`.
    pub fn request_approval(&mut self, index: usize, operation: &str) {
        let worker = &mut self.workers[index];
        worker.pending = Some(ApprovalRequest {
            worker_id: worker.id.clone(),
            operation: operation.to_string(),
        });
        worker.approval.raise();
    }

    pub fn changes_per_poll(&mut self, changes: usize) {
        self.changes_per_poll = changes;
    }

    /// Mark worker `index` exited on the next poll.
    pub fn exit_on_poll(&mut self, index: usize) {
        self.exit_on_poll.push(index);
    }

    /// Cancel `token` on the `polls`-th poll.
    pub fn cancel_after_polls(&mut self, polls: usize, token: &ShutdownToken) {
        self.cancel_after = Some((polls, token.clone()));
    }

    pub fn polls(&self) -> usize {
        self.polls
    }

    pub fn decisions(&self) -> Vec<(usize, ApprovalDecision)> {
        self.decisions.clone()
    }
}

impl WorkerPool for ScriptedWorkers {
    fn workers(&self) -> Vec<WorkerView> {
        self.workers
            .iter()
            .map(|worker| WorkerView {
                id: worker.id.clone(),
                status: worker.status,
                approval: Some(worker.approval.id()),
            })
            .collect()
    }

    fn poll_all(&mut self) -> usize {
        self.polls += 1;
        for index in self.exit_on_poll.drain(..) {
            self.workers[index].status = WorkerStatus::Exited;
        }
        if let Some((after, token)) = &self.cancel_after
            && self.polls >= *after
        {
            token.cancel();
        }
        self.changes_per_poll
    }

    fn handle_approval_request(
        &mut self,
        index: usize,
        policy: &dyn ApprovalPolicy,
    ) -> Result<()> {
        let worker = self
            .workers
            .get_mut(index)
            .ok_or_else(|| anyhow!("no worker at index {index}"))?;
        let request = worker
            .pending
            .take()
            .ok_or_else(|| anyhow!("worker {} has no pending approval", worker.id))?;
        worker.approval.clear();
        self.decisions.push((index, policy.decide(&request)));
        Ok(())
    }
}
