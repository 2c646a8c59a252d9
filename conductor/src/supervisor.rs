//! The per-goal supervisor loop.
//!
//! A supervisor runs in its own process, one per goal. On entry it reconciles
//! actions a previous supervisor left `Running`, hands the session an opening
//! status summary, and then cycles:
//!
//! 1. build the interest set (notification channel, pending approvals)
//! 2. wait for readiness, bounded by the wait timeout
//! 3. poll delegated workers
//! 4. service signalled approval requests
//! 5. process notifications (also after any worker change)
//! 6. re-evaluate goal completion
//!
//! Shutdown is cooperative: the token is checked once per iteration and a
//! termination signal wakes the wait.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::briefing::{Briefing, render_briefing};
use crate::core::goap::check_progress;
use crate::core::reconcile::resolve_orphan;
use crate::core::types::{ActionCounts, GoalStatus, SupervisorPhase};
use crate::exit_codes;
use crate::io::action_store::ActionStore;
use crate::io::goal_store::GoalStore;
use crate::io::inbox::NotificationChannel;
use crate::io::reactor::{Doorbell, Interest};
use crate::io::session::Session;
use crate::io::signals::ShutdownToken;
use crate::io::work_queue::WorkQueue;
use crate::io::workers::{ApprovalPolicy, WorkerPool, WorkerStatus};

/// Why a supervisor stopped without completing its goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The goal could not be loaded.
    Store,
    /// The opening status summary could not be built or submitted.
    InitialMessage,
    /// Notification processing failed too many times in a row.
    NotificationFailures,
    /// A termination signal was received.
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    Complete,
    Error(ExitCause),
}

impl SupervisorExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorExit::Complete => exit_codes::COMPLETE,
            SupervisorExit::Error(_) => exit_codes::ERROR,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub phase: SupervisorPhase,
    pub wait_timeout: Duration,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Notifications,
    Approval(usize),
}

/// The collaborators one supervisor drives.
pub struct Supervisor<'a> {
    pub goals: &'a dyn GoalStore,
    pub actions: &'a dyn ActionStore,
    pub queue: &'a dyn WorkQueue,
    pub session: &'a mut dyn Session,
    pub notifications: Option<&'a mut dyn NotificationChannel>,
    pub workers: &'a mut dyn WorkerPool,
    pub policy: &'a dyn ApprovalPolicy,
    pub doorbell: &'a Doorbell,
    pub shutdown: &'a ShutdownToken,
    pub settings: SupervisorSettings,
}

impl Supervisor<'_> {
    #[instrument(skip(self), fields(phase = %self.settings.phase))]
    pub fn run(&mut self, goal_id: &str) -> SupervisorExit {
        info!("supervisor starting");

        let recovered = match recover_orphaned_actions(self.goals, self.actions, self.queue, goal_id)
        {
            Ok(count) => count,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "orphan recovery failed");
                0
            }
        };

        if let Err(err) = self.send_status_summary(goal_id, recovered) {
            error!(err = %format!("{err:#}"), "initial message failed");
            return if crate::io::goal_store::is_goal_not_found(&err) {
                SupervisorExit::Error(ExitCause::Store)
            } else {
                SupervisorExit::Error(ExitCause::InitialMessage)
            };
        }

        if self.goal_is_complete(goal_id) {
            info!("goal already complete");
            return SupervisorExit::Complete;
        }

        let mut consecutive_failures = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                info!("shutdown requested");
                return SupervisorExit::Error(ExitCause::Shutdown);
            }

            let mut interest = Interest::new();
            if let Some(channel) = self.notifications.as_deref() {
                interest.register(Source::Notifications, channel.readiness());
            }
            for (index, worker) in self.workers.workers().iter().enumerate() {
                if worker.status == WorkerStatus::Running
                    && let Some(approval) = worker.approval
                {
                    interest.register(Source::Approval(index), approval);
                }
            }

            let ready = self.doorbell.wait(&interest, self.settings.wait_timeout);
            let changes = self.workers.poll_all();

            // Polling may have retired a worker that was ready a moment ago.
            let workers = self.workers.workers();
            for key in ready.keys() {
                if let Source::Approval(index) = *key
                    && workers
                        .get(index)
                        .is_some_and(|worker| worker.status == WorkerStatus::Running)
                    && let Err(err) = self.workers.handle_approval_request(index, self.policy)
                {
                    warn!(worker = index, err = %format!("{err:#}"), "approval request failed");
                }
            }

            let notified = ready.contains(Source::Notifications);
            if (notified || changes > 0)
                && let Some(channel) = self.notifications.as_deref_mut()
            {
                if notified {
                    channel.clear();
                }
                match process_notifications(channel, &mut *self.session) {
                    Ok(()) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures += 1;
                        warn!(
                            consecutive_failures,
                            err = %format!("{err:#}"),
                            "notification processing failed"
                        );
                        if consecutive_failures >= self.settings.max_consecutive_failures {
                            error!("too many consecutive notification failures");
                            return SupervisorExit::Error(ExitCause::NotificationFailures);
                        }
                    }
                }
            }

            if self.goal_is_complete(goal_id) {
                info!("goal complete");
                return SupervisorExit::Complete;
            }
        }
    }

    fn send_status_summary(&mut self, goal_id: &str, recovered: usize) -> Result<()> {
        let goal = self.goals.get(goal_id)?;
        let actions = self
            .actions
            .list_by_goal(goal_id)
            .context("list actions for status summary")?;
        let text = render_briefing(&Briefing {
            goal: &goal,
            phase: self.settings.phase,
            counts: ActionCounts::tally(&actions),
            recovered,
        })?;
        self.session
            .process_message(&text)
            .context("submit status summary")
    }

    /// Completed goals stay complete; otherwise the evaluator decides, and a
    /// newly satisfied goal is persisted as `Completed`.
    fn goal_is_complete(&self, goal_id: &str) -> bool {
        let goal = match self.goals.get(goal_id) {
            Ok(goal) => goal,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "load goal for completion check");
                return false;
            }
        };
        if goal.status == GoalStatus::Completed {
            return true;
        }
        let progress = check_progress(goal.goal_state.as_deref(), goal.world_state.as_deref());
        if !progress.complete {
            return false;
        }
        match self.goals.update_status(goal_id, GoalStatus::Completed) {
            Ok(()) => true,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "persist goal completion, will retry");
                false
            }
        }
    }
}

fn process_notifications(
    channel: &mut dyn NotificationChannel,
    session: &mut dyn Session,
) -> Result<()> {
    let bundle = channel.fetch_bundle().context("fetch notifications")?;
    if bundle.count == 0 {
        return Ok(());
    }
    session
        .append_system_message(&bundle.text)
        .context("append notifications")?;
    session.continue_turn().context("continue after notifications")?;
    info!(count = bundle.count, "notifications delivered");
    Ok(())
}

/// Reconcile actions of `goal_id` left `Running` by a supervisor that is gone.
///
/// Each action is resolved from its work item; lookups and updates that fail
/// leave that action as it was. Returns how many actions changed.
pub fn recover_orphaned_actions(
    goals: &dyn GoalStore,
    actions: &dyn ActionStore,
    queue: &dyn WorkQueue,
    goal_id: &str,
) -> Result<usize> {
    let goal = goals.get(goal_id)?;
    let running = actions
        .list_running(goal_id)
        .context("list running actions")?;

    let mut changed = 0;
    for action in &running {
        let item = match &action.work_item_id {
            None => None,
            Some(item_id) => match queue.get_item(&goal.queue_name, item_id) {
                Ok(item) => item,
                Err(err) => {
                    warn!(action_id = %action.id, err = %format!("{err:#}"), "work item lookup failed");
                    continue;
                }
            },
        };
        let resolution = resolve_orphan(item.as_ref());
        if !resolution.changes_action() {
            continue;
        }
        match actions.update_status(&action.id, resolution.status(), resolution.result()) {
            Ok(()) => {
                info!(action_id = %action.id, status = %resolution.status(), "recovered orphaned action");
                changed += 1;
            }
            Err(err) => warn!(action_id = %action.id, err = %format!("{err:#}"), "orphan update failed"),
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use crate::core::types::{Action, ActionStatus, Goal, WorkItem, WorkItemStatus};
    use crate::io::inbox::NotificationBundle;
    use crate::io::session::Role;
    use crate::io::workers::{ApprovalDecision, DenyAll, UnattendedApproval};
    use crate::test_support::{
        MemoryActionStore, MemoryGoalStore, MemoryWorkQueue, ScriptedChannel, ScriptedSession,
        ScriptedWorkers, action, goal,
    };

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            phase: SupervisorPhase::Execute,
            wait_timeout: Duration::from_millis(10),
            max_consecutive_failures: 3,
        }
    }

    fn unfinished_goal() -> Goal {
        Goal {
            goal_state: Some(r#"{"built":true,"tested":true}"#.to_string()),
            world_state: Some(r#"{"built":true}"#.to_string()),
            ..goal("g1", GoalStatus::Active)
        }
    }

    fn item(id: &str, status: WorkItemStatus) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            status,
            result: Some(format!("{id} result")),
            error: Some(format!("{id} error")),
        }
    }

    fn backed(id: &str, item_id: Option<&str>) -> Action {
        Action {
            work_item_id: item_id.map(str::to_string),
            ..action(id, "g1", ActionStatus::Running)
        }
    }

    #[test]
    fn orphans_resolve_from_their_work_items() {
        let goals = MemoryGoalStore::with_goals([goal("g1", GoalStatus::Active)]);
        let actions = MemoryActionStore::with_actions([
            backed("no-item", None),
            backed("missing", Some("w-missing")),
            backed("done", Some("w-done")),
            backed("failed", Some("w-failed")),
            backed("assigned", Some("w-assigned")),
            backed("queued", Some("w-queued")),
            action("pending", "g1", ActionStatus::Pending),
        ]);
        let queue = MemoryWorkQueue::with_items(
            "g1",
            [
                item("w-done", WorkItemStatus::Completed),
                item("w-failed", WorkItemStatus::Failed),
                item("w-assigned", WorkItemStatus::Assigned),
                item("w-queued", WorkItemStatus::Queued),
            ],
        );

        let changed = recover_orphaned_actions(&goals, &actions, &queue, "g1").expect("recover");

        assert_eq!(changed, 5);
        assert_eq!(actions.action("no-item").status, ActionStatus::Pending);
        assert_eq!(actions.action("missing").status, ActionStatus::Pending);
        let done = actions.action("done");
        assert_eq!(done.status, ActionStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("w-done result"));
        let failed = actions.action("failed");
        assert_eq!(failed.status, ActionStatus::Failed);
        assert_eq!(failed.result.as_deref(), Some("w-failed error"));
        assert_eq!(actions.action("assigned").status, ActionStatus::Running);
        assert_eq!(actions.action("queued").status, ActionStatus::Pending);
        assert_eq!(actions.action("pending").status, ActionStatus::Pending);
    }

    #[test]
    fn failed_lookup_leaves_the_action_running() {
        let goals = MemoryGoalStore::with_goals([goal("g1", GoalStatus::Active)]);
        let actions = MemoryActionStore::with_actions([backed("a1", Some("w1"))]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        queue.fail_lookups(true);

        assert_eq!(
            recover_orphaned_actions(&goals, &actions, &queue, "g1").expect("recover"),
            0
        );
        assert_eq!(actions.action("a1").status, ActionStatus::Running);
    }

    #[test]
    fn already_complete_goal_exits_after_the_summary() {
        let goals = MemoryGoalStore::with_goals([Goal {
            world_state: Some(r#"{"built":true,"tested":true}"#.to_string()),
            ..unfinished_goal()
        }]);
        let actions = MemoryActionStore::with_actions([backed("a1", None)]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let mut session = ScriptedSession::new();
        let mut workers = ScriptedWorkers::new();
        let doorbell = Doorbell::new();
        let shutdown = ShutdownToken::new();

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: None,
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Complete);
        assert_eq!(exit.exit_code(), exit_codes::COMPLETE);
        assert_eq!(goals.goal("g1").status, GoalStatus::Completed);
        let turns = session.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, Role::User);
        assert!(turns[0].text.contains("Progress: 2/2 assertions satisfied."));
        assert!(turns[0].text.contains("Recovered 1 action(s)"));
        assert_eq!(workers.polls(), 0);
    }

    #[test]
    fn failed_initial_message_is_fatal() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let mut session = ScriptedSession::new();
        session.fail_messages(true);
        let mut workers = ScriptedWorkers::new();
        let doorbell = Doorbell::new();
        let shutdown = ShutdownToken::new();

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: None,
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Error(ExitCause::InitialMessage));
        assert_eq!(exit.exit_code(), exit_codes::ERROR);
        assert_eq!(goals.goal("g1").status, GoalStatus::Active);
    }

    #[test]
    fn missing_goal_is_a_store_error() {
        let goals = MemoryGoalStore::with_goals([]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let mut session = ScriptedSession::new();
        let mut workers = ScriptedWorkers::new();
        let doorbell = Doorbell::new();
        let shutdown = ShutdownToken::new();

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: None,
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Error(ExitCause::Store));
        assert!(session.turns().is_empty());
    }

    #[test]
    fn notification_turn_that_satisfies_the_goal_completes_it() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let doorbell = Doorbell::new();
        let mut channel = ScriptedChannel::new(&doorbell);
        channel.push_bundle(Ok(NotificationBundle {
            text: "[INCOMING AGENT MESSAGES]\n\nDirect from w1: \"tests pass\"\n".to_string(),
            count: 1,
        }));
        channel.raise();
        let mut session = ScriptedSession::new();
        session.on_continue(|| {
            goals.set_world_state("g1", r#"{"built":true,"tested":true}"#);
        });
        let mut workers = ScriptedWorkers::new();
        let shutdown = ShutdownToken::new();

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: Some(&mut channel),
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Complete);
        assert_eq!(goals.goal("g1").status, GoalStatus::Completed);
        assert!(!channel.is_raised());
        let roles: Vec<Role> = session.turns().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::System]);
        assert_eq!(session.continues(), 1);
    }

    #[test]
    fn worker_change_processes_notifications_without_readiness() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let doorbell = Doorbell::new();
        let mut channel = ScriptedChannel::new(&doorbell);
        channel.push_bundle(Ok(NotificationBundle {
            text: "late message".to_string(),
            count: 1,
        }));
        let mut session = ScriptedSession::new();
        session.on_continue(|| {
            goals.set_world_state("g1", r#"{"built":true,"tested":true}"#);
        });
        let mut workers = ScriptedWorkers::new();
        workers.changes_per_poll(1);
        let shutdown = ShutdownToken::new();

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: Some(&mut channel),
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Complete);
        assert_eq!(channel.fetches(), 1);
        assert_eq!(session.turns()[1].text, "late message");
    }

    #[test]
    fn three_consecutive_notification_failures_end_the_loop() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let doorbell = Doorbell::new();
        let mut channel = ScriptedChannel::new(&doorbell);
        channel.push_bundle(Err("inbox unreadable".to_string()));
        channel.push_bundle(Err("inbox unreadable".to_string()));
        channel.push_bundle(Ok(NotificationBundle::default()));
        // Script exhausted: every further fetch fails.
        let mut session = ScriptedSession::new();
        let mut workers = ScriptedWorkers::new();
        workers.changes_per_poll(1);
        let shutdown = ShutdownToken::new();

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: Some(&mut channel),
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Error(ExitCause::NotificationFailures));
        // Two failures, a success that resets the count, then three failures.
        assert_eq!(channel.fetches(), 6);
        assert_eq!(goals.goal("g1").status, GoalStatus::Active);
    }

    #[test]
    fn signalled_approvals_go_through_the_policy() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let doorbell = Doorbell::new();
        let shutdown = ShutdownToken::new();
        let mut session = ScriptedSession::new();
        let mut workers = ScriptedWorkers::new();
        workers.add_running(&doorbell, "w0");
        workers.add_exited(&doorbell, "w1");
        workers.add_running(&doorbell, "w2");
        workers.request_approval(0, "git push");
        workers.request_approval(1, "rm -rf /");
        workers.cancel_after_polls(2, &shutdown);

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: None,
            workers: &mut workers,
            policy: &UnattendedApproval,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Error(ExitCause::Shutdown));
        assert_eq!(
            workers.decisions(),
            vec![(0, ApprovalDecision::Approve)]
        );
    }

    #[test]
    fn approval_of_a_worker_that_exited_during_polling_is_skipped() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let doorbell = Doorbell::new();
        let shutdown = ShutdownToken::new();
        let mut session = ScriptedSession::new();
        let mut workers = ScriptedWorkers::new();
        workers.add_running(&doorbell, "w0");
        workers.request_approval(0, "git push");
        workers.exit_on_poll(0);
        workers.cancel_after_polls(1, &shutdown);

        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: None,
            workers: &mut workers,
            policy: &UnattendedApproval,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: settings(),
        }
        .run("g1");

        assert_eq!(exit, SupervisorExit::Error(ExitCause::Shutdown));
        assert!(workers.decisions().is_empty());
    }

    #[test]
    fn termination_wakes_a_waiting_supervisor() {
        let goals = MemoryGoalStore::with_goals([unfinished_goal()]);
        let actions = MemoryActionStore::with_actions([]);
        let queue = MemoryWorkQueue::with_items("g1", []);
        let doorbell = Doorbell::new();
        let shutdown = ShutdownToken::new();
        let mut session = ScriptedSession::new();
        let mut workers = ScriptedWorkers::new();

        let waker = doorbell.clone();
        let token = shutdown.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
            waker.wake();
        });

        let start = Instant::now();
        let exit = Supervisor {
            goals: &goals,
            actions: &actions,
            queue: &queue,
            session: &mut session,
            notifications: None,
            workers: &mut workers,
            policy: &DenyAll,
            doorbell: &doorbell,
            shutdown: &shutdown,
            settings: SupervisorSettings {
                wait_timeout: Duration::from_secs(30),
                ..settings()
            },
        }
        .run("g1");
        handle.join().expect("join");

        assert_eq!(exit, SupervisorExit::Error(ExitCause::Shutdown));
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
