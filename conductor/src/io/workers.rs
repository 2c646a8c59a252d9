//! Delegated workers and the approval policy applied to their requests.

use anyhow::{Result, anyhow};

use super::reactor::SignalId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Exited,
}

/// What the supervisor needs to know about one worker each iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerView {
    pub id: String,
    pub status: WorkerStatus,
    /// Raised while the worker is blocked on an approval request.
    pub approval: Option<SignalId>,
}

/// An operation a worker wants permission for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    pub worker_id: String,
    pub operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// Decides approval requests on behalf of an absent human.
pub trait ApprovalPolicy {
    fn decide(&self, request: &ApprovalRequest) -> ApprovalDecision;
}

/// Approve everything. Selected by `--yolo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnattendedApproval;

impl ApprovalPolicy for UnattendedApproval {
    fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Approve
    }
}

/// Deny everything; a detached supervisor has nobody to ask.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl ApprovalPolicy for DenyAll {
    fn decide(&self, _request: &ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::Deny
    }
}

/// The workers a supervisor has delegated to.
pub trait WorkerPool {
    fn workers(&self) -> Vec<WorkerView>;
    /// Poll every worker for output and state changes. Returns how many changed.
    fn poll_all(&mut self) -> usize;
    /// Resolve the pending approval request of worker `index` with `policy`.
    fn handle_approval_request(&mut self, index: usize, policy: &dyn ApprovalPolicy)
    -> Result<()>;
}

/// Pool with no workers. Workers are created by the tool layer, which the
/// standalone binary does not host.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWorkerPool;

impl WorkerPool for EmptyWorkerPool {
    fn workers(&self) -> Vec<WorkerView> {
        Vec::new()
    }

    fn poll_all(&mut self) -> usize {
        0
    }

    fn handle_approval_request(
        &mut self,
        index: usize,
        _policy: &dyn ApprovalPolicy,
    ) -> Result<()> {
        Err(anyhow!("no worker at index {index}"))
    }
}
