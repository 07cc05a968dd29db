//! Resolution engine
//!
//! Pure decision logic over a request, its actions and the rule it was opened
//! against. Nothing here touches storage; the store runs [`apply_decision`]
//! inside a transaction so the checks and the writes they allow are atomic.
use chrono::Utc;

use crate::error::{ApprovalError, ConflictReason, Result};
use crate::request::{ApprovalAction, ApprovalRequest};
use crate::rule::{ApprovalPolicy, ApprovalRule, SequencePosition};
use crate::types::{ActionState, Decision, RequestStatus, TimeStamp};

/// One approver's decision on one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ballot {
    pub approver_id: String,
    pub decision: Decision,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub total: usize,
    pub approved: usize,
    pub rejected: usize,
}

/// What a recorded ballot did to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub previous: RequestStatus,
    pub status: RequestStatus,
}

impl Outcome {
    pub fn transitioned(&self) -> bool {
        self.previous != self.status
    }
}

impl Tally {
    pub fn of(actions: &[ApprovalAction]) -> Self {
        actions.iter().fold(
            Tally {
                total: actions.len(),
                ..Default::default()
            },
            |mut tally, action| {
                match action.state {
                    ActionState::Approved => tally.approved += 1,
                    ActionState::Rejected => tally.rejected += 1,
                    ActionState::Pending => {}
                }
                tally
            },
        )
    }

    /// `approved / total * 100 >= required`, compared on integers.
    pub fn reaches(&self, required: u8) -> bool {
        self.approved * 100 >= usize::from(required) * self.total
    }

    /// `(total - rejected) / total * 100 < required`: even if every pending
    /// approver approved, the threshold would be missed.
    pub fn cannot_reach(&self, required: u8) -> bool {
        (self.total - self.rejected) * 100 < usize::from(required) * self.total
    }
}

/// Aggregate status implied by the current actions.
pub fn resolve(policy: &ApprovalPolicy, actions: &[ApprovalAction]) -> RequestStatus {
    if actions.is_empty() {
        return RequestStatus::Pending;
    }
    let tally = Tally::of(actions);

    match policy {
        ApprovalPolicy::Sequential => {
            if tally.rejected > 0 {
                RequestStatus::Rejected
            } else if tally.approved == tally.total {
                RequestStatus::Approved
            } else {
                RequestStatus::Pending
            }
        }
        ApprovalPolicy::Percentage(required) => {
            if tally.reaches(*required) {
                RequestStatus::Approved
            } else if tally.cannot_reach(*required) {
                RequestStatus::Rejected
            } else {
                RequestStatus::Pending
            }
        }
    }
}

/// Fails with `OutOfSequence` unless every approver positioned before
/// `approver_id` has approved.
pub fn check_sequence(
    rule: &ApprovalRule,
    actions: &[ApprovalAction],
    approver_id: &str,
) -> Result<()> {
    let position = match rule.approver(approver_id).map(|a| a.position) {
        Some(SequencePosition::Ordered(p)) => p,
        _ => return Err(ApprovalError::not_found("Approver")),
    };

    for previous in rule.predecessors(position) {
        let approved = actions
            .iter()
            .find(|a| a.approver_id == previous.user_id)
            .is_some_and(|a| a.state == ActionState::Approved);
        if !approved {
            return Err(ApprovalError::Conflict(ConflictReason::OutOfSequence));
        }
    }

    Ok(())
}

/// Validate `ballot` against the request and rule, then record it and move the
/// request to the status the actions now imply.
///
/// Checks run in a fixed order and nothing is mutated unless all of them pass:
/// request still pending, rule present, caller holds an action, that action is
/// pending, and for sequential rules every earlier approver has approved.
pub fn apply_decision(
    request: &mut ApprovalRequest,
    rule: Option<&ApprovalRule>,
    ballot: &Ballot,
) -> Result<Outcome> {
    if request.status.is_terminal() {
        return Err(ApprovalError::Conflict(ConflictReason::AlreadyProcessed));
    }
    let rule = rule.ok_or_else(|| ApprovalError::not_found("Rule"))?;

    let Some(action) = request.action_for(&ballot.approver_id) else {
        return Err(ApprovalError::Unauthorized(
            "You are not an approver for this request".into(),
        ));
    };
    if !action.is_pending() {
        return Err(ApprovalError::Conflict(ConflictReason::AlreadyActed));
    }
    if rule.policy.is_sequential() {
        check_sequence(rule, &request.actions, &ballot.approver_id)?;
    }

    let now = TimeStamp::<Utc>::new();
    if let Some(action) = request.action_for_mut(&ballot.approver_id) {
        action.state = ballot.decision.into();
        action.notes = ballot.notes.clone();
        action.acted_at = Some(now.clone());
    }

    let previous = request.status;
    request.status = resolve(&rule.policy, &request.actions);
    request.updated_at = now;

    Ok(Outcome {
        previous,
        status: request.status,
    })
}
