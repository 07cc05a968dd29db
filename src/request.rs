//! Approval requests and the per-approver actions they own
use chrono::Utc;

use crate::error::Result;
use crate::rule::ApprovalRule;
use crate::types::{ActionState, RequestStatus, TimeStamp};
use crate::utils::{IdKind, new_id};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalAction {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    #[n(2)]
    pub approver_id: String,
    #[n(3)]
    pub state: ActionState,
    #[n(4)]
    pub notes: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub acted_at: Option<TimeStamp<Utc>>,
}

/// One instantiation of a rule. Actions are stored inside the request record so
/// the request and its ballots are always written together.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub rule_id: String,
    #[n(2)]
    pub requester_id: String,
    #[n(3)]
    pub status: RequestStatus,
    #[n(4)]
    pub created_at: TimeStamp<Utc>,
    #[n(5)]
    pub updated_at: TimeStamp<Utc>,
    #[n(6)]
    pub actions: Vec<ApprovalAction>,
}

impl ApprovalAction {
    pub fn is_pending(&self) -> bool {
        self.state == ActionState::Pending
    }
}

impl ApprovalRequest {
    /// Open a pending request with one pending action per approver of `rule`.
    pub fn open(rule: &ApprovalRule, requester_id: &str) -> Result<Self> {
        let id = new_id(IdKind::Request)?;
        let now = TimeStamp::new();

        let actions = rule
            .approvers
            .iter()
            .map(|approver| -> Result<ApprovalAction> {
                Ok(ApprovalAction {
                    id: new_id(IdKind::Action)?,
                    request_id: id.clone(),
                    approver_id: approver.user_id.clone(),
                    state: ActionState::Pending,
                    notes: None,
                    created_at: now.clone(),
                    acted_at: None,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            rule_id: rule.id.clone(),
            requester_id: requester_id.to_string(),
            status: RequestStatus::Pending,
            created_at: now.clone(),
            updated_at: now,
            actions,
        })
    }

    pub fn action_for(&self, approver_id: &str) -> Option<&ApprovalAction> {
        self.actions.iter().find(|a| a.approver_id == approver_id)
    }

    pub fn action_for_mut(&mut self, approver_id: &str) -> Option<&mut ApprovalAction> {
        self.actions.iter_mut().find(|a| a.approver_id == approver_id)
    }

    /// The requester or any designated approver.
    pub fn involves(&self, user_id: &str) -> bool {
        self.requester_id == user_id || self.action_for(user_id).is_some()
    }

    pub fn pending_approvers(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .filter(|a| a.is_pending())
            .map(|a| a.approver_id.as_str())
    }
}
