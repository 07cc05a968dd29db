//! Service layer API for approval workflow operations
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::directory::{Caller, MemberDirectory};
use crate::error::{ApprovalError, Result};
use crate::request::ApprovalRequest;
use crate::resolution::{Ballot, Outcome};
use crate::rule::{ApprovalRule, RuleDraft, RulePatch};
use crate::store::ApprovalStore;
use crate::types::Decision;

pub struct ApprovalService {
    store: ApprovalStore,
    directory: Arc<dyn MemberDirectory>,
}

/// Result of a recorded decision.
#[derive(Debug, Clone)]
pub struct Submission {
    pub request: ApprovalRequest,
    pub outcome: Outcome,
}

impl ApprovalService {
    pub fn new(instance: Arc<sled::Db>, directory: Arc<dyn MemberDirectory>) -> Result<Self> {
        Ok(Self {
            store: ApprovalStore::open(instance)?,
            directory,
        })
    }

    pub fn from_config(
        config: &Config,
        directory: Arc<dyn MemberDirectory>,
    ) -> anyhow::Result<Self> {
        let store =
            ApprovalStore::open(config.open_db()?)?.with_flush_on_write(config.flush_on_write);
        Ok(Self { store, directory })
    }

    fn check_approvers_are_members(
        &self,
        organization_id: &str,
        draft: &RuleDraft,
    ) -> Result<()> {
        if let Some(outsider) = draft
            .approver_ids()
            .find(|id| !self.directory.is_member(organization_id, id))
        {
            return Err(ApprovalError::InvalidInput(format!(
                "Approver {outsider} is not a member of this organization"
            )));
        }
        Ok(())
    }

    /// Create a rule in the caller's organization. Admins only.
    pub fn create_rule(&self, caller: &Caller, draft: RuleDraft) -> Result<ApprovalRule> {
        self.directory.require_rule_manager(caller)?;
        let spec = draft.validate()?;
        self.check_approvers_are_members(&caller.organization_id, &draft)?;

        let rule = ApprovalRule::new(&caller.organization_id, spec)?;
        self.store.insert_rule(&rule)?;

        info!(
            rule_id = %rule.id,
            organization_id = %rule.organization_id,
            sequential = rule.policy.is_sequential(),
            approvers = rule.approvers.len(),
            "approval rule created"
        );
        Ok(rule)
    }

    pub fn update_rule(
        &self,
        caller: &Caller,
        rule_id: &str,
        patch: RulePatch,
    ) -> Result<ApprovalRule> {
        self.directory.require_rule_manager(caller)?;
        if let Some(approvers) = &patch.approvers {
            let draft = RuleDraft::new().set_approvers(approvers.clone());
            self.check_approvers_are_members(&caller.organization_id, &draft)?;
        }

        let rule = self.store.update_rule(&caller.organization_id, rule_id, &patch)?;
        info!(rule_id = %rule.id, "approval rule updated");
        Ok(rule)
    }

    pub fn delete_rule(&self, caller: &Caller, rule_id: &str) -> Result<()> {
        self.directory.require_rule_manager(caller)?;
        let requests = self.store.delete_rule(&caller.organization_id, rule_id)?;
        info!(rule_id, requests, "approval rule deleted");
        Ok(())
    }

    pub fn get_rule(&self, caller: &Caller, rule_id: &str) -> Result<ApprovalRule> {
        self.store.load_rule(&caller.organization_id, rule_id)
    }

    pub fn list_rules(&self, caller: &Caller) -> Result<Vec<ApprovalRule>> {
        self.store.list_rules(&caller.organization_id)
    }

    /// Open a request for the caller against one of their organization's rules.
    pub fn create_request(&self, caller: &Caller, rule_id: &str) -> Result<ApprovalRequest> {
        let request = self
            .store
            .create_request(&caller.organization_id, rule_id, &caller.user_id)?;

        info!(
            request_id = %request.id,
            rule_id,
            requester_id = %caller.user_id,
            approvers = request.actions.len(),
            "approval request created"
        );
        Ok(request)
    }

    /// Record the approver's decision and apply any status transition it causes.
    pub fn submit(
        &self,
        request_id: &str,
        approver_id: &str,
        decision: Decision,
        notes: Option<String>,
    ) -> Result<Submission> {
        let ballot = Ballot {
            approver_id: approver_id.to_string(),
            decision,
            notes,
        };

        let (request, outcome) = match self.store.submit(request_id, &ballot) {
            Ok(res) => res,
            Err(err @ ApprovalError::Internal(_)) => return Err(err),
            Err(err) => {
                warn!(
                    request_id,
                    approver_id,
                    kind = err.kind().as_str(),
                    error = %err,
                    "decision refused"
                );
                return Err(err);
            }
        };

        debug!(request_id, approver_id, ?decision, "decision recorded");
        if outcome.transitioned() {
            info!(
                request_id,
                from = %outcome.previous,
                to = %outcome.status,
                "approval request resolved"
            );
        }

        Ok(Submission { request, outcome })
    }

    /// Requests the caller raised or must act on.
    pub fn list_requests(&self, user_id: &str) -> Result<Vec<ApprovalRequest>> {
        self.store.list_requests_for(user_id)
    }

    pub fn get_request(&self, user_id: &str, request_id: &str) -> Result<ApprovalRequest> {
        let request = self.store.get_request(request_id)?;
        if !request.involves(user_id) {
            return Err(ApprovalError::not_found("Request"));
        }
        Ok(request)
    }
}
