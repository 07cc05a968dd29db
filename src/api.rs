//! Request handlers for the approval endpoints
//!
//! Handlers take the caller's session and the raw JSON body and return a status
//! code with a JSON body, leaving routing and session extraction to the host
//! application:
//!
//! | route | handler |
//! |---|---|
//! | `POST /approval-requests` | [`Api::create_request`] |
//! | `GET /approval-requests` | [`Api::list_requests`] |
//! | `POST /approval-requests/{id}/action` | [`Api::submit_action`] |
//! | `GET /approval-rules` | [`Api::list_rules`] |
//! | `POST /approval-rules` | [`Api::create_rule`] |
//! | `GET /approval-rules/{id}` | [`Api::get_rule`] |
//! | `PATCH /approval-rules/{id}` | [`Api::update_rule`] |
//! | `DELETE /approval-rules/{id}` | [`Api::delete_rule`] |
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::error;

use crate::directory::Caller;
use crate::error::{ApprovalError, Result};
use crate::request::{ApprovalAction, ApprovalRequest};
use crate::rule::{ApprovalRule, ApproverDraft, RuleDraft, RulePatch};
use crate::service::ApprovalService;
use crate::types::Decision;

/// Identity handed over by the session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub active_organization_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }
    fn created(body: Value) -> Self {
        Self { status: 201, body }
    }
}

impl From<ApprovalError> for Response {
    fn from(err: ApprovalError) -> Self {
        let mut body = json!({
            "error": err.to_string(),
            "kind": err.kind().as_str(),
        });
        match &err {
            ApprovalError::Conflict(reason) => body["reason"] = json!(reason.as_str()),
            ApprovalError::Internal(detail) => error!(%detail, "request failed"),
            _ => {}
        }
        Self {
            status: err.status_code(),
            body,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub approval_rule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverBody {
    pub user_id: String,
    pub sequence_order: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRuleBody {
    pub user_id: Option<String>,
    pub rule_name: Option<String>,
    #[serde(default)]
    pub is_sequential: bool,
    pub minimum_approval_percentage: Option<u32>,
    #[serde(default)]
    pub approvers: Vec<ApproverBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRuleBody {
    pub rule_name: Option<String>,
    pub is_sequential: Option<bool>,
    pub minimum_approval_percentage: Option<u32>,
    pub approvers: Option<Vec<ApproverBody>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverView {
    pub approver_id: String,
    pub sequence_order: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleView {
    pub id: String,
    pub organization_id: String,
    pub user_id: String,
    pub rule_name: String,
    pub is_sequential: bool,
    pub minimum_approval_percentage: Option<u8>,
    pub approvers: Vec<ApproverView>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionView {
    pub id: String,
    pub approver_id: String,
    pub action: &'static str,
    pub notes: Option<String>,
    pub created_at: String,
    pub acted_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestView {
    pub id: String,
    pub rule_id: String,
    pub requested_by_id: String,
    pub status: &'static str,
    pub created_at: String,
    pub updated_at: String,
    pub actions: Vec<ActionView>,
}

impl From<&ApprovalRule> for RuleView {
    fn from(rule: &ApprovalRule) -> Self {
        Self {
            id: rule.id.clone(),
            organization_id: rule.organization_id.clone(),
            user_id: rule.user_id.clone(),
            rule_name: rule.name.clone(),
            is_sequential: rule.policy.is_sequential(),
            minimum_approval_percentage: rule.policy.minimum_percentage(),
            approvers: rule
                .approvers
                .iter()
                .map(|a| ApproverView {
                    approver_id: a.user_id.clone(),
                    sequence_order: a.position.order(),
                })
                .collect(),
            created_at: rule.created_at.to_datetime_utc().to_rfc3339(),
            updated_at: rule.updated_at.to_datetime_utc().to_rfc3339(),
        }
    }
}

impl From<&ApprovalAction> for ActionView {
    fn from(action: &ApprovalAction) -> Self {
        Self {
            id: action.id.clone(),
            approver_id: action.approver_id.clone(),
            action: action.state.as_str(),
            notes: action.notes.clone(),
            created_at: action.created_at.to_datetime_utc().to_rfc3339(),
            acted_at: action
                .acted_at
                .as_ref()
                .map(|t| t.to_datetime_utc().to_rfc3339()),
        }
    }
}

impl From<&ApprovalRequest> for RequestView {
    fn from(request: &ApprovalRequest) -> Self {
        Self {
            id: request.id.clone(),
            rule_id: request.rule_id.clone(),
            requested_by_id: request.requester_id.clone(),
            status: request.status.as_str(),
            created_at: request.created_at.to_datetime_utc().to_rfc3339(),
            updated_at: request.updated_at.to_datetime_utc().to_rfc3339(),
            actions: request.actions.iter().map(ActionView::from).collect(),
        }
    }
}

impl From<ApproverBody> for ApproverDraft {
    fn from(body: ApproverBody) -> Self {
        Self {
            user_id: body.user_id,
            sequence_order: body.sequence_order,
        }
    }
}

fn parse<'a, T: Deserialize<'a>>(body: &'a str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| ApprovalError::InvalidInput(format!("Malformed request body: {e}")))
}

fn user(session: Option<&Session>) -> Result<&str> {
    session
        .map(|s| s.user_id.as_str())
        .ok_or(ApprovalError::Unauthenticated)
}

fn caller(session: Option<&Session>) -> Result<Caller> {
    let session = session.ok_or(ApprovalError::Unauthenticated)?;
    let organization_id = session
        .active_organization_id
        .as_deref()
        .ok_or(ApprovalError::Unauthenticated)?;
    Ok(Caller::new(&session.user_id, organization_id))
}

fn respond(res: Result<Response>) -> Response {
    res.unwrap_or_else(Response::from)
}

pub struct Api {
    service: ApprovalService,
}

impl Api {
    pub fn new(service: ApprovalService) -> Self {
        Self { service }
    }

    /// `POST /approval-requests`
    pub fn create_request(&self, session: Option<&Session>, body: &str) -> Response {
        respond(self.try_create_request(session, body))
    }

    /// `GET /approval-requests`
    pub fn list_requests(&self, session: Option<&Session>) -> Response {
        respond(self.try_list_requests(session))
    }

    /// `POST /approval-requests/{id}/action`
    pub fn submit_action(
        &self,
        session: Option<&Session>,
        request_id: &str,
        body: &str,
    ) -> Response {
        respond(self.try_submit_action(session, request_id, body))
    }

    /// `GET /approval-rules`
    pub fn list_rules(&self, session: Option<&Session>) -> Response {
        respond(self.try_list_rules(session))
    }

    /// `POST /approval-rules`
    pub fn create_rule(&self, session: Option<&Session>, body: &str) -> Response {
        respond(self.try_create_rule(session, body))
    }

    /// `GET /approval-rules/{id}`
    pub fn get_rule(&self, session: Option<&Session>, rule_id: &str) -> Response {
        respond(self.try_get_rule(session, rule_id))
    }

    /// `PATCH /approval-rules/{id}`
    pub fn update_rule(&self, session: Option<&Session>, rule_id: &str, body: &str) -> Response {
        respond(self.try_update_rule(session, rule_id, body))
    }

    /// `DELETE /approval-rules/{id}`
    pub fn delete_rule(&self, session: Option<&Session>, rule_id: &str) -> Response {
        respond(self.try_delete_rule(session, rule_id))
    }

    fn try_create_request(&self, session: Option<&Session>, body: &str) -> Result<Response> {
        let caller = caller(session)?;
        let body: CreateRequestBody = parse(body)?;
        let Some(rule_id) = body.approval_rule_id.filter(|id| !id.is_empty()) else {
            return Err(ApprovalError::InvalidInput(
                "Approval rule ID is required".into(),
            ));
        };

        let request = self.service.create_request(&caller, &rule_id)?;
        Ok(Response::created(
            json!({ "request": RequestView::from(&request) }),
        ))
    }

    fn try_list_requests(&self, session: Option<&Session>) -> Result<Response> {
        let user_id = user(session)?;
        let requests = self.service.list_requests(user_id)?;
        let views: Vec<RequestView> = requests.iter().map(RequestView::from).collect();
        Ok(Response::ok(json!({ "requests": views })))
    }

    fn try_submit_action(
        &self,
        session: Option<&Session>,
        request_id: &str,
        body: &str,
    ) -> Result<Response> {
        let user_id = user(session)?;
        let body: ActionBody = parse(body)?;
        let decision: Decision = body.action.as_deref().unwrap_or_default().parse()?;

        self.service.submit(request_id, user_id, decision, body.notes)?;
        Ok(Response::ok(json!({ "success": true })))
    }

    fn try_list_rules(&self, session: Option<&Session>) -> Result<Response> {
        let caller = caller(session)?;
        let rules = self.service.list_rules(&caller)?;
        let views: Vec<RuleView> = rules.iter().map(RuleView::from).collect();
        Ok(Response::ok(json!({ "rules": views })))
    }

    fn try_create_rule(&self, session: Option<&Session>, body: &str) -> Result<Response> {
        let caller = caller(session)?;
        let body: CreateRuleBody = parse(body)?;

        let mut draft = RuleDraft::new()
            .set_sequential(body.is_sequential)
            .set_approvers(body.approvers.into_iter().map(ApproverDraft::from).collect());
        if let Some(user_id) = &body.user_id {
            draft = draft.set_user(user_id);
        }
        if let Some(name) = &body.rule_name {
            draft = draft.set_name(name);
        }
        if let Some(percentage) = body.minimum_approval_percentage {
            draft = draft.set_minimum_percentage(percentage);
        }

        let rule = self.service.create_rule(&caller, draft)?;
        Ok(Response::created(json!({ "rule": RuleView::from(&rule) })))
    }

    fn try_get_rule(&self, session: Option<&Session>, rule_id: &str) -> Result<Response> {
        let caller = caller(session)?;
        let rule = self.service.get_rule(&caller, rule_id)?;
        Ok(Response::ok(json!({ "rule": RuleView::from(&rule) })))
    }

    fn try_update_rule(
        &self,
        session: Option<&Session>,
        rule_id: &str,
        body: &str,
    ) -> Result<Response> {
        let caller = caller(session)?;
        let body: UpdateRuleBody = parse(body)?;
        let patch = RulePatch {
            name: body.rule_name,
            is_sequential: body.is_sequential,
            minimum_approval_percentage: body.minimum_approval_percentage,
            approvers: body
                .approvers
                .map(|list| list.into_iter().map(ApproverDraft::from).collect()),
        };

        let rule = self.service.update_rule(&caller, rule_id, patch)?;
        Ok(Response::ok(json!({ "rule": RuleView::from(&rule) })))
    }

    fn try_delete_rule(&self, session: Option<&Session>, rule_id: &str) -> Result<Response> {
        let caller = caller(session)?;
        self.service.delete_rule(&caller, rule_id)?;
        Ok(Response::ok(json!({ "success": true })))
    }
}
