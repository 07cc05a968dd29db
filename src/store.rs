//! sled-backed storage for rules and requests
//!
//! Rules live in the `rules` tree and requests (with their actions) in the
//! `requests` tree, both CBOR encoded. Writes that depend on what they read run
//! as sled transactions, which are serializable: concurrent submissions on the
//! same request are ordered and each one sees the previous one's actions.
use std::sync::Arc;

use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, ConflictableTransactionResult};

use crate::error::{ApprovalError, Result};
use crate::request::ApprovalRequest;
use crate::resolution::{Ballot, Outcome, apply_decision};
use crate::rule::{ApprovalRule, RulePatch};

const RULES_TREE: &str = "rules";
const REQUESTS_TREE: &str = "requests";

type TxResult<T> = ConflictableTransactionResult<T, ApprovalError>;

pub struct ApprovalStore {
    db: Arc<sled::Db>,
    rules: sled::Tree,
    requests: sled::Tree,
    flush_on_write: bool,
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>> {
    Ok(minicbor::to_vec(value)?)
}

fn decode<T: for<'b> minicbor::Decode<'b, ()>>(bytes: &[u8]) -> Result<T> {
    Ok(minicbor::decode(bytes)?)
}

// lift an engine error into the transaction so sled aborts without retrying
fn abort<T>(res: Result<T>) -> TxResult<T> {
    res.map_err(ConflictableTransactionError::Abort)
}

fn scoped(rule: ApprovalRule, organization_id: &str) -> Result<ApprovalRule> {
    if rule.organization_id == organization_id {
        Ok(rule)
    } else {
        Err(ApprovalError::not_found("Rule"))
    }
}

impl ApprovalStore {
    pub fn open(db: Arc<sled::Db>) -> Result<Self> {
        let rules = db.open_tree(RULES_TREE)?;
        let requests = db.open_tree(REQUESTS_TREE)?;

        Ok(Self {
            db,
            rules,
            requests,
            flush_on_write: false,
        })
    }

    pub fn with_flush_on_write(mut self, flush_on_write: bool) -> Self {
        self.flush_on_write = flush_on_write;
        self
    }

    fn committed(&self) -> Result<()> {
        if self.flush_on_write {
            self.db.flush()?;
        }
        Ok(())
    }

    /// Load a rule with its approvers in position order. Rules of other
    /// organizations are reported as missing.
    pub fn load_rule(&self, organization_id: &str, rule_id: &str) -> Result<ApprovalRule> {
        let bytes = self
            .rules
            .get(rule_id.as_bytes())?
            .ok_or_else(|| ApprovalError::not_found("Rule"))?;
        scoped(decode(&bytes)?, organization_id)
    }

    pub fn list_rules(&self, organization_id: &str) -> Result<Vec<ApprovalRule>> {
        let mut rules = Vec::new();
        for entry in self.rules.iter() {
            let (_, bytes) = entry?;
            let rule: ApprovalRule = decode(&bytes)?;
            if rule.organization_id == organization_id {
                rules.push(rule);
            }
        }
        rules.sort_by_key(|r| r.created_at.to_datetime_utc());
        Ok(rules)
    }

    pub fn insert_rule(&self, rule: &ApprovalRule) -> Result<()> {
        self.rules.insert(rule.id.as_bytes(), encode(rule)?)?;
        self.committed()
    }

    pub fn update_rule(
        &self,
        organization_id: &str,
        rule_id: &str,
        patch: &RulePatch,
    ) -> Result<ApprovalRule> {
        let updated = self.rules.transaction(|rules| -> TxResult<_> {
            let bytes = match rules.get(rule_id.as_bytes())? {
                Some(bytes) => bytes,
                None => return abort(Err(ApprovalError::not_found("Rule"))),
            };
            let rule = abort(decode(&bytes).and_then(|r| scoped(r, organization_id)))?;
            let updated = abort(rule.patched(patch))?;

            rules.insert(rule_id.as_bytes(), abort(encode(&updated))?)?;
            Ok(updated)
        })?;

        self.committed()?;
        Ok(updated)
    }

    /// Delete a rule together with every request opened against it. Returns
    /// the number of requests removed.
    pub fn delete_rule(&self, organization_id: &str, rule_id: &str) -> Result<usize> {
        let known = self.request_ids_for_rule(rule_id)?;

        let trees = (&self.rules, &self.requests);
        let mut removed = trees.transaction(|(rules, requests)| -> TxResult<usize> {
            let bytes = match rules.get(rule_id.as_bytes())? {
                Some(bytes) => bytes,
                None => return abort(Err(ApprovalError::not_found("Rule"))),
            };
            abort(decode::<ApprovalRule>(&bytes).and_then(|r| scoped(r, organization_id)))?;
            rules.remove(rule_id.as_bytes())?;

            let mut removed = 0;
            for id in &known {
                if let Some(bytes) = requests.get(id)? {
                    let request: ApprovalRequest = abort(decode(&bytes))?;
                    if request.rule_id == rule_id {
                        requests.remove(id.clone())?;
                        removed += 1;
                    }
                }
            }
            Ok(removed)
        })?;

        // requests committed between the scan and the delete; none can follow it
        for id in self.request_ids_for_rule(rule_id)? {
            if self.requests.remove(id)?.is_some() {
                removed += 1;
            }
        }

        self.committed()?;
        Ok(removed)
    }

    fn request_ids_for_rule(&self, rule_id: &str) -> Result<Vec<sled::IVec>> {
        let mut ids = Vec::new();
        for entry in self.requests.iter() {
            let (key, bytes) = entry?;
            let request: ApprovalRequest = decode(&bytes)?;
            if request.rule_id == rule_id {
                ids.push(key);
            }
        }
        Ok(ids)
    }

    /// Open a request against a rule of `organization_id`. The request and all
    /// of its pending actions are written as one record.
    pub fn create_request(
        &self,
        organization_id: &str,
        rule_id: &str,
        requester_id: &str,
    ) -> Result<ApprovalRequest> {
        let trees = (&self.rules, &self.requests);
        let request = trees.transaction(|(rules, requests)| -> TxResult<_> {
            let bytes = match rules.get(rule_id.as_bytes())? {
                Some(bytes) => bytes,
                None => return abort(Err(ApprovalError::not_found("Rule"))),
            };
            let rule = abort(decode(&bytes).and_then(|r| scoped(r, organization_id)))?;
            let request = abort(ApprovalRequest::open(&rule, requester_id))?;

            requests.insert(request.id.as_bytes(), abort(encode(&request))?)?;
            Ok(request)
        })?;

        self.committed()?;
        Ok(request)
    }

    /// Record `ballot` on a request and persist the resulting status, all in
    /// one transaction over the request and its rule.
    pub fn submit(
        &self,
        request_id: &str,
        ballot: &Ballot,
    ) -> Result<(ApprovalRequest, Outcome)> {
        let trees = (&self.rules, &self.requests);
        let result = trees.transaction(|(rules, requests)| -> TxResult<_> {
            let bytes = match requests.get(request_id.as_bytes())? {
                Some(bytes) => bytes,
                None => return abort(Err(ApprovalError::not_found("Request"))),
            };
            let mut request: ApprovalRequest = abort(decode(&bytes))?;

            let rule = match rules.get(request.rule_id.as_bytes())? {
                Some(bytes) => Some(abort(decode::<ApprovalRule>(&bytes))?),
                None => None,
            };
            let outcome = abort(apply_decision(&mut request, rule.as_ref(), ballot))?;

            requests.insert(request_id.as_bytes(), abort(encode(&request))?)?;
            Ok((request, outcome))
        })?;

        self.committed()?;
        Ok(result)
    }

    pub fn get_request(&self, request_id: &str) -> Result<ApprovalRequest> {
        let bytes = self
            .requests
            .get(request_id.as_bytes())?
            .ok_or_else(|| ApprovalError::not_found("Request"))?;
        decode(&bytes)
    }

    /// Requests where `user_id` is the requester or one of the approvers.
    pub fn list_requests_for(&self, user_id: &str) -> Result<Vec<ApprovalRequest>> {
        let mut requests = Vec::new();
        for entry in self.requests.iter() {
            let (_, bytes) = entry?;
            let request: ApprovalRequest = decode(&bytes)?;
            if request.involves(user_id) {
                requests.push(request);
            }
        }
        requests.sort_by_key(|r| r.created_at.to_datetime_utc());
        Ok(requests)
    }
}
