//! Approval rule definitions and their write-time validation
use std::collections::HashSet;

use chrono::Utc;

use crate::error::{ApprovalError, Result};
use crate::types::TimeStamp;
use crate::utils::{IdKind, new_id};

/// How a rule resolves its requests.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPolicy {
    /// Approvers act in position order and a single rejection settles the request.
    #[n(0)]
    Sequential,
    /// Approvers act in any order until the share of approvals reaches the threshold
    /// or can no longer reach it.
    #[n(1)]
    Percentage(#[n(0)] u8),
}

impl ApprovalPolicy {
    pub fn is_sequential(&self) -> bool {
        matches!(self, ApprovalPolicy::Sequential)
    }
    pub fn minimum_percentage(&self) -> Option<u8> {
        match self {
            ApprovalPolicy::Sequential => None,
            ApprovalPolicy::Percentage(p) => Some(*p),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencePosition {
    #[n(0)]
    Unordered,
    #[n(1)]
    Ordered(#[n(0)] u32),
}

impl SequencePosition {
    pub fn order(&self) -> Option<u32> {
        match self {
            SequencePosition::Unordered => None,
            SequencePosition::Ordered(p) => Some(*p),
        }
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Approver {
    #[n(0)]
    pub user_id: String,
    #[n(1)]
    pub position: SequencePosition,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ApprovalRule {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub organization_id: String,
    #[n(2)]
    pub user_id: String, // member the rule is configured for
    #[n(3)]
    pub name: String,
    #[n(4)]
    pub policy: ApprovalPolicy,
    #[n(5)]
    pub approvers: Vec<Approver>, // sorted by position when sequential
    #[n(6)]
    pub created_at: TimeStamp<Utc>,
    #[n(7)]
    pub updated_at: TimeStamp<Utc>,
}

/// A validated rule body, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub user_id: String,
    pub name: String,
    pub policy: ApprovalPolicy,
    pub approvers: Vec<Approver>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproverDraft {
    pub user_id: String,
    pub sequence_order: Option<u32>,
}

/// Unvalidated rule input. Every write goes through [`RuleDraft::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleDraft {
    user_id: Option<String>,
    name: Option<String>,
    is_sequential: bool,
    minimum_approval_percentage: Option<u32>,
    approvers: Vec<ApproverDraft>,
}

/// Partial update of a stored rule. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RulePatch {
    pub name: Option<String>,
    pub is_sequential: Option<bool>,
    pub minimum_approval_percentage: Option<u32>,
    pub approvers: Option<Vec<ApproverDraft>>,
}

impl RuleDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }
    pub fn set_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
    pub fn set_sequential(mut self, is_sequential: bool) -> Self {
        self.is_sequential = is_sequential;
        self
    }
    pub fn set_minimum_percentage(mut self, percentage: u32) -> Self {
        self.minimum_approval_percentage = Some(percentage);
        self
    }
    pub fn add_approver(mut self, user_id: &str) -> Self {
        self.approvers.push(ApproverDraft {
            user_id: user_id.to_string(),
            sequence_order: None,
        });
        self
    }
    pub fn add_ordered_approver(mut self, user_id: &str, sequence_order: u32) -> Self {
        self.approvers.push(ApproverDraft {
            user_id: user_id.to_string(),
            sequence_order: Some(sequence_order),
        });
        self
    }
    pub fn set_approvers(mut self, approvers: Vec<ApproverDraft>) -> Self {
        self.approvers = approvers;
        self
    }

    /// Rebuild the draft a stored rule was made from.
    pub fn from_rule(rule: &ApprovalRule) -> Self {
        Self {
            user_id: Some(rule.user_id.clone()),
            name: Some(rule.name.clone()),
            is_sequential: rule.policy.is_sequential(),
            minimum_approval_percentage: rule.policy.minimum_percentage().map(u32::from),
            approvers: rule
                .approvers
                .iter()
                .map(|a| ApproverDraft {
                    user_id: a.user_id.clone(),
                    sequence_order: a.position.order(),
                })
                .collect(),
        }
    }

    pub fn apply(mut self, patch: &RulePatch) -> Self {
        if let Some(name) = &patch.name {
            self.name = Some(name.clone());
        }
        if let Some(is_sequential) = patch.is_sequential {
            self.is_sequential = is_sequential;
        }
        if let Some(percentage) = patch.minimum_approval_percentage {
            self.minimum_approval_percentage = Some(percentage);
        }
        if let Some(approvers) = &patch.approvers {
            self.approvers = approvers.clone();
        }
        self
    }

    pub fn approver_ids(&self) -> impl Iterator<Item = &str> {
        self.approvers.iter().map(|a| a.user_id.as_str())
    }

    pub fn validate(&self) -> Result<RuleSpec> {
        let user_id = match self.user_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(ApprovalError::InvalidInput("Missing required fields".into())),
        };
        let name = match self.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(ApprovalError::InvalidInput("Missing required fields".into())),
        };
        if self.approvers.is_empty() {
            return Err(ApprovalError::InvalidInput("Missing required fields".into()));
        }

        let mut seen = HashSet::new();
        for approver in &self.approvers {
            if approver.user_id.trim().is_empty() {
                return Err(ApprovalError::InvalidInput(
                    "Approver user id is empty".into(),
                ));
            }
            if !seen.insert(approver.user_id.as_str()) {
                return Err(ApprovalError::InvalidInput(format!(
                    "Approver {} is listed more than once",
                    approver.user_id
                )));
            }
        }

        let (policy, approvers) = if self.is_sequential {
            (ApprovalPolicy::Sequential, self.ordered_approvers()?)
        } else {
            let percentage = match self.minimum_approval_percentage {
                Some(p) if (1..=100).contains(&p) => p as u8,
                Some(p) => {
                    return Err(ApprovalError::InvalidInput(format!(
                        "Minimum approval percentage must be between 1 and 100, got {p}"
                    )));
                }
                None => {
                    return Err(ApprovalError::InvalidInput(
                        "Non-sequential rules require minimum approval percentage".into(),
                    ));
                }
            };
            // sequence orders carry no meaning here and are dropped
            let approvers = self
                .approvers
                .iter()
                .map(|a| Approver {
                    user_id: a.user_id.clone(),
                    position: SequencePosition::Unordered,
                })
                .collect();
            (ApprovalPolicy::Percentage(percentage), approvers)
        };

        Ok(RuleSpec {
            user_id,
            name,
            policy,
            approvers,
        })
    }

    fn ordered_approvers(&self) -> Result<Vec<Approver>> {
        let mut positions = HashSet::new();
        let mut approvers = Vec::with_capacity(self.approvers.len());

        for approver in &self.approvers {
            let Some(order) = approver.sequence_order else {
                return Err(ApprovalError::InvalidInput(
                    "Sequential rules require sequence order for all approvers".into(),
                ));
            };
            if !positions.insert(order) {
                return Err(ApprovalError::InvalidInput(format!(
                    "Sequence order {order} is used by more than one approver"
                )));
            }
            approvers.push(Approver {
                user_id: approver.user_id.clone(),
                position: SequencePosition::Ordered(order),
            });
        }
        approvers.sort_by_key(|a| a.position.order());

        Ok(approvers)
    }
}

impl ApprovalRule {
    pub fn new(organization_id: &str, spec: RuleSpec) -> Result<Self> {
        let now = TimeStamp::new();
        Ok(Self {
            id: new_id(IdKind::Rule)?,
            organization_id: organization_id.to_string(),
            user_id: spec.user_id,
            name: spec.name,
            policy: spec.policy,
            approvers: spec.approvers,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Validate `patch` against this rule and return the updated rule.
    pub fn patched(&self, patch: &RulePatch) -> Result<Self> {
        let spec = RuleDraft::from_rule(self).apply(patch).validate()?;
        Ok(Self {
            id: self.id.clone(),
            organization_id: self.organization_id.clone(),
            user_id: spec.user_id,
            name: spec.name,
            policy: spec.policy,
            approvers: spec.approvers,
            created_at: self.created_at.clone(),
            updated_at: TimeStamp::new(),
        })
    }

    pub fn approver(&self, user_id: &str) -> Option<&Approver> {
        self.approvers.iter().find(|a| a.user_id == user_id)
    }

    /// Approvers that must have approved before the holder of `position` may act.
    pub fn predecessors(&self, position: u32) -> impl Iterator<Item = &Approver> {
        self.approvers
            .iter()
            .filter(move |a| matches!(a.position, SequencePosition::Ordered(p) if p < position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequential_draft() -> RuleDraft {
        RuleDraft::new()
            .set_user("user_employee")
            .set_name("Travel")
            .set_sequential(true)
            .add_ordered_approver("user_b", 2)
            .add_ordered_approver("user_a", 1)
    }

    #[test]
    fn sequential_approvers_are_sorted_by_position() {
        let spec = sequential_draft().validate().unwrap();

        assert_eq!(spec.policy, ApprovalPolicy::Sequential);
        assert_eq!(spec.approvers[0].user_id, "user_a");
        assert_eq!(spec.approvers[0].position, SequencePosition::Ordered(1));
        assert_eq!(spec.approvers[1].user_id, "user_b");
    }

    #[test]
    fn sequential_requires_every_order() {
        let err = sequential_draft().add_approver("user_c").validate().unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidInput(_)));
    }

    #[test]
    fn sequential_rejects_duplicate_positions() {
        let err = sequential_draft()
            .add_ordered_approver("user_c", 2)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidInput(_)));
    }

    #[test]
    fn percentage_is_required_when_not_sequential() {
        let err = RuleDraft::new()
            .set_user("user_employee")
            .set_name("Expenses")
            .add_approver("user_a")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidInput(_)));
    }

    #[test]
    fn percentage_must_be_in_range() {
        for bad in [0, 101] {
            let res = RuleDraft::new()
                .set_user("user_employee")
                .set_name("Expenses")
                .set_minimum_percentage(bad)
                .add_approver("user_a")
                .validate();
            assert!(res.is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn percentage_rules_drop_sequence_orders() {
        let spec = RuleDraft::new()
            .set_user("user_employee")
            .set_name("Expenses")
            .set_minimum_percentage(75)
            .add_ordered_approver("user_a", 1)
            .validate()
            .unwrap();

        assert_eq!(spec.policy, ApprovalPolicy::Percentage(75));
        assert_eq!(spec.approvers[0].position, SequencePosition::Unordered);
    }

    #[test]
    fn duplicate_approvers_are_rejected() {
        let err = RuleDraft::new()
            .set_user("user_employee")
            .set_name("Expenses")
            .set_minimum_percentage(50)
            .add_approver("user_a")
            .add_approver("user_a")
            .validate()
            .unwrap_err();
        assert!(matches!(err, ApprovalError::InvalidInput(_)));
    }

    #[test]
    fn missing_name_or_approvers_is_rejected() {
        assert!(RuleDraft::new()
            .set_user("user_employee")
            .set_minimum_percentage(50)
            .add_approver("user_a")
            .validate()
            .is_err());
        assert!(RuleDraft::new()
            .set_user("user_employee")
            .set_name("Expenses")
            .set_minimum_percentage(50)
            .validate()
            .is_err());
    }

    #[test]
    fn switching_to_sequential_needs_new_orders() {
        let spec = RuleDraft::new()
            .set_user("user_employee")
            .set_name("Expenses")
            .set_minimum_percentage(50)
            .add_approver("user_a")
            .validate()
            .unwrap();
        let rule = ApprovalRule::new("org_1", spec).unwrap();

        let patch = RulePatch {
            is_sequential: Some(true),
            ..Default::default()
        };
        assert!(rule.patched(&patch).is_err());

        let patch = RulePatch {
            is_sequential: Some(true),
            approvers: Some(vec![ApproverDraft {
                user_id: "user_a".into(),
                sequence_order: Some(1),
            }]),
            ..Default::default()
        };
        let updated = rule.patched(&patch).unwrap();
        assert_eq!(updated.id, rule.id);
        assert_eq!(updated.policy, ApprovalPolicy::Sequential);
        assert_eq!(updated.policy.minimum_percentage(), None);
    }

    #[test]
    fn predecessors_are_strictly_lower() {
        let spec = sequential_draft()
            .add_ordered_approver("user_c", 3)
            .validate()
            .unwrap();
        let rule = ApprovalRule::new("org_1", spec).unwrap();

        let before: Vec<_> = rule.predecessors(3).map(|a| a.user_id.as_str()).collect();
        assert_eq!(before, vec!["user_a", "user_b"]);
        assert_eq!(rule.predecessors(1).count(), 0);
    }

    #[test]
    fn rule_cbor_roundtrip() {
        let rule = ApprovalRule::new("org_1", sequential_draft().validate().unwrap()).unwrap();

        let encoded = minicbor::to_vec(&rule).unwrap();
        let decoded: ApprovalRule = minicbor::decode(&encoded).unwrap();

        assert_eq!(rule, decoded);
    }
}
