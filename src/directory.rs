//! Organization membership as seen by the approval engine
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{ApprovalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Manager,
    Employee,
}

impl Role {
    /// Only admins configure approval rules.
    pub fn can_manage_rules(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// An authenticated caller acting inside their active organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub organization_id: String,
}

impl Caller {
    pub fn new(user_id: &str, organization_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            organization_id: organization_id.to_string(),
        }
    }
}

/// Member lookup provided by the surrounding application.
pub trait MemberDirectory: Send + Sync {
    fn role_of(&self, organization_id: &str, user_id: &str) -> Option<Role>;

    fn is_member(&self, organization_id: &str, user_id: &str) -> bool {
        self.role_of(organization_id, user_id).is_some()
    }

    fn require_rule_manager(&self, caller: &Caller) -> Result<()> {
        match self.role_of(&caller.organization_id, &caller.user_id) {
            Some(role) if role.can_manage_rules() => Ok(()),
            _ => Err(ApprovalError::Unauthorized(
                "Only organization admins can manage approval rules".into(),
            )),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    members: RwLock<HashMap<(String, String), Role>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, organization_id: &str, user_id: &str, role: Role) {
        if let Ok(mut members) = self.members.write() {
            members.insert((organization_id.to_string(), user_id.to_string()), role);
        }
    }

    pub fn with_member(self, organization_id: &str, user_id: &str, role: Role) -> Self {
        self.add_member(organization_id, user_id, role);
        self
    }
}

impl MemberDirectory for InMemoryDirectory {
    fn role_of(&self, organization_id: &str, user_id: &str) -> Option<Role> {
        self.members
            .read()
            .ok()?
            .get(&(organization_id.to_string(), user_id.to_string()))
            .copied()
    }
}
