//! Identifier generation
use bech32::Bech32m;
use uuid7::uuid7;

use crate::error::{ApprovalError, Result};

/// Human readable part for each record family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdKind {
    Rule,
    Request,
    Action,
}

impl IdKind {
    pub fn hrp(&self) -> &'static str {
        match self {
            IdKind::Rule => "rule_",
            IdKind::Request => "req_",
            IdKind::Action => "act_",
        }
    }
}

// construct a time-ordered uuid then encode it with the record's prefix
pub fn new_id(kind: IdKind) -> Result<String> {
    encode_uuid7(kind.hrp()).map_err(|e| ApprovalError::Internal(format!("id generation: {e}")))
}

pub fn encode_uuid7(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}
