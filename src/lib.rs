//! Approval rules and the engine that resolves requests raised against them.
//!
//! A rule is either sequential (approvers act in order, one rejection settles
//! the request) or percentage based (the request is approved once enough
//! approvers agree, and rejected once that share is out of reach).

pub mod api;
pub mod config;
pub mod directory;
pub mod error;
pub mod request;
pub mod resolution;
pub mod rule;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;

pub use error::{ApprovalError, ConflictReason, ErrorKind};
pub use service::{ApprovalService, Submission};
