use std::fmt;

use sled::transaction::TransactionError;

pub type Result<T> = std::result::Result<T, ApprovalError>;

/// Why a write was refused because of the current state of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    /// The request is already approved or rejected.
    AlreadyProcessed,
    /// This approver's action is no longer pending.
    AlreadyActed,
    /// A lower-positioned approver has not approved yet.
    OutOfSequence,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::AlreadyProcessed => "already_processed",
            ConflictReason::AlreadyActed => "already_acted",
            ConflictReason::OutOfSequence => "out_of_sequence",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ConflictReason::AlreadyProcessed => "Request is already processed",
            ConflictReason::AlreadyActed => "You have already processed this request",
            ConflictReason::OutOfSequence => "Previous approvers have not approved yet",
        };
        f.write_str(msg)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ApprovalError {
    #[error("Unauthenticated")]
    Unauthenticated,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("{0}")]
    Conflict(ConflictReason),
    // the detail is for logs only, Display stays generic
    #[error("Internal error")]
    Internal(String),
}

/// Machine-readable error kind handed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    Unauthorized,
    NotFound,
    InvalidInput,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ApprovalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApprovalError::Unauthenticated => ErrorKind::Unauthenticated,
            ApprovalError::Unauthorized(_) => ErrorKind::Unauthorized,
            ApprovalError::NotFound(_) => ErrorKind::NotFound,
            ApprovalError::InvalidInput(_) => ErrorKind::InvalidInput,
            ApprovalError::Conflict(_) => ErrorKind::Conflict,
            ApprovalError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status the surrounding application answers with.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Unauthenticated => 401,
            ErrorKind::Unauthorized => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::InvalidInput | ErrorKind::Conflict => 400,
            ErrorKind::Internal => 500,
        }
    }

    pub fn not_found(what: &str) -> Self {
        ApprovalError::NotFound(what.to_string())
    }
}

impl From<sled::Error> for ApprovalError {
    fn from(value: sled::Error) -> Self {
        ApprovalError::Internal(format!("storage: {value}"))
    }
}

impl From<TransactionError<ApprovalError>> for ApprovalError {
    fn from(value: TransactionError<ApprovalError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => err.into(),
        }
    }
}

impl From<minicbor::decode::Error> for ApprovalError {
    fn from(value: minicbor::decode::Error) -> Self {
        ApprovalError::Internal(format!("decode: {value}"))
    }
}

impl<E: fmt::Display> From<minicbor::encode::Error<E>> for ApprovalError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        ApprovalError::Internal(format!("encode: {value}"))
    }
}
