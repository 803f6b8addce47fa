// --- File: crates/clinic_gcal/src/error.rs ---
use clinic_common::{ClinicError, RejectionReason};
use thiserror::Error;

/// Errors raised by the local scheduling rules, before any remote call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("{message}")]
    Rejected {
        reason: RejectionReason,
        message: String,
    },
    #[error("{0}")]
    InvalidInput(String),
}

impl SchedulingError {
    pub fn rejected(reason: RejectionReason, message: impl Into<String>) -> Self {
        SchedulingError::Rejected {
            reason,
            message: message.into(),
        }
    }

    pub fn reason(&self) -> Option<RejectionReason> {
        match self {
            SchedulingError::Rejected { reason, .. } => Some(*reason),
            SchedulingError::InvalidInput(_) => None,
        }
    }
}

impl From<SchedulingError> for ClinicError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Rejected { reason, message } => {
                ClinicError::BusinessRuleViolation { reason, message }
            }
            SchedulingError::InvalidInput(message) => ClinicError::ValidationError(message),
        }
    }
}

/// Why an OAuth callback `state` was refused. All variants require restarting the flow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("state parameter is malformed: {0}")]
    MalformedState(String),
    #[error("state is unknown or was already used")]
    UnknownNonce,
    #[error("state was issued for branch {issued} but claims branch {claimed}")]
    BranchMismatch { issued: i64, claimed: i64 },
    #[error("state expired {age_minutes} minutes after issue")]
    Expired { age_minutes: i64 },
}

impl From<OAuthError> for ClinicError {
    fn from(err: OAuthError) -> Self {
        ClinicError::AuthorizationExpired(err.to_string())
    }
}
