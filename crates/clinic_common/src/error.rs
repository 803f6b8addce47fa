// --- File: crates/clinic_common/src/error.rs ---
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Why a booking request was refused by a business rule.
///
/// Callers render different copy for each reason, so the codes are part of the API.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    ClosedDay,
    OutsideBusinessHours,
    CrossesMidnight,
    InvalidWindow,
    StartsInPast,
    Conflict,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::ClosedDay => "closed_day",
            RejectionReason::OutsideBusinessHours => "outside_business_hours",
            RejectionReason::CrossesMidnight => "crosses_midnight",
            RejectionReason::InvalidWindow => "invalid_window",
            RejectionReason::StartsInPast => "starts_in_past",
            RejectionReason::Conflict => "conflict",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by a remote calendar provider, already classified.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CalendarError {
    /// The provider refused the refresh token (revoked or expired grant).
    #[error("Credential rejected by calendar provider: {0}")]
    CredentialRejected(String),

    #[error("Unauthorized by calendar provider: {0}")]
    Unauthorized(String),

    /// Network failure, timeout or provider 5xx. Safe to retry.
    #[error("Calendar provider unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Permission denied on calendar: {0}")]
    PermissionDenied(String),

    #[error("Unclassified calendar provider error: {0}")]
    Unknown(String),
}

/// Errors returned by the record collaborators (branch directory, patients, appointments).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record conflict: {0}")]
    Conflict(String),
}

/// The error type returned by every clinic operation exposed over HTTP.
#[derive(Error, Debug)]
pub enum ClinicError {
    /// Bad input shape or range. Always fixable by the caller.
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Booking rejected ({reason}): {message}")]
    BusinessRuleViolation {
        reason: RejectionReason,
        message: String,
    },

    /// OAuth state unknown, consumed, tampered with or aged out.
    #[error("Authorization expired: {0}")]
    AuthorizationExpired(String),

    #[error("Credential rejected: {0}")]
    CredentialRejected(String),

    #[error("Remote calendar unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Configuration missing: {message}")]
    ConfigurationMissing {
        reason: &'static str,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFoundError(String),

    /// The remote event exists but the local link could not be written.
    #[error("Booking partially failed (remote event {remote_event_id}, compensated: {compensated}): {message}")]
    PartiallyFailed {
        remote_event_id: String,
        compensated: bool,
        message: String,
    },

    #[error("External service error: {service_name} - {message}")]
    ExternalServiceError {
        service_name: String,
        message: String,
    },

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// A trait for converting errors to HTTP status codes.
pub trait HttpStatusCode {
    /// Returns the HTTP status code for this error.
    fn status_code(&self) -> u16;
}

impl HttpStatusCode for ClinicError {
    fn status_code(&self) -> u16 {
        match self {
            ClinicError::ValidationError(_) => 400,
            ClinicError::BusinessRuleViolation {
                reason: RejectionReason::Conflict,
                ..
            } => 409,
            ClinicError::BusinessRuleViolation { .. } => 422,
            ClinicError::AuthorizationExpired(_) => 400,
            ClinicError::CredentialRejected(_) => 502,
            ClinicError::RemoteUnavailable(_) => 503,
            ClinicError::ConfigurationMissing { .. } => 500,
            ClinicError::NotFoundError(_) => 404,
            ClinicError::PartiallyFailed { .. } => 500,
            ClinicError::ExternalServiceError { .. } => 502,
            ClinicError::InternalError(_) => 500,
        }
    }
}

impl ClinicError {
    /// Machine-readable reason code carried in the error body.
    pub fn reason(&self) -> &'static str {
        match self {
            ClinicError::ValidationError(_) => "validation_error",
            ClinicError::BusinessRuleViolation { reason, .. } => reason.as_str(),
            ClinicError::AuthorizationExpired(_) => "authorization_expired",
            ClinicError::CredentialRejected(_) => "credential_rejected",
            ClinicError::RemoteUnavailable(_) => "remote_unavailable",
            ClinicError::ConfigurationMissing { reason, .. } => *reason,
            ClinicError::NotFoundError(_) => "not_found",
            ClinicError::PartiallyFailed { .. } => "partially_failed",
            ClinicError::ExternalServiceError { .. } => "remote_error",
            ClinicError::InternalError(_) => "internal_error",
        }
    }

    /// What whoever reads the error should do next.
    pub fn operator_action(&self) -> &'static str {
        match self {
            ClinicError::ValidationError(_) => "fix_request",
            ClinicError::BusinessRuleViolation {
                reason: RejectionReason::Conflict | RejectionReason::StartsInPast,
                ..
            } => "choose_another_slot",
            ClinicError::BusinessRuleViolation { .. } => "fix_request",
            ClinicError::AuthorizationExpired(_) => "restart_authorization",
            ClinicError::CredentialRejected(_) => "reauthorize_branch",
            ClinicError::RemoteUnavailable(_) => "retry",
            ClinicError::ConfigurationMissing { .. } => "fix_configuration",
            ClinicError::NotFoundError(_) => "none",
            ClinicError::PartiallyFailed {
                compensated: true, ..
            } => "retry",
            ClinicError::PartiallyFailed { .. } => "reconcile",
            ClinicError::ExternalServiceError { .. } => "none",
            ClinicError::InternalError(_) => "none",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClinicError::RemoteUnavailable(_)
                | ClinicError::PartiallyFailed {
                    compensated: true,
                    ..
                }
        )
    }

    pub fn is_business_rule(&self, expected: RejectionReason) -> bool {
        matches!(self, ClinicError::BusinessRuleViolation { reason, .. } if *reason == expected)
    }
}

impl From<CalendarError> for ClinicError {
    fn from(err: CalendarError) -> Self {
        match err {
            CalendarError::CredentialRejected(msg) | CalendarError::Unauthorized(msg) => {
                ClinicError::CredentialRejected(msg)
            }
            CalendarError::ServiceUnavailable(msg) => ClinicError::RemoteUnavailable(msg),
            CalendarError::CalendarNotFound(msg) => ClinicError::ConfigurationMissing {
                reason: "calendar_not_found",
                message: msg,
            },
            CalendarError::PermissionDenied(msg) => ClinicError::ConfigurationMissing {
                reason: "calendar_permission_denied",
                message: msg,
            },
            CalendarError::Unknown(msg) => ClinicError::ExternalServiceError {
                service_name: "google_calendar".to_string(),
                message: msg,
            },
        }
    }
}

impl From<StoreError> for ClinicError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ClinicError::NotFoundError(msg),
            other => ClinicError::InternalError(other.to_string()),
        }
    }
}

/// A trait for adding context to errors.
pub trait Context<T, E> {
    /// Adds context to an error.
    fn context<C>(self, context: C) -> Result<T, ClinicError>
    where
        C: fmt::Display + Send + Sync + 'static;
}

impl<T, E: std::error::Error + Send + Sync + 'static> Context<T, E> for Result<T, E> {
    fn context<C>(self, context: C) -> Result<T, ClinicError>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|error| ClinicError::InternalError(format!("{}: {}", context, error)))
    }
}

// Utility functions for error handling
pub fn validation_error<T: fmt::Display>(message: T) -> ClinicError {
    ClinicError::ValidationError(message.to_string())
}

pub fn rejected<T: fmt::Display>(reason: RejectionReason, message: T) -> ClinicError {
    ClinicError::BusinessRuleViolation {
        reason,
        message: message.to_string(),
    }
}

pub fn configuration_missing<T: fmt::Display>(reason: &'static str, message: T) -> ClinicError {
    ClinicError::ConfigurationMissing {
        reason,
        message: message.to_string(),
    }
}

pub fn not_found<T: fmt::Display>(message: T) -> ClinicError {
    ClinicError::NotFoundError(message.to_string())
}

pub fn internal_error<T: fmt::Display>(message: T) -> ClinicError {
    ClinicError::InternalError(message.to_string())
}
