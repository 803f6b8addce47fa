// --- File: crates/clinic_gcal/src/service.rs ---
//! Google Calendar implementation of [`CalendarService`].
//!
//! Every provider call is bounded by the configured request timeout and its
//! error is classified into [`CalendarError`] before leaving this module.

use chrono::{DateTime, Utc};
use clinic_common::services::{BoxFuture, BusyInterval, CalendarService, EventDraft};
use clinic_common::CalendarError;
use google_calendar3::api::{Event, EventAttendee, EventDateTime, EventExtendedProperties};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::HubType;

const PAGE_SIZE: i32 = 250;

/// Google Calendar service implementation.
pub struct GoogleCalendarService {
    calendar_hub: Arc<HubType>,
    request_timeout: Duration,
}

impl GoogleCalendarService {
    pub fn new(calendar_hub: Arc<HubType>, request_timeout: Duration) -> Self {
        Self {
            calendar_hub,
            request_timeout,
        }
    }

    /// Runs one provider call under the request timeout.
    async fn bounded<T, F>(&self, operation: &str, call: F) -> Result<T, ProviderFailure>
    where
        F: Future<Output = Result<T, google_calendar3::Error>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(ProviderFailure::from(err)),
            Err(_) => Err(ProviderFailure::Transport(format!(
                "{} timed out after {}s",
                operation,
                self.request_timeout.as_secs()
            ))),
        }
    }
}

impl CalendarService for GoogleCalendarService {
    fn fetch_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyInterval>, CalendarError> {
        let calendar_id = calendar_id.to_string();

        Box::pin(async move {
            let mut busy = Vec::new();
            let mut page_token: Option<String> = None;

            loop {
                let mut call = self
                    .calendar_hub
                    .events()
                    .list(&calendar_id)
                    .time_min(start)
                    .time_max(end)
                    .single_events(true) // expand recurring instances
                    .order_by("startTime")
                    .max_results(PAGE_SIZE);
                if let Some(token) = page_token.as_deref() {
                    call = call.page_token(token);
                }

                let (_response, events) = self
                    .bounded("events.list", call.doit())
                    .await
                    .map_err(ProviderFailure::classify)?;

                for event in events.items.unwrap_or_default() {
                    match busy_interval_from_event(&event) {
                        Some(interval) => busy.push(interval),
                        None => debug!(
                            event_id = event.id.as_deref().unwrap_or("-"),
                            "Skipping event without concrete start/end"
                        ),
                    }
                }

                page_token = events.next_page_token.filter(|t| !t.is_empty());
                if page_token.is_none() {
                    break;
                }
            }

            busy.sort_by_key(|b| b.start);
            Ok(busy)
        })
    }

    fn create_event(
        &self,
        calendar_id: &str,
        event: EventDraft,
    ) -> BoxFuture<'_, String, CalendarError> {
        let calendar_id = calendar_id.to_string();

        Box::pin(async move {
            let send_updates = if event.attendee_email.is_some() {
                "all"
            } else {
                "none"
            };
            let call = self
                .calendar_hub
                .events()
                .insert(build_event(&event), &calendar_id)
                .send_updates(send_updates);

            let (_response, created) = self
                .bounded("events.insert", call.doit())
                .await
                .map_err(ProviderFailure::classify)?;

            created.id.filter(|id| !id.is_empty()).ok_or_else(|| {
                CalendarError::Unknown("provider created an event without an id".to_string())
            })
        })
    }

    fn delete_event(&self, calendar_id: &str, event_id: &str) -> BoxFuture<'_, (), CalendarError> {
        let calendar_id = calendar_id.to_string();
        let event_id = event_id.to_string();

        Box::pin(async move {
            let call = self
                .calendar_hub
                .events()
                .delete(&calendar_id, &event_id)
                .send_updates("all");

            match self.bounded("events.delete", call.doit()).await {
                Ok(_) => Ok(()),
                Err(failure) if failure.is_gone() => {
                    debug!(event_id = %event_id, "Event already gone, treating delete as done");
                    Ok(())
                }
                Err(failure) => Err(failure.classify()),
            }
        })
    }
}

/// Busy interval for an event, or `None` for cancelled, all-day or malformed events.
pub fn busy_interval_from_event(event: &Event) -> Option<BusyInterval> {
    if event.status.as_deref() == Some("cancelled") {
        return None;
    }
    let start = event.start.as_ref()?.date_time?;
    let end = event.end.as_ref()?.date_time?;
    (start < end).then_some(BusyInterval { start, end })
}

/// Builds the provider event, including the private back-reference properties.
pub fn build_event(draft: &EventDraft) -> Event {
    let reference = &draft.back_reference;
    let private: HashMap<String, String> = HashMap::from([
        ("appointment_id".to_string(), reference.appointment_id.to_string()),
        ("branch_id".to_string(), reference.branch_id.to_string()),
        ("patient_id".to_string(), reference.patient_id.to_string()),
    ]);

    Event {
        summary: Some(draft.summary.clone()),
        description: Some(draft.description.clone()),
        start: Some(EventDateTime {
            date_time: Some(draft.start),
            time_zone: Some(draft.timezone.clone()),
            ..Default::default()
        }),
        end: Some(EventDateTime {
            date_time: Some(draft.end),
            time_zone: Some(draft.timezone.clone()),
            ..Default::default()
        }),
        attendees: draft.attendee_email.as_ref().map(|email| {
            vec![EventAttendee {
                email: Some(email.clone()),
                ..Default::default()
            }]
        }),
        extended_properties: Some(EventExtendedProperties {
            private: Some(private),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A provider error reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderFailure {
    /// Connection, I/O, cancellation or timeout.
    Transport(String),
    /// The authenticator could not obtain an access token.
    Token(String),
    /// The API answered with an HTTP error status.
    Status { status: u16, message: String },
    Other(String),
}

impl From<google_calendar3::Error> for ProviderFailure {
    fn from(err: google_calendar3::Error) -> Self {
        use google_calendar3::Error;

        match err {
            Error::HttpError(e) => ProviderFailure::Transport(e.to_string()),
            Error::Io(e) => ProviderFailure::Transport(e.to_string()),
            Error::Cancelled => ProviderFailure::Transport("request cancelled".to_string()),
            Error::MissingToken(e) => ProviderFailure::Token(e.to_string()),
            Error::BadRequest(body) => {
                let message = body["error"]["message"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| body.to_string());
                match body["error"]["code"].as_u64() {
                    Some(code) => ProviderFailure::Status {
                        status: u16::try_from(code).unwrap_or(400),
                        message,
                    },
                    None => ProviderFailure::Status {
                        status: 400,
                        message,
                    },
                }
            }
            Error::Failure(response) => {
                let status = response.status();
                ProviderFailure::Status {
                    status: status.as_u16(),
                    message: format!("HTTP {}", status),
                }
            }
            other => ProviderFailure::Other(other.to_string()),
        }
    }
}

impl ProviderFailure {
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 404 or 410: the resource does not exist (any more).
    pub fn is_gone(&self) -> bool {
        matches!(self.status(), Some(404 | 410))
    }

    /// Typed information first; message patterns only when nothing typed is available.
    pub fn classify(self) -> CalendarError {
        let classified = match self {
            ProviderFailure::Transport(message) => CalendarError::ServiceUnavailable(message),
            ProviderFailure::Token(message) => {
                if message.to_lowercase().contains("invalid_grant") {
                    CalendarError::CredentialRejected(message)
                } else {
                    match classify_message(&message) {
                        CalendarError::Unknown(message) => CalendarError::Unauthorized(message),
                        other => other,
                    }
                }
            }
            ProviderFailure::Status { status, message } => classify_status(status, message),
            ProviderFailure::Other(message) => classify_message(&message),
        };
        warn!(error = %classified, "Calendar provider call failed");
        classified
    }
}

fn classify_status(status: u16, message: String) -> CalendarError {
    let lower = message.to_lowercase();
    match status {
        400 if lower.contains("invalid_grant") => CalendarError::CredentialRejected(message),
        401 => CalendarError::Unauthorized(message),
        403 if lower.contains("rate limit")
            || lower.contains("ratelimitexceeded")
            || lower.contains("quota") =>
        {
            CalendarError::ServiceUnavailable(message)
        }
        403 => CalendarError::PermissionDenied(message),
        404 | 410 => CalendarError::CalendarNotFound(message),
        429 | 500..=599 => CalendarError::ServiceUnavailable(message),
        _ => CalendarError::Unknown(format!("HTTP {}: {}", status, message)),
    }
}

/// Best-effort classification of free-form provider text.
pub fn classify_message(message: &str) -> CalendarError {
    let lower = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["invalid_grant", "token has been expired or revoked"]) {
        CalendarError::CredentialRejected(message.to_string())
    } else if has(&["invalid_client", "unauthorized", "401"]) {
        CalendarError::Unauthorized(message.to_string())
    } else if has(&[
        "timed out",
        "timeout",
        "connection",
        "dns error",
        "temporarily unavailable",
        "503",
        "502",
    ]) {
        CalendarError::ServiceUnavailable(message.to_string())
    } else if has(&["not found", "404"]) {
        CalendarError::CalendarNotFound(message.to_string())
    } else if has(&["forbidden", "permission", "403"]) {
        CalendarError::PermissionDenied(message.to_string())
    } else {
        CalendarError::Unknown(message.to_string())
    }
}
