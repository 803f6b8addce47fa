// --- File: crates/clinic_gcal/src/booking.rs ---
//! Availability, booking and cancellation for one branch.
//!
//! A booking moves through
//! `Validating -> CheckingAvailability -> CreatingRemoteEvent -> PersistingLink -> Committed`
//! and ends in `Rejected` or `PartiallyFailed` when a step fails. The remote
//! event is created before the local row is written, so a failed remote call
//! never leaves a local appointment behind.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use clinic_common::services::{
    AppointmentStore, BranchDirectory, BranchInfo, CalendarService, EventBackReference, EventDraft,
    NewAppointment, PatientContact, PatientDirectory,
};
use clinic_common::{
    configuration_missing, not_found, rejected, validation_error, ClinicError, RejectionReason,
    StoreError,
};
use clinic_config::{GcalConfig, ScheduleConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::auth::CalendarConnector;
use crate::logic::{local_day_bounds, validate_duration, BusinessHours, Slot, SlotGenerator};
use crate::timezone::TimezoneResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    Validating,
    CheckingAvailability,
    CreatingRemoteEvent,
    PersistingLink,
    Committed,
    Rejected,
    PartiallyFailed,
}

impl fmt::Display for BookingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BookingState::Validating => "validating",
            BookingState::CheckingAvailability => "checking_availability",
            BookingState::CreatingRemoteEvent => "creating_remote_event",
            BookingState::PersistingLink => "persisting_link",
            BookingState::Committed => "committed",
            BookingState::Rejected => "rejected",
            BookingState::PartiallyFailed => "partially_failed",
        };
        f.write_str(name)
    }
}

fn enter(state: BookingState, branch_id: i64) {
    debug!(branch_id, state = %state, "Booking state");
}

/// Free slots of one branch day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayAvailability {
    pub timezone: Tz,
    pub date: NaiveDate,
    pub slots: Vec<Slot>,
    /// The date is not a workday.
    pub closed: bool,
    /// Busy intervals were fetched from the remote calendar.
    pub calendar_sync: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BookingRequest {
    pub branch_id: i64,
    pub patient_id: i64,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub start: DateTime<Utc>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = DateTime))]
    pub end: DateTime<Utc>,
    pub appointment_type: Option<String>,
    pub attending_staff: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct BookingOutcome {
    pub appointment_id: i64,
    /// `None` when remote sync is disabled.
    pub remote_event_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct CancelOutcome {
    pub deleted: bool,
    pub remote_event_deleted: bool,
}

/// Remote calendar access used when sync is enabled.
pub struct RemoteSync {
    connector: Arc<dyn CalendarConnector>,
    calendars: GcalConfig,
}

impl RemoteSync {
    pub fn new(connector: Arc<dyn CalendarConnector>, calendars: GcalConfig) -> Self {
        Self {
            connector,
            calendars,
        }
    }

    async fn open(&self, branch_id: i64) -> Result<(String, Arc<dyn CalendarService>), ClinicError> {
        let calendar_id = self
            .calendars
            .calendar_id_for(branch_id)
            .map(str::to_string)
            .ok_or_else(|| {
                configuration_missing(
                    "calendar_missing",
                    format!(
                        "no calendar id for branch {} and no default_calendar_id configured",
                        branch_id
                    ),
                )
            })?;
        let service = self.connector.connect(branch_id).await?;
        Ok((calendar_id, service))
    }
}

/// One async mutex per branch, created on first use.
#[derive(Default)]
struct BranchLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl BranchLocks {
    async fn acquire(&self, branch_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(branch_id).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Syntactic check only: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.contains("..")
        && !domain.starts_with(['.', '-'])
        && !domain.ends_with(['.', '-'])
}

pub struct BookingCoordinator {
    generator: SlotGenerator,
    resolver: TimezoneResolver,
    branches: Arc<dyn BranchDirectory>,
    patients: Arc<dyn PatientDirectory>,
    appointments: Arc<dyn AppointmentStore>,
    remote: Option<RemoteSync>,
    locks: BranchLocks,
    serialize_bookings: bool,
    compensate_partial_failures: bool,
}

impl BookingCoordinator {
    pub fn new(
        schedule: &ScheduleConfig,
        branches: Arc<dyn BranchDirectory>,
        patients: Arc<dyn PatientDirectory>,
        appointments: Arc<dyn AppointmentStore>,
    ) -> Result<Self, ClinicError> {
        let hours = BusinessHours::from_config(schedule)?;
        let resolver = TimezoneResolver::from_name(&schedule.default_timezone).ok_or_else(|| {
            validation_error(format!(
                "unknown default timezone '{}'",
                schedule.default_timezone
            ))
        })?;
        Ok(Self {
            generator: SlotGenerator::new(hours),
            resolver,
            branches,
            patients,
            appointments,
            remote: None,
            locks: BranchLocks::default(),
            serialize_bookings: schedule.serialize_bookings,
            compensate_partial_failures: schedule.compensate_partial_failures,
        })
    }

    pub fn with_remote_sync(mut self, remote: RemoteSync) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn calendar_sync_enabled(&self) -> bool {
        self.remote.is_some()
    }

    async fn active_branch(&self, branch_id: i64) -> Result<BranchInfo, ClinicError> {
        match self.branches.branch(branch_id).await? {
            Some(branch) if branch.active => Ok(branch),
            Some(_) => Err(validation_error(format!("branch {} is inactive", branch_id))),
            None => Err(validation_error(format!("unknown branch {}", branch_id))),
        }
    }

    async fn patient(&self, patient_id: i64) -> Result<PatientContact, ClinicError> {
        self.patients
            .patient(patient_id)
            .await?
            .ok_or_else(|| validation_error(format!("unknown patient {}", patient_id)))
    }

    pub async fn availability(
        &self,
        branch_id: i64,
        date: NaiveDate,
        duration_minutes: i64,
    ) -> Result<DayAvailability, ClinicError> {
        self.availability_at(branch_id, date, duration_minutes, Utc::now())
            .await
    }

    /// Free slots on `date` as seen at `now`.
    pub async fn availability_at(
        &self,
        branch_id: i64,
        date: NaiveDate,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<DayAvailability, ClinicError> {
        let duration = validate_duration(duration_minutes)?;
        let branch = self.active_branch(branch_id).await?;
        let timezone = self.resolver.resolve(&branch);
        let hours = self.generator.hours();

        if !hours.is_workday(date) {
            debug!(branch_id, %date, "Closed day, no slots");
            return Ok(DayAvailability {
                timezone,
                date,
                slots: Vec::new(),
                closed: true,
                calendar_sync: false,
            });
        }

        let (busy, calendar_sync) = match &self.remote {
            Some(remote) => {
                let (open, close) = hours.open_close(date, timezone).ok_or_else(|| {
                    validation_error(format!("{} has no opening time in {}", date, timezone))
                })?;
                let (calendar_id, service) = remote.open(branch_id).await?;
                let busy = service.fetch_busy(&calendar_id, open, close).await?;
                (busy, true)
            }
            None => (Vec::new(), false),
        };

        let slots: Vec<Slot> = self
            .generator
            .generate(date, timezone, duration, &busy, now)
            .collect();
        debug!(
            branch_id,
            %date,
            busy = busy.len(),
            slots = slots.len(),
            calendar_sync,
            "Computed availability"
        );

        Ok(DayAvailability {
            timezone,
            date,
            slots,
            closed: false,
            calendar_sync,
        })
    }

    pub async fn book(&self, request: BookingRequest) -> Result<BookingOutcome, ClinicError> {
        self.book_at(request, Utc::now()).await
    }

    pub async fn book_at(
        &self,
        request: BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, ClinicError> {
        let branch_id = request.branch_id;
        enter(BookingState::Validating, branch_id);

        let result = self.run_booking(request, now).await;
        match &result {
            Ok(outcome) => {
                enter(BookingState::Committed, branch_id);
                info!(
                    branch_id,
                    appointment_id = outcome.appointment_id,
                    remote_event_id = outcome.remote_event_id.as_deref().unwrap_or("-"),
                    "Appointment booked"
                );
            }
            Err(ClinicError::PartiallyFailed { .. }) => {
                enter(BookingState::PartiallyFailed, branch_id);
            }
            Err(err) => {
                enter(BookingState::Rejected, branch_id);
                info!(branch_id, reason = err.reason(), error = %err, "Booking rejected");
            }
        }
        result
    }

    async fn run_booking(
        &self,
        request: BookingRequest,
        now: DateTime<Utc>,
    ) -> Result<BookingOutcome, ClinicError> {
        let branch = self.active_branch(request.branch_id).await?;
        let patient = self.patient(request.patient_id).await?;
        let timezone = self.resolver.resolve(&branch);
        let window = self
            .generator
            .hours()
            .validate_window(request.start, request.end, timezone, now)?;

        let Some(remote) = &self.remote else {
            let appointment_id = self.appointments.reserve_id().await?;
            enter(BookingState::PersistingLink, branch.branch_id);
            self.appointments
                .insert(new_appointment(appointment_id, &request))
                .await?;
            return Ok(BookingOutcome {
                appointment_id,
                remote_event_id: None,
            });
        };

        let (calendar_id, service) = remote.open(branch.branch_id).await?;

        let guard = if self.serialize_bookings {
            Some(self.locks.acquire(branch.branch_id).await)
        } else {
            None
        };

        enter(BookingState::CheckingAvailability, branch.branch_id);
        let (day_start, day_end) = local_day_bounds(window.local_start().date_naive(), timezone)
            .ok_or_else(|| validation_error("requested day has no local midnight"))?;
        let busy = service.fetch_busy(&calendar_id, day_start, day_end).await?;
        if let Some(taken) = busy.iter().find(|b| window.overlaps(b)) {
            return Err(rejected(
                RejectionReason::Conflict,
                format!(
                    "{} - {} is no longer available (busy {} - {})",
                    window.local_start().format("%H:%M"),
                    window.local_end().format("%H:%M"),
                    taken.start.with_timezone(&timezone).format("%H:%M"),
                    taken.end.with_timezone(&timezone).format("%H:%M")
                ),
            ));
        }

        let appointment_id = self.appointments.reserve_id().await?;

        enter(BookingState::CreatingRemoteEvent, branch.branch_id);
        let draft = event_draft(appointment_id, &request, &branch, &patient, timezone);
        let remote_event_id = service.create_event(&calendar_id, draft).await?;
        drop(guard);

        enter(BookingState::PersistingLink, branch.branch_id);
        if let Err((inserted, cause)) = self
            .persist_link(new_appointment(appointment_id, &request), &remote_event_id)
            .await
        {
            return Err(self
                .compensate(
                    service.as_ref(),
                    &calendar_id,
                    &remote_event_id,
                    appointment_id,
                    inserted,
                    cause,
                )
                .await);
        }

        Ok(BookingOutcome {
            appointment_id,
            remote_event_id: Some(remote_event_id),
        })
    }

    /// On failure, reports whether the row had already been inserted.
    async fn persist_link(
        &self,
        appointment: NewAppointment,
        remote_event_id: &str,
    ) -> Result<(), (bool, StoreError)> {
        let appointment_id = appointment.appointment_id;
        self.appointments
            .insert(appointment)
            .await
            .map_err(|e| (false, e))?;
        self.appointments
            .link_remote_event(appointment_id, remote_event_id)
            .await
            .map_err(|e| (true, e))
    }

    async fn compensate(
        &self,
        service: &dyn CalendarService,
        calendar_id: &str,
        remote_event_id: &str,
        appointment_id: i64,
        inserted: bool,
        cause: StoreError,
    ) -> ClinicError {
        if !self.compensate_partial_failures {
            error!(
                appointment_id,
                remote_event_id,
                error = %cause,
                "Remote event has no local appointment; reconcile manually"
            );
            return ClinicError::PartiallyFailed {
                remote_event_id: remote_event_id.to_string(),
                compensated: false,
                message: cause.to_string(),
            };
        }

        let remote_undone = match service.delete_event(calendar_id, remote_event_id).await {
            Ok(()) => true,
            Err(err) => {
                error!(appointment_id, remote_event_id, error = %err, "Compensating delete failed");
                false
            }
        };
        let local_undone = if inserted {
            match self.appointments.discard(appointment_id).await {
                Ok(()) => true,
                Err(err) => {
                    error!(appointment_id, error = %err, "Could not discard half-written appointment");
                    false
                }
            }
        } else {
            true
        };

        let compensated = remote_undone && local_undone;
        warn!(
            appointment_id,
            remote_event_id,
            compensated,
            error = %cause,
            "Local write failed after remote event was created"
        );
        ClinicError::PartiallyFailed {
            remote_event_id: remote_event_id.to_string(),
            compensated,
            message: cause.to_string(),
        }
    }

    /// Deletes the remote event, then deactivates the local appointment.
    ///
    /// The local record is kept when the remote delete fails, so the call
    /// can be retried. Cancelling an inactive appointment is a no-op.
    pub async fn cancel(
        &self,
        appointment_id: i64,
        branch_id: i64,
    ) -> Result<CancelOutcome, ClinicError> {
        let link = self
            .appointments
            .get(appointment_id)
            .await?
            .filter(|link| link.branch_id == branch_id)
            .ok_or_else(|| {
                not_found(format!(
                    "appointment {} in branch {}",
                    appointment_id, branch_id
                ))
            })?;

        if !link.active {
            debug!(appointment_id, "Appointment already cancelled");
            return Ok(CancelOutcome {
                deleted: true,
                remote_event_deleted: false,
            });
        }

        let remote_event_deleted = match (&self.remote, link.remote_event_id.as_deref()) {
            (Some(remote), Some(event_id)) => {
                let (calendar_id, service) = remote.open(branch_id).await?;
                service.delete_event(&calendar_id, event_id).await?;
                true
            }
            (None, Some(event_id)) => {
                warn!(
                    appointment_id,
                    remote_event_id = event_id,
                    "Calendar sync is disabled; remote event left in place"
                );
                false
            }
            (_, None) => false,
        };

        self.appointments.deactivate(appointment_id).await?;
        info!(appointment_id, branch_id, remote_event_deleted, "Appointment cancelled");

        Ok(CancelOutcome {
            deleted: true,
            remote_event_deleted,
        })
    }
}

fn new_appointment(appointment_id: i64, request: &BookingRequest) -> NewAppointment {
    NewAppointment {
        appointment_id,
        branch_id: request.branch_id,
        patient_id: request.patient_id,
        start: request.start,
        end: request.end,
        appointment_type: request.appointment_type.clone(),
        attending_staff: request.attending_staff.clone(),
        notes: request.notes.clone(),
    }
}

fn event_draft(
    appointment_id: i64,
    request: &BookingRequest,
    branch: &BranchInfo,
    patient: &PatientContact,
    timezone: Tz,
) -> EventDraft {
    let kind = request
        .appointment_type
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or("Consultation");

    let mut description = vec![
        format!("Patient: {}", patient.name),
        format!("Branch: {}", branch.name),
        format!("Type: {}", kind),
    ];
    if let Some(staff) = request.attending_staff.as_deref().filter(|s| !s.is_empty()) {
        description.push(format!("Staff: {}", staff));
    }
    if let Some(notes) = request.notes.as_deref().filter(|n| !n.is_empty()) {
        description.push(format!("Notes: {}", notes));
    }
    description.push(format!("Appointment ID: {}", appointment_id));

    let attendee_email = patient
        .email
        .as_deref()
        .map(str::trim)
        .filter(|email| is_valid_email(email))
        .map(str::to_string);
    if attendee_email.is_none() && patient.email.is_some() {
        debug!(patient_id = patient.patient_id, "Patient email is not valid, not inviting");
    }

    EventDraft {
        start: request.start,
        end: request.end,
        timezone: timezone.name().to_string(),
        summary: format!("{} - {}", kind, patient.name),
        description: description.join("\n"),
        attendee_email,
        back_reference: EventBackReference {
            appointment_id,
            branch_id: branch.branch_id,
            patient_id: patient.patient_id,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_syntax() {
        assert!(is_valid_email("ana.lopez@example.mx"));
        assert!(is_valid_email("  ana@clinic.example.com "));
        assert!(!is_valid_email("ana"));
        assert!(!is_valid_email("ana@localhost"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("ana@@example.com"));
        assert!(!is_valid_email("ana lopez@example.com"));
        assert!(!is_valid_email("ana@example..com"));
        assert!(!is_valid_email("ana@.example.com"));
    }

    #[test]
    fn test_event_draft_text_and_back_reference() {
        let request = BookingRequest {
            branch_id: 2,
            patient_id: 7,
            start: "2030-06-03T16:00:00Z".parse().unwrap(),
            end: "2030-06-03T16:30:00Z".parse().unwrap(),
            appointment_type: None,
            attending_staff: Some("Dra. Ruiz".into()),
            notes: None,
        };
        let branch = BranchInfo {
            branch_id: 2,
            name: "Cancún".into(),
            state: Some("Quintana Roo".into()),
            city: None,
            timezone_hint: None,
            active: true,
        };
        let patient = PatientContact {
            patient_id: 7,
            name: "Ana López".into(),
            email: Some("not-an-email".into()),
        };

        let draft = event_draft(41, &request, &branch, &patient, Tz::America__Cancun);
        assert_eq!(draft.summary, "Consultation - Ana López");
        assert_eq!(draft.timezone, "America/Cancun");
        assert!(draft.description.contains("Staff: Dra. Ruiz"));
        assert!(!draft.description.contains("Notes:"));
        assert!(draft.description.ends_with("Appointment ID: 41"));
        assert_eq!(draft.attendee_email, None);
        assert_eq!(
            draft.back_reference,
            EventBackReference {
                appointment_id: 41,
                branch_id: 2,
                patient_id: 7
            }
        );
    }

    #[tokio::test]
    async fn test_branch_locks_serialise_same_branch_only() {
        let locks = BranchLocks::default();
        let first = locks.acquire(1).await;
        // a different branch is not blocked
        let _other = locks.acquire(2).await;

        let locks = Arc::new(locks);
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.acquire(1).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(first);
        waiter.await.unwrap();
    }
}
