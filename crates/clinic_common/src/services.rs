// --- File: crates/clinic_common/src/services.rs ---
//! Collaborator contracts for the scheduling engine.
//!
//! The engine does not own branch, patient or appointment records. It reads
//! and writes them through these traits so storage can be swapped (in-memory
//! for a single instance and tests, a database elsewhere).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

use crate::error::{CalendarError, StoreError};

/// Type alias for a boxed future that returns a Result
pub type BoxFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Location metadata for one clinic branch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchInfo {
    pub branch_id: i64,
    pub name: String,
    pub state: Option<String>,
    pub city: Option<String>,
    /// IANA zone name, preferred over the state/city heuristics when valid.
    pub timezone_hint: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientContact {
    pub patient_id: i64,
    pub name: String,
    pub email: Option<String>,
}

/// A local appointment row as written by the booking flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAppointment {
    pub appointment_id: i64,
    pub branch_id: i64,
    pub patient_id: i64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub appointment_type: Option<String>,
    pub attending_staff: Option<String>,
    pub notes: Option<String>,
}

/// The part of an appointment record the engine reads back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppointmentLink {
    pub appointment_id: i64,
    pub branch_id: i64,
    pub remote_event_id: Option<String>,
    pub active: bool,
}

/// A time range already occupied on the remote calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Correlates a remote event with the local records without a lookup table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventBackReference {
    pub appointment_id: i64,
    pub branch_id: i64,
    pub patient_id: i64,
}

/// Everything needed to create one remote calendar event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventDraft {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// IANA zone the event is displayed in.
    pub timezone: String,
    pub summary: String,
    pub description: String,
    /// Only set for syntactically valid addresses.
    pub attendee_email: Option<String>,
    pub back_reference: EventBackReference,
}

/// Remote calendar operations. Errors are classified before they leave the implementation.
pub trait CalendarService: Send + Sync {
    /// Busy intervals of events overlapping `[start, end)`, ordered by start.
    fn fetch_busy(
        &self,
        calendar_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'_, Vec<BusyInterval>, CalendarError>;

    /// Creates the event and returns the provider's event id.
    fn create_event(
        &self,
        calendar_id: &str,
        event: EventDraft,
    ) -> BoxFuture<'_, String, CalendarError>;

    /// Deletes an event. An event that no longer exists is not an error.
    fn delete_event(&self, calendar_id: &str, event_id: &str) -> BoxFuture<'_, (), CalendarError>;
}

pub trait BranchDirectory: Send + Sync {
    fn branch(&self, branch_id: i64) -> BoxFuture<'_, Option<BranchInfo>, StoreError>;
}

pub trait PatientDirectory: Send + Sync {
    fn patient(&self, patient_id: i64) -> BoxFuture<'_, Option<PatientContact>, StoreError>;
}

/// Persistence for the appointment rows the booking flow creates.
pub trait AppointmentStore: Send + Sync {
    /// Allocates an appointment id without writing a row.
    fn reserve_id(&self) -> BoxFuture<'_, i64, StoreError>;

    fn insert(&self, appointment: NewAppointment) -> BoxFuture<'_, (), StoreError>;

    fn link_remote_event(
        &self,
        appointment_id: i64,
        remote_event_id: &str,
    ) -> BoxFuture<'_, (), StoreError>;

    fn get(&self, appointment_id: i64) -> BoxFuture<'_, Option<AppointmentLink>, StoreError>;

    /// Marks the row inactive. Returns false if it was already inactive.
    fn deactivate(&self, appointment_id: i64) -> BoxFuture<'_, bool, StoreError>;

    /// Hard delete; only used to undo a half-written booking.
    fn discard(&self, appointment_id: i64) -> BoxFuture<'_, (), StoreError>;
}
