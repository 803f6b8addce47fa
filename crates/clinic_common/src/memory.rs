// --- File: crates/clinic_common/src/memory.rs ---
//! In-memory collaborators for single-instance deployments and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;

use clinic_config::{BranchSeed, PatientSeed};

use crate::error::StoreError;
use crate::services::{
    AppointmentLink, AppointmentStore, BoxFuture, BranchDirectory, BranchInfo, NewAppointment,
    PatientContact, PatientDirectory,
};

fn poisoned() -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[derive(Debug, Default)]
pub struct InMemoryBranchDirectory {
    branches: HashMap<i64, BranchInfo>,
}

impl InMemoryBranchDirectory {
    pub fn new(branches: impl IntoIterator<Item = BranchInfo>) -> Self {
        Self {
            branches: branches.into_iter().map(|b| (b.branch_id, b)).collect(),
        }
    }

    pub fn from_seeds(seeds: &[BranchSeed]) -> Self {
        Self::new(seeds.iter().map(|seed| BranchInfo {
            branch_id: seed.branch_id,
            name: seed.name.clone(),
            state: seed.state.clone(),
            city: seed.city.clone(),
            timezone_hint: seed.timezone_hint.clone(),
            active: seed.active,
        }))
    }
}

impl BranchDirectory for InMemoryBranchDirectory {
    fn branch(&self, branch_id: i64) -> BoxFuture<'_, Option<BranchInfo>, StoreError> {
        let found = self.branches.get(&branch_id).cloned();
        Box::pin(async move { Ok(found) })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPatientDirectory {
    patients: HashMap<i64, PatientContact>,
}

impl InMemoryPatientDirectory {
    pub fn new(patients: impl IntoIterator<Item = PatientContact>) -> Self {
        Self {
            patients: patients.into_iter().map(|p| (p.patient_id, p)).collect(),
        }
    }

    pub fn from_seeds(seeds: &[PatientSeed]) -> Self {
        Self::new(seeds.iter().map(|seed| PatientContact {
            patient_id: seed.patient_id,
            name: seed.name.clone(),
            email: seed.email.clone(),
        }))
    }
}

impl PatientDirectory for InMemoryPatientDirectory {
    fn patient(&self, patient_id: i64) -> BoxFuture<'_, Option<PatientContact>, StoreError> {
        let found = self.patients.get(&patient_id).cloned();
        Box::pin(async move { Ok(found) })
    }
}

#[derive(Debug, Clone)]
struct StoredAppointment {
    appointment: NewAppointment,
    remote_event_id: Option<String>,
    active: bool,
}

/// Appointment rows keyed by id, with a sequence for [`AppointmentStore::reserve_id`].
#[derive(Debug)]
pub struct InMemoryAppointmentStore {
    next_id: AtomicI64,
    rows: RwLock<HashMap<i64, StoredAppointment>>,
}

impl Default for InMemoryAppointmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            rows: RwLock::new(HashMap::new()),
        }
    }

    /// Number of rows, active or not.
    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows that are still active, ordered by start.
    pub fn active_appointments(&self) -> Vec<NewAppointment> {
        let mut active: Vec<NewAppointment> = self
            .rows
            .read()
            .map(|rows| {
                rows.values()
                    .filter(|row| row.active)
                    .map(|row| row.appointment.clone())
                    .collect()
            })
            .unwrap_or_default();
        active.sort_by_key(|a| a.start);
        active
    }
}

impl AppointmentStore for InMemoryAppointmentStore {
    fn reserve_id(&self) -> BoxFuture<'_, i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move { Ok(id) })
    }

    fn insert(&self, appointment: NewAppointment) -> BoxFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut rows = self.rows.write().map_err(|_| poisoned())?;
            if rows.contains_key(&appointment.appointment_id) {
                return Err(StoreError::Conflict(format!(
                    "appointment {} already exists",
                    appointment.appointment_id
                )));
            }
            rows.insert(
                appointment.appointment_id,
                StoredAppointment {
                    appointment,
                    remote_event_id: None,
                    active: true,
                },
            );
            Ok(())
        })
    }

    fn link_remote_event(
        &self,
        appointment_id: i64,
        remote_event_id: &str,
    ) -> BoxFuture<'_, (), StoreError> {
        let remote_event_id = remote_event_id.to_string();
        Box::pin(async move {
            let mut rows = self.rows.write().map_err(|_| poisoned())?;
            let row = rows.get_mut(&appointment_id).ok_or_else(|| {
                StoreError::NotFound(format!("appointment {}", appointment_id))
            })?;
            row.remote_event_id = Some(remote_event_id);
            Ok(())
        })
    }

    fn get(&self, appointment_id: i64) -> BoxFuture<'_, Option<AppointmentLink>, StoreError> {
        Box::pin(async move {
            let rows = self.rows.read().map_err(|_| poisoned())?;
            Ok(rows.get(&appointment_id).map(|row| AppointmentLink {
                appointment_id,
                branch_id: row.appointment.branch_id,
                remote_event_id: row.remote_event_id.clone(),
                active: row.active,
            }))
        })
    }

    fn deactivate(&self, appointment_id: i64) -> BoxFuture<'_, bool, StoreError> {
        Box::pin(async move {
            let mut rows = self.rows.write().map_err(|_| poisoned())?;
            let row = rows.get_mut(&appointment_id).ok_or_else(|| {
                StoreError::NotFound(format!("appointment {}", appointment_id))
            })?;
            let was_active = row.active;
            row.active = false;
            Ok(was_active)
        })
    }

    fn discard(&self, appointment_id: i64) -> BoxFuture<'_, (), StoreError> {
        Box::pin(async move {
            let mut rows = self.rows.write().map_err(|_| poisoned())?;
            rows.remove(&appointment_id);
            Ok(())
        })
    }
}
