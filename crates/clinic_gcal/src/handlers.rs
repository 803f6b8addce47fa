// File: crates/clinic_gcal/src/handlers.rs
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use clinic_common::memory::{InMemoryBranchDirectory, InMemoryPatientDirectory};
use clinic_common::services::{AppointmentStore, BranchDirectory, PatientDirectory};
use clinic_common::{configuration_missing, is_gcal_enabled, validation_error, ClinicError};
use clinic_config::AppConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::auth::GoogleCalendarConnector;
use crate::booking::{
    BookingCoordinator, BookingOutcome, BookingRequest, CancelOutcome, DayAvailability, RemoteSync,
};
use crate::oauth::{
    AuthorizationGrant, AuthorizationStart, BranchCredentials, GoogleTokenExchanger,
    InMemoryPendingStateStore, OAuthFlow, OAuthSettings,
};

// Shared state for the agenda handlers
pub struct AgendaState {
    pub coordinator: Arc<BookingCoordinator>,
    /// `None` when no OAuth client is configured.
    pub oauth: Option<Arc<OAuthFlow>>,
}

impl AgendaState {
    /// Wires the engine from configuration and the record collaborators.
    ///
    /// The OAuth flow and the calendar connector share one credential store,
    /// so a token stored by the callback is used on the branch's next request.
    pub fn from_config(
        config: &AppConfig,
        branches: Arc<dyn BranchDirectory>,
        patients: Arc<dyn PatientDirectory>,
        appointments: Arc<dyn AppointmentStore>,
    ) -> Result<Self, ClinicError> {
        let mut coordinator =
            BookingCoordinator::new(&config.schedule, branches, patients, appointments)?;
        let mut oauth = None;

        if let Some(gcal) = config.gcal.as_ref() {
            let credentials = Arc::new(BranchCredentials::from_config(gcal));

            if is_gcal_enabled(config) {
                let connector = GoogleCalendarConnector::new(gcal, credentials.clone())?;
                coordinator =
                    coordinator.with_remote_sync(RemoteSync::new(Arc::new(connector), gcal.clone()));
                info!("Remote calendar sync enabled");
            }

            match (OAuthSettings::from_config(gcal), GoogleTokenExchanger::new(gcal)) {
                (Ok(settings), Ok(exchanger)) => {
                    oauth = Some(Arc::new(OAuthFlow::new(
                        settings,
                        Arc::new(InMemoryPendingStateStore::new()),
                        credentials,
                        Arc::new(exchanger),
                    )));
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "OAuth client incomplete, branch authorization disabled");
                }
            }
        }

        Ok(Self {
            coordinator: Arc::new(coordinator),
            oauth,
        })
    }

    /// Engine over the seeded in-memory directories.
    pub fn from_seeds(
        config: &AppConfig,
        appointments: Arc<dyn AppointmentStore>,
    ) -> Result<Self, ClinicError> {
        Self::from_config(
            config,
            Arc::new(InMemoryBranchDirectory::from_seeds(&config.branches)),
            Arc::new(InMemoryPatientDirectory::from_seeds(&config.patients)),
            appointments,
        )
    }

    fn oauth(&self) -> Result<&OAuthFlow, ClinicError> {
        self.oauth.as_deref().ok_or_else(|| {
            configuration_missing(
                "oauth_not_configured",
                "gcal.client_id, gcal.client_secret and gcal.redirect_url are required",
            )
        })
    }
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct AvailabilityQuery {
    pub branch_id: i64,
    /// YYYY-MM-DD, in the branch's local calendar
    pub date: String,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SlotResponse {
    /// RFC 3339 with the branch's offset
    pub start: String,
    pub end: String,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AvailabilityResponse {
    pub timezone: String,
    pub date: String,
    pub slots: Vec<SlotResponse>,
    pub closed: bool,
    pub calendar_sync: bool,
}

impl From<DayAvailability> for AvailabilityResponse {
    fn from(day: DayAvailability) -> Self {
        Self {
            timezone: day.timezone.name().to_string(),
            date: day.date.format("%Y-%m-%d").to_string(),
            slots: day
                .slots
                .into_iter()
                .map(|slot| SlotResponse {
                    start: slot.start.to_rfc3339(),
                    end: slot.end.to_rfc3339(),
                    label: slot.label,
                })
                .collect(),
            closed: day.closed,
            calendar_sync: day.calendar_sync,
        }
    }
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct CancelQuery {
    pub branch_id: i64,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct OAuthStartQuery {
    pub branch_id: i64,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
pub struct OAuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    /// Set by the provider when the user denied access.
    pub error: Option<String>,
}

/// Free slots for one branch day.
#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/agenda/availability",
    params(AvailabilityQuery),
    responses(
        (status = 200, description = "Free slots in chronological order", body = AvailabilityResponse),
        (status = 400, description = "Invalid date, duration or unknown branch"),
        (status = 502, description = "Calendar provider refused the credential"),
        (status = 503, description = "Calendar provider unavailable, retry")
    ),
    tag = "Agenda"
))]
pub async fn get_availability_handler(
    State(state): State<Arc<AgendaState>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<AvailabilityResponse>, ClinicError> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| validation_error("Invalid date format (YYYY-MM-DD)"))?;

    let day = state
        .coordinator
        .availability(query.branch_id, date, query.duration_minutes)
        .await?;
    Ok(Json(day.into()))
}

/// Books an appointment, creating the remote event first when sync is enabled.
#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/agenda/appointments",
    request_body = BookingRequest,
    responses(
        (status = 201, description = "Appointment booked", body = BookingOutcome),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "The window is no longer available"),
        (status = 422, description = "Closed day, outside business hours, crosses midnight or in the past"),
        (status = 500, description = "Partially failed; see remote_event_id and compensated"),
        (status = 503, description = "Calendar provider unavailable, retry")
    ),
    tag = "Agenda"
))]
pub async fn book_appointment_handler(
    State(state): State<Arc<AgendaState>>,
    Json(payload): Json<BookingRequest>,
) -> Result<(StatusCode, Json<BookingOutcome>), ClinicError> {
    let outcome = state.coordinator.book(payload).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    delete,
    path = "/agenda/appointments/{appointment_id}",
    params(
        ("appointment_id" = i64, Path, description = "Appointment to cancel"),
        CancelQuery
    ),
    responses(
        (status = 200, description = "Appointment cancelled", body = CancelOutcome),
        (status = 404, description = "No such appointment in this branch"),
        (status = 503, description = "Remote delete failed; the appointment was kept")
    ),
    tag = "Agenda"
))]
pub async fn cancel_appointment_handler(
    State(state): State<Arc<AgendaState>>,
    Path(appointment_id): Path<i64>,
    Query(query): Query<CancelQuery>,
) -> Result<Json<CancelOutcome>, ClinicError> {
    let outcome = state
        .coordinator
        .cancel(appointment_id, query.branch_id)
        .await?;
    Ok(Json(outcome))
}

#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/agenda/oauth/start",
    params(OAuthStartQuery),
    responses(
        (status = 200, description = "URL to send the operator to", body = AuthorizationStart),
        (status = 500, description = "OAuth client not configured")
    ),
    tag = "Agenda OAuth"
))]
pub async fn oauth_start_handler(
    State(state): State<Arc<AgendaState>>,
    Query(query): Query<OAuthStartQuery>,
) -> Result<Json<AuthorizationStart>, ClinicError> {
    let start = state.oauth()?.begin(query.branch_id).await?;
    Ok(Json(start))
}

/// Provider redirect target. Returns the refresh token for the operator to persist.
#[axum::debug_handler]
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/agenda/oauth/callback",
    params(OAuthCallbackQuery),
    responses(
        (status = 200, description = "Branch authorized", body = AuthorizationGrant),
        (status = 400, description = "State unknown, used, tampered with or expired"),
        (status = 502, description = "Token endpoint rejected the code")
    ),
    tag = "Agenda OAuth"
))]
pub async fn oauth_callback_handler(
    State(state): State<Arc<AgendaState>>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Json<AuthorizationGrant>, ClinicError> {
    if let Some(error) = query.error {
        return Err(validation_error(format!(
            "authorization was not granted: {}",
            error
        )));
    }
    let (Some(code), Some(oauth_state)) = (query.code, query.state) else {
        return Err(validation_error("callback requires code and state"));
    };

    let grant = state.oauth()?.complete(&code, &oauth_state).await?;
    Ok(Json(grant))
}
