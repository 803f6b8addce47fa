// --- File: crates/services/clinic_backend/src/app_state.rs ---
use axum::{routing::get, Router};
use clinic_common::memory::InMemoryAppointmentStore;
use clinic_common::ClinicError;
use clinic_config::AppConfig;
use clinic_gcal::handlers::AgendaState;
use clinic_gcal::routes as agenda_routes;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub agenda: Arc<AgendaState>,
}

impl AppState {
    /// Builds the agenda engine over the seeded directories and an
    /// in-memory appointment store.
    pub fn new(config: Arc<AppConfig>) -> Result<Self, ClinicError> {
        let agenda = AgendaState::from_seeds(&config, Arc::new(InMemoryAppointmentStore::new()))?;
        info!(
            branches = config.branches.len(),
            patients = config.patients.len(),
            calendar_sync = agenda.coordinator.calendar_sync_enabled(),
            oauth = agenda.oauth.is_some(),
            "Agenda state ready"
        );
        Ok(Self {
            config,
            agenda: Arc::new(agenda),
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }

    /// The `/api` router with request tracing.
    pub fn router(&self) -> Router {
        let api_router = Router::new()
            .route("/", get(|| async { "Welcome to the clinic agenda API!" }))
            .merge(agenda_routes::routes(self.agenda.clone()));

        Router::new()
            .nest("/api", api_router)
            .layer(TraceLayer::new_for_http())
    }
}
