// --- File: crates/clinic_gcal/src/routes.rs ---

use crate::handlers::{
    book_appointment_handler, cancel_appointment_handler, get_availability_handler,
    oauth_callback_handler, oauth_start_handler, AgendaState,
};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

/// All agenda routes. Nest under `/api` in the service.
pub fn routes(state: Arc<AgendaState>) -> Router {
    Router::new()
        .route("/agenda/availability", get(get_availability_handler))
        .route("/agenda/appointments", post(book_appointment_handler))
        .route(
            "/agenda/appointments/{appointment_id}",
            delete(cancel_appointment_handler),
        )
        .route("/agenda/oauth/start", get(oauth_start_handler))
        .route("/agenda/oauth/callback", get(oauth_callback_handler))
        .with_state(state)
}
