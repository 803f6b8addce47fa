// File: crates/clinic_gcal/src/doc.rs

#![cfg(feature = "openapi")]
use utoipa::OpenApi;

use crate::booking::{BookingOutcome, BookingRequest, CancelOutcome};
use crate::handlers::{AvailabilityResponse, SlotResponse};
use crate::oauth::{AuthorizationGrant, AuthorizationStart};
use clinic_common::RejectionReason;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::get_availability_handler,
        crate::handlers::book_appointment_handler,
        crate::handlers::cancel_appointment_handler,
        crate::handlers::oauth_start_handler,
        crate::handlers::oauth_callback_handler
    ),
    components(
        schemas(
            AvailabilityResponse,
            SlotResponse,
            BookingRequest,
            BookingOutcome,
            CancelOutcome,
            AuthorizationStart,
            AuthorizationGrant,
            RejectionReason
        )
    ),
    tags(
        (name = "Agenda", description = "Appointment availability, booking and cancellation"),
        (name = "Agenda OAuth", description = "Per-branch Google Calendar authorization")
    ),
    servers(
        (url = "/api", description = "Clinic backend")
    )
)]
pub struct AgendaApiDoc;
