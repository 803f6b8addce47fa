// --- File: crates/clinic_common/src/lib.rs ---

pub mod error; // Error taxonomy and HTTP status mapping
pub mod features; // Runtime feature checks
pub mod http; // Axum error responses and outbound HTTP client
pub mod logging; // Tracing subscriber setup
pub mod memory; // In-memory collaborators
pub mod services; // Collaborator traits

pub use error::{
    configuration_missing, internal_error, not_found, rejected, validation_error, CalendarError,
    ClinicError, Context, HttpStatusCode, RejectionReason, StoreError,
};

pub use http::{client::create_client, IntoHttpResponse};

pub use logging::{init, init_with_level, log_error, log_result};

pub use features::{is_feature_enabled, is_gcal_enabled};
