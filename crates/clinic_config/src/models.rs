// --- File: crates/clinic_config/src/models.rs ---

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// --- General Server Config ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

// --- Business calendar ---
/// Process-wide business hours shared by slot generation and booking validation.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScheduleConfig {
    #[serde(default = "default_open_hour")]
    pub open_hour: u32,
    #[serde(default = "default_close_hour")]
    pub close_hour: u32,
    #[serde(default = "default_step_minutes")]
    pub step_minutes: u32,
    /// 0 = Monday .. 6 = Sunday
    #[serde(default = "default_workdays")]
    pub workdays: Vec<u8>,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    /// Serialize check-and-create per branch inside this process.
    #[serde(default = "default_true")]
    pub serialize_bookings: bool,
    /// Undo the remote event when the local write fails after it was created.
    #[serde(default = "default_true")]
    pub compensate_partial_failures: bool,
}

fn default_open_hour() -> u32 {
    10
}
fn default_close_hour() -> u32 {
    20
}
fn default_step_minutes() -> u32 {
    30
}
fn default_workdays() -> Vec<u8> {
    vec![0, 1, 2, 3, 4, 5]
}
fn default_timezone() -> String {
    "America/Mexico_City".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            open_hour: default_open_hour(),
            close_hour: default_close_hour(),
            step_minutes: default_step_minutes(),
            workdays: default_workdays(),
            default_timezone: default_timezone(),
            serialize_bookings: true,
            compensate_partial_failures: true,
        }
    }
}

// --- Google Calendar Config ---
// Secrets (client_secret, refresh tokens) are usually given as "secret_from_env"
// and resolved by `apply_env_overrides_from_marker`.
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GcalConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_url: Option<String>,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    /// Shared account used by branches without their own token.
    pub default_refresh_token: Option<String>,
    pub default_calendar_id: Option<String>,
    /// Branch id (as string key) -> calendar id.
    #[serde(default)]
    pub calendar_ids: HashMap<String, String>,
    /// Branch id (as string key) -> refresh token.
    #[serde(default)]
    pub refresh_tokens: HashMap<String, String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_state_ttl_minutes")]
    pub state_ttl_minutes: i64,
}

fn default_auth_url() -> String {
    "https://accounts.google.com/o/oauth2/v2/auth".to_string()
}
fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_scopes() -> Vec<String> {
    vec!["https://www.googleapis.com/auth/calendar".to_string()]
}
fn default_request_timeout_secs() -> u64 {
    25
}
fn default_state_ttl_minutes() -> i64 {
    15
}

impl Default for GcalConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_url: None,
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            scopes: default_scopes(),
            default_refresh_token: None,
            default_calendar_id: None,
            calendar_ids: HashMap::new(),
            refresh_tokens: HashMap::new(),
            request_timeout_secs: default_request_timeout_secs(),
            state_ttl_minutes: default_state_ttl_minutes(),
        }
    }
}

impl GcalConfig {
    pub fn calendar_id_for(&self, branch_id: i64) -> Option<&str> {
        self.calendar_ids
            .get(&branch_id.to_string())
            .or(self.default_calendar_id.as_ref())
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Branch tokens keyed by numeric id; entries with non-numeric keys are skipped.
    pub fn branch_refresh_tokens(&self) -> HashMap<i64, String> {
        self.refresh_tokens
            .iter()
            .filter_map(|(k, v)| {
                let id = k.trim().parse::<i64>().ok()?;
                (!v.is_empty()).then(|| (id, v.clone()))
            })
            .collect()
    }
}

// --- Development seeds for the in-memory directories ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BranchSeed {
    pub branch_id: i64,
    pub name: String,
    pub state: Option<String>,
    pub city: Option<String>,
    pub timezone_hint: Option<String>,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PatientSeed {
    pub patient_id: i64,
    pub name: String,
    pub email: Option<String>,
}

// --- Unified App Configuration ---
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,

    /// Remote calendar sync; when off, slots come from business hours alone.
    #[serde(default)]
    pub use_gcal: bool,

    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub gcal: Option<GcalConfig>,

    #[serde(default)]
    pub branches: Vec<BranchSeed>,
    #[serde(default)]
    pub patients: Vec<PatientSeed>,
}
