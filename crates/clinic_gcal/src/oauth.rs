// --- File: crates/clinic_gcal/src/oauth.rs ---
//! Per-branch Google authorization.
//!
//! `begin` issues an authorization URL whose `state` carries a single-use
//! nonce; `complete` consumes that nonce, exchanges the code and stores the
//! refresh token for the branch. Pending states and tokens live behind
//! store traits so a shared cache can replace the in-memory maps.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use clinic_common::{configuration_missing, validation_error, CalendarError, ClinicError};
use clinic_config::GcalConfig;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::OAuthError;
use crate::service::classify_message;

const NONCE_BYTES: usize = 32;

/// An issued but not yet consumed authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingState {
    pub nonce: String,
    pub branch_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Short-lived, branch-scoped authorization state.
#[async_trait]
pub trait PendingStateStore: Send + Sync {
    async fn get(&self, nonce: &str) -> Option<PendingState>;
    async fn put(&self, state: PendingState);
    /// Removes and returns the record; at most one caller observes `Some`.
    async fn delete(&self, nonce: &str) -> Option<PendingState>;
    /// Drops records created before `cutoff`. Returns how many were dropped.
    async fn sweep(&self, cutoff: DateTime<Utc>) -> usize;
}

/// Branch refresh tokens.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, branch_id: i64) -> Option<String>;
    async fn put(&self, branch_id: i64, refresh_token: String);
    async fn delete(&self, branch_id: i64) -> Option<String>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
pub struct InMemoryPendingStateStore {
    states: Mutex<HashMap<String, PendingState>>,
}

impl InMemoryPendingStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.states).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PendingStateStore for InMemoryPendingStateStore {
    async fn get(&self, nonce: &str) -> Option<PendingState> {
        lock(&self.states).get(nonce).cloned()
    }

    async fn put(&self, state: PendingState) {
        lock(&self.states).insert(state.nonce.clone(), state);
    }

    async fn delete(&self, nonce: &str) -> Option<PendingState> {
        lock(&self.states).remove(nonce)
    }

    async fn sweep(&self, cutoff: DateTime<Utc>) -> usize {
        let mut states = lock(&self.states);
        let before = states.len();
        states.retain(|_, state| state.created_at >= cutoff);
        before - states.len()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    tokens: Mutex<HashMap<i64, String>>,
}

impl InMemoryTokenStore {
    pub fn new(tokens: HashMap<i64, String>) -> Self {
        Self {
            tokens: Mutex::new(tokens),
        }
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn get(&self, branch_id: i64) -> Option<String> {
        lock(&self.tokens).get(&branch_id).cloned()
    }

    async fn put(&self, branch_id: i64, refresh_token: String) {
        lock(&self.tokens).insert(branch_id, refresh_token);
    }

    async fn delete(&self, branch_id: i64) -> Option<String> {
        lock(&self.tokens).remove(&branch_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Branch,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub refresh_token: String,
    pub source: CredentialSource,
}

/// Branch token first, shared fallback token second.
pub struct BranchCredentials {
    store: Arc<dyn TokenStore>,
    fallback: Option<String>,
}

impl BranchCredentials {
    pub fn new(store: Arc<dyn TokenStore>, fallback: Option<String>) -> Self {
        Self {
            store,
            fallback: fallback.filter(|token| !token.is_empty()),
        }
    }

    /// Seeds an in-memory store from `gcal.refresh_tokens` and `gcal.default_refresh_token`.
    pub fn from_config(config: &GcalConfig) -> Self {
        Self::new(
            Arc::new(InMemoryTokenStore::new(config.branch_refresh_tokens())),
            config.default_refresh_token.clone(),
        )
    }

    pub async fn resolve(&self, branch_id: i64) -> Option<ResolvedCredential> {
        if let Some(token) = self.store.get(branch_id).await.filter(|t| !t.is_empty()) {
            return Some(ResolvedCredential {
                refresh_token: token,
                source: CredentialSource::Branch,
            });
        }
        self.fallback.clone().map(|token| ResolvedCredential {
            refresh_token: token,
            source: CredentialSource::Fallback,
        })
    }

    /// Stores a branch token, replacing any previous one.
    pub async fn store(&self, branch_id: i64, refresh_token: String) {
        self.store.put(branch_id, refresh_token).await;
    }
}

/// Exchanges an authorization code for a refresh token.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange_code(&self, code: &str) -> Result<String, CalendarError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

/// Token endpoint client for the authorization-code grant.
pub struct GoogleTokenExchanger {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_url: String,
}

impl GoogleTokenExchanger {
    pub fn new(config: &GcalConfig) -> Result<Self, ClinicError> {
        let client = clinic_common::create_client(config.request_timeout_secs, false)
            .map_err(|e| clinic_common::internal_error(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            token_url: config.token_url.clone(),
            client_id: required(&config.client_id, "gcal.client_id")?,
            client_secret: required(&config.client_secret, "gcal.client_secret")?,
            redirect_url: required(&config.redirect_url, "gcal.redirect_url")?,
        })
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, ClinicError> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| configuration_missing("oauth_client_missing", format!("{} is not set", name)))
}

pub(crate) fn classify_token_error(status: u16, error: &str, description: &str) -> CalendarError {
    let message = if description.is_empty() {
        error.to_string()
    } else {
        format!("{}: {}", error, description)
    };
    match error {
        "invalid_grant" => CalendarError::CredentialRejected(message),
        "invalid_client" | "unauthorized_client" => CalendarError::Unauthorized(message),
        _ if status == 429 || status >= 500 => CalendarError::ServiceUnavailable(message),
        _ => classify_message(&message),
    }
}

#[async_trait]
impl TokenExchanger for GoogleTokenExchanger {
    async fn exchange_code(&self, code: &str) -> Result<String, CalendarError> {
        let form = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_url.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self
            .client
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    CalendarError::ServiceUnavailable(format!("token endpoint: {}", e))
                } else {
                    CalendarError::Unknown(format!("token endpoint: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) => classify_token_error(
                    status.as_u16(),
                    &err.error,
                    err.error_description.as_deref().unwrap_or_default(),
                ),
                Err(_) if status.is_server_error() => {
                    CalendarError::ServiceUnavailable(format!("token endpoint returned {}", status))
                }
                Err(_) => CalendarError::Unknown(format!("token endpoint returned {}", status)),
            });
        }

        let tokens: TokenResponse = response
            .json()
            .await
            .map_err(|e| CalendarError::Unknown(format!("unreadable token response: {}", e)))?;

        tokens.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            CalendarError::Unknown(
                "token response has no refresh_token; revoke the app's access and authorize again"
                    .to_string(),
            )
        })
    }
}

/// What travels in the provider's opaque `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub branch_id: i64,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

impl StatePayload {
    pub fn encode(&self) -> Result<String, ClinicError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| clinic_common::internal_error(format!("state encoding: {}", e)))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(state: &str) -> Result<Self, OAuthError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(state.trim())
            .map_err(|e| OAuthError::MalformedState(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| OAuthError::MalformedState(e.to_string()))
    }
}

fn generate_nonce() -> String {
    let mut rng = rand::thread_rng();
    let random_bytes: Vec<u8> = (0..NONCE_BYTES).map(|_| rng.gen()).collect();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuthorizationStart {
    pub authorization_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AuthorizationGrant {
    pub refresh_token: String,
    pub branch_id: i64,
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub redirect_url: String,
    pub auth_url: String,
    pub scopes: Vec<String>,
    pub state_ttl: Duration,
}

impl OAuthSettings {
    pub fn from_config(config: &GcalConfig) -> Result<Self, ClinicError> {
        Ok(Self {
            client_id: required(&config.client_id, "gcal.client_id")?,
            redirect_url: required(&config.redirect_url, "gcal.redirect_url")?,
            auth_url: config.auth_url.clone(),
            scopes: config.scopes.clone(),
            state_ttl: Duration::minutes(config.state_ttl_minutes),
        })
    }
}

pub struct OAuthFlow {
    settings: OAuthSettings,
    pending: Arc<dyn PendingStateStore>,
    credentials: Arc<BranchCredentials>,
    exchanger: Arc<dyn TokenExchanger>,
}

impl OAuthFlow {
    pub fn new(
        settings: OAuthSettings,
        pending: Arc<dyn PendingStateStore>,
        credentials: Arc<BranchCredentials>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Self {
        Self {
            settings,
            pending,
            credentials,
            exchanger,
        }
    }

    pub async fn begin(&self, branch_id: i64) -> Result<AuthorizationStart, ClinicError> {
        self.begin_at(branch_id, Utc::now()).await
    }

    pub async fn complete(&self, code: &str, state: &str) -> Result<AuthorizationGrant, ClinicError> {
        self.complete_at(code, state, Utc::now()).await
    }

    async fn sweep(&self, now: DateTime<Utc>) {
        let dropped = self.pending.sweep(now - self.settings.state_ttl).await;
        if dropped > 0 {
            debug!(dropped, "Swept expired OAuth states");
        }
    }

    /// Issues an authorization URL for `branch_id` as of `now`.
    pub async fn begin_at(
        &self,
        branch_id: i64,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationStart, ClinicError> {
        if branch_id <= 0 {
            return Err(validation_error(format!("invalid branch_id {}", branch_id)));
        }
        self.sweep(now).await;

        let payload = StatePayload {
            branch_id,
            nonce: generate_nonce(),
            created_at: now,
        };
        let state = payload.encode()?;
        self.pending
            .put(PendingState {
                nonce: payload.nonce,
                branch_id,
                created_at: now,
            })
            .await;

        let scope = self.settings.scopes.join(" ");
        let query = serde_urlencoded::to_string([
            ("client_id", self.settings.client_id.as_str()),
            ("redirect_uri", self.settings.redirect_url.as_str()),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("include_granted_scopes", "true"),
            ("state", state.as_str()),
        ])
        .map_err(|e| clinic_common::internal_error(format!("authorization URL: {}", e)))?;

        info!(branch_id, "Issued calendar authorization URL");
        Ok(AuthorizationStart {
            authorization_url: format!("{}?{}", self.settings.auth_url, query),
        })
    }

    /// Consumes `state` and exchanges `code`, as of `now`.
    ///
    /// The nonce is deleted before any other check or the exchange, so a
    /// state can be presented successfully at most once.
    pub async fn complete_at(
        &self,
        code: &str,
        state: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationGrant, ClinicError> {
        let payload = StatePayload::decode(state)?;
        let record = self.pending.delete(&payload.nonce).await;
        // swept after the lookup; an aged-out state still reaches the TTL check
        self.sweep(now).await;
        let record = record.ok_or(OAuthError::UnknownNonce)?;

        if record.branch_id != payload.branch_id {
            warn!(
                issued = record.branch_id,
                claimed = payload.branch_id,
                "OAuth state branch mismatch"
            );
            return Err(OAuthError::BranchMismatch {
                issued: record.branch_id,
                claimed: payload.branch_id,
            }
            .into());
        }
        let age = now - record.created_at;
        if age > self.settings.state_ttl {
            return Err(OAuthError::Expired {
                age_minutes: age.num_minutes(),
            }
            .into());
        }
        if code.trim().is_empty() {
            return Err(validation_error("authorization code is empty"));
        }

        let refresh_token = self.exchanger.exchange_code(code).await?;
        self.credentials
            .store(record.branch_id, refresh_token.clone())
            .await;
        info!(branch_id = record.branch_id, "Stored refresh token for branch");

        Ok(AuthorizationGrant {
            refresh_token,
            branch_id: record.branch_id,
        })
    }
}
