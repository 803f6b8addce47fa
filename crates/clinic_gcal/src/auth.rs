// File: crates/clinic_gcal/src/auth.rs
use async_trait::async_trait;
use clinic_common::services::CalendarService;
use clinic_common::{configuration_missing, CalendarError, ClinicError};
use clinic_config::GcalConfig;
use google_calendar3::{
    hyper_rustls::{self, HttpsConnectorBuilder},
    hyper_util::client::legacy::connect::HttpConnector,
    hyper_util::client::legacy::Client,
    yup_oauth2::{authorized_user::AuthorizedUserSecret, AuthorizedUserAuthenticator},
    CalendarHub,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::oauth::{BranchCredentials, CredentialSource};
use crate::service::GoogleCalendarService;

// Type aliases for clarity
type Connector = hyper_rustls::HttpsConnector<HttpConnector>;

pub type HubType = CalendarHub<Connector>;

/// Builds a Calendar hub that authenticates with an OAuth refresh token.
pub async fn create_calendar_hub(
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<HubType, CalendarError> {
    let secret = AuthorizedUserSecret {
        client_id: client_id.to_string(),
        client_secret: client_secret.to_string(),
        refresh_token: refresh_token.to_string(),
        key_type: "authorized_user".to_string(),
    };

    let auth = AuthorizedUserAuthenticator::builder(secret)
        .build()
        .await
        .map_err(|e| CalendarError::Unknown(format!("failed to build authenticator: {}", e)))?;

    let https = HttpsConnectorBuilder::new()
        .with_native_roots()
        .map_err(|e| CalendarError::Unknown(format!("failed to load TLS roots: {}", e)))?
        .https_or_http()
        .enable_http1()
        .build();

    let client = Client::builder(hyper_util::rt::TokioExecutor::new()).build(https);

    Ok(CalendarHub::new(client, auth))
}

/// Hands out a calendar client acting on behalf of one branch.
#[async_trait]
pub trait CalendarConnector: Send + Sync {
    async fn connect(&self, branch_id: i64) -> Result<Arc<dyn CalendarService>, ClinicError>;
}

/// Credential slot a cached client belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ClientKey {
    Branch(i64),
    Fallback,
}

impl ClientKey {
    pub(crate) fn for_credential(branch_id: i64, source: CredentialSource) -> Self {
        match source {
            CredentialSource::Branch => ClientKey::Branch(branch_id),
            CredentialSource::Fallback => ClientKey::Fallback,
        }
    }
}

struct CachedClient<T> {
    refresh_token: String,
    client: Arc<T>,
}

/// At most one client per credential slot, tagged with the token it was built from.
pub(crate) struct ClientCache<T> {
    entries: HashMap<ClientKey, CachedClient<T>>,
}

impl<T> ClientCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// The cached client, unless the slot's token has changed since it was built.
    pub(crate) fn get(&self, key: ClientKey, refresh_token: &str) -> Option<Arc<T>> {
        self.entries
            .get(&key)
            .filter(|cached| cached.refresh_token == refresh_token)
            .map(|cached| cached.client.clone())
    }

    /// Stores `client` for the slot; returns true when it replaced a stale one.
    pub(crate) fn insert(&mut self, key: ClientKey, refresh_token: String, client: Arc<T>) -> bool {
        self.entries
            .insert(
                key,
                CachedClient {
                    refresh_token,
                    client,
                },
            )
            .is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Google connector with two-tier credential resolution.
///
/// One client is kept per branch token plus one for the shared fallback. A
/// token replaced through the OAuth callback rebuilds the branch's client on
/// its next request and drops the old one.
pub struct GoogleCalendarConnector {
    client_id: String,
    client_secret: String,
    credentials: Arc<BranchCredentials>,
    request_timeout: Duration,
    services: Mutex<ClientCache<GoogleCalendarService>>,
}

impl GoogleCalendarConnector {
    pub fn new(config: &GcalConfig, credentials: Arc<BranchCredentials>) -> Result<Self, ClinicError> {
        let client_id = config
            .client_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| configuration_missing("oauth_client_missing", "gcal.client_id is not set"))?;
        let client_secret = config
            .client_secret
            .clone()
            .filter(|secret| !secret.is_empty())
            .ok_or_else(|| {
                configuration_missing("oauth_client_missing", "gcal.client_secret is not set")
            })?;

        Ok(Self {
            client_id,
            client_secret,
            credentials,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            services: Mutex::new(ClientCache::new()),
        })
    }
}

#[async_trait]
impl CalendarConnector for GoogleCalendarConnector {
    async fn connect(&self, branch_id: i64) -> Result<Arc<dyn CalendarService>, ClinicError> {
        let credential = self.credentials.resolve(branch_id).await.ok_or_else(|| {
            configuration_missing(
                "credential_missing",
                format!(
                    "no refresh token for branch {} and no default_refresh_token configured",
                    branch_id
                ),
            )
        })?;
        if credential.source == CredentialSource::Fallback {
            debug!(branch_id, "Using shared fallback calendar credential");
        }

        let key = ClientKey::for_credential(branch_id, credential.source);
        let mut services = self.services.lock().await;
        if let Some(service) = services.get(key, &credential.refresh_token) {
            return Ok(service);
        }

        let hub = create_calendar_hub(&self.client_id, &self.client_secret, &credential.refresh_token)
            .await?;
        let service = Arc::new(GoogleCalendarService::new(Arc::new(hub), self.request_timeout));
        let replaced = services.insert(key, credential.refresh_token, service.clone());
        info!(
            branch_id,
            replaced,
            cached_clients = services.len(),
            "Created calendar client"
        );
        Ok(service)
    }
}
