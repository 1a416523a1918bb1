//! Authenticated request gateway: bearer attachment and single-flight token refresh

use crate::error::{ClientError, RefreshError, Result};
use crate::token_store::CredentialStore;
use crate::transport::{parse_base_url, ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::types::{AuthTokens, RefreshRequest, RefreshResponse};
use reqwest::StatusCode;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/";
const DEFAULT_REFRESH_PATH: &str = "auth/refresh/";
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 30;

/// Configuration for the gateway
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// API root every request path is resolved against
    pub base_url: String,

    /// Path of the refresh endpoint, relative to `base_url`
    /// Default: `auth/refresh/`
    pub refresh_path: String,

    /// Upper bound on a refresh call; `None` waits forever
    /// Default: 30 seconds
    pub refresh_timeout: Option<Duration>,

    /// Per-request timeout applied by the HTTP transport
    pub request_timeout: Option<Duration>,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            refresh_timeout: Some(Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS)),
            request_timeout: None,
        }
    }

    /// Read configuration from the environment
    ///
    /// * `VENDOR_API_BASE_URL` - API root (default `http://localhost:8000/api/`)
    /// * `VENDOR_REFRESH_TIMEOUT_SECS` - refresh timeout, `0` disables it
    /// * `VENDOR_REQUEST_TIMEOUT_SECS` - per-request timeout, unset or `0` disables it
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("VENDOR_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        parse_base_url(&base_url)?;

        let mut config = Self::new(base_url);
        if let Some(secs) = env_secs("VENDOR_REFRESH_TIMEOUT_SECS")? {
            config.refresh_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(secs) = env_secs("VENDOR_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(config)
    }

    pub fn with_refresh_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.refresh_timeout = timeout;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

fn env_secs(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ClientError::Configuration(format!("{name} must be a number of seconds: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Notified when a refresh fails for good and the session is over
///
/// Implemented for any `Fn(&RefreshError)` closure.
pub trait SessionListener: Send + Sync + 'static {
    fn on_logout(&self, reason: &RefreshError);
}

impl<F> SessionListener for F
where
    F: Fn(&RefreshError) + Send + Sync + 'static,
{
    fn on_logout(&self, reason: &RefreshError) {
        self(reason)
    }
}

type RefreshOutcome = std::result::Result<String, RefreshError>;
type Waiter = oneshot::Sender<RefreshOutcome>;

enum RefreshState {
    /// `last_failure` is kept so late 401s of a failed episode share its outcome
    Idle { last_failure: Option<FailedEpisode> },
    /// A refresh call is outstanding; requests failing meanwhile wait here in arrival order
    Refreshing { waiters: VecDeque<Waiter> },
}

/// The access token an episode failed to renew, and why
#[derive(Debug, Clone)]
struct FailedEpisode {
    rejected_token: Option<String>,
    error: RefreshError,
}

/// What a request that got a 401 should do next
enum Entry {
    /// Another task is refreshing; wait for its outcome
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// This task runs the refresh
    Lead,
    /// The episode this 401 belongs to has already settled
    Settled(Result<String>),
}

/// Wraps a transport so every request carries the stored access token
///
/// A 401 triggers one refresh shared by every request that fails while it is
/// in flight; those requests are replayed with the new token. When the
/// refresh fails, all of them fail with the same error, the credentials are
/// cleared and the session listener is told.
pub struct AuthGateway<T, S> {
    config: GatewayConfig,
    transport: T,
    store: S,
    state: Mutex<RefreshState>,
    listener: Option<Arc<dyn SessionListener>>,
}

impl<S: CredentialStore> AuthGateway<HttpTransport, S> {
    /// Create a gateway talking HTTP to `config.base_url`
    pub fn connect(config: GatewayConfig, store: S) -> Result<Self> {
        let transport = HttpTransport::new(&config.base_url, config.request_timeout)?;
        Ok(Self::new(config, transport, store))
    }
}

impl<T: Transport, S: CredentialStore> AuthGateway<T, S> {
    pub fn new(config: GatewayConfig, transport: T, store: S) -> Self {
        Self {
            config,
            transport,
            store,
            state: Mutex::new(RefreshState::Idle { last_failure: None }),
            listener: None,
        }
    }

    /// Register the callback invoked on terminal refresh failure
    pub fn with_session_listener(mut self, listener: impl SessionListener) -> Self {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send an authenticated request
    ///
    /// Non-2xx responses come back as `ClientError::Status`. A 401 is retried
    /// once after a token refresh; a second 401 is returned as is.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        if let Some(token) = self.store.access_token() {
            request.set_bearer(&token)?;
        }

        let response = self.transport.send(&request).await?;
        if response.status != StatusCode::UNAUTHORIZED || request.is_retried() {
            return response.error_for_status();
        }

        // Marked before queuing so a replay that fails again never re-enters
        request.mark_retried();
        let sent_with = request.bearer_token().map(str::to_owned);
        let token = self.fresh_access_token(sent_with.as_deref()).await?;

        request.set_bearer(&token)?;
        debug!(method = %request.method, path = %request.path, "Replaying request with refreshed token");
        self.transport.send(&request).await?.error_for_status()
    }

    /// Send a request without credentials (login, signup)
    pub async fn send_public(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.transport.send(&request).await?.error_for_status()
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.send(ApiRequest::post(path).json(body)?).await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<ApiResponse> {
        self.send(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Whether a refresh call is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Number of requests waiting on the outstanding refresh
    pub fn queued_requests(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Refreshing { waiters } => waiters.len(),
            RefreshState::Idle { .. } => 0,
        }
    }

    /// Obtain a token newer than `sent_with`, joining the outstanding refresh if there is one
    async fn fresh_access_token(&self, sent_with: Option<&str>) -> Result<String> {
        match self.enter_episode(sent_with) {
            Entry::Wait(rx) => match rx.await {
                Ok(outcome) => outcome.map_err(ClientError::from),
                Err(_) => Err(RefreshError::Abandoned.into()),
            },
            Entry::Lead => self.lead_refresh(sent_with).await,
            Entry::Settled(outcome) => outcome,
        }
    }

    fn enter_episode(&self, sent_with: Option<&str>) -> Entry {
        let mut state = self.lock_state();
        match *state {
            RefreshState::Refreshing { ref mut waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push_back(tx);
                debug!(position = waiters.len(), "Refresh in flight, request queued");
                Entry::Wait(rx)
            }
            RefreshState::Idle { ref last_failure } => {
                match self.store.access_token() {
                    // The episode this 401 belongs to already ended with a new token
                    Some(current) if sent_with != Some(current.as_str()) => {
                        debug!("Access token changed since dispatch, replaying without refresh");
                        return Entry::Settled(Ok(current));
                    }
                    Some(_) => {}
                    // ...or already failed; the session was ended once for it
                    None => {
                        if let Some(failed) = last_failure {
                            if failed.rejected_token.as_deref() == sent_with {
                                debug!(error = %failed.error, "Request belongs to a failed refresh episode");
                                return Entry::Settled(Err(failed.error.clone().into()));
                            }
                        }
                    }
                }
                *state = RefreshState::Refreshing {
                    waiters: VecDeque::new(),
                };
                Entry::Lead
            }
        }
    }

    /// Run the refresh call for this episode and settle every waiter
    async fn lead_refresh(&self, rejected_token: Option<&str>) -> Result<String> {
        let episode = RefreshEpisode {
            gateway: self,
            settled: false,
        };
        info!("Access token rejected, refreshing");

        match self.call_refresh_endpoint().await {
            Ok(token) => {
                let waiters = episode.settle(None);
                info!(waiters = waiters.len(), "Access token refreshed successfully");
                for waiter in waiters {
                    let _ = waiter.send(Ok(token.clone()));
                }
                Ok(token)
            }
            Err(e) => {
                // Cleared while still refreshing so no new episode can pick up the dead refresh token
                if let Err(clear_err) = self.store.clear() {
                    warn!(error = %clear_err, "Failed to clear stored credentials");
                }
                let waiters = episode.settle(Some(FailedEpisode {
                    rejected_token: rejected_token.map(str::to_owned),
                    error: e.clone(),
                }));
                warn!(error = %e, waiters = waiters.len(), "Token refresh failed, ending session");
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
                if let Some(listener) = &self.listener {
                    listener.on_logout(&e);
                }
                Err(e.into())
            }
        }
    }

    /// Exchange the stored refresh token for a new access token and persist it
    async fn call_refresh_endpoint(&self) -> RefreshOutcome {
        let refresh_token = self.store.refresh_token().ok_or(RefreshError::MissingRefreshToken)?;

        let request = ApiRequest::post(self.config.refresh_path.as_str())
            .json(&RefreshRequest { refresh: &refresh_token })
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let call = self.transport.send(&request);
        let response = match self.config.refresh_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RefreshError::TimedOut)?,
            None => call.await,
        }
        .map_err(|e| RefreshError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(RefreshError::Rejected {
                status: response.status,
                body: response.text(),
            });
        }

        let refreshed: RefreshResponse = response
            .json()
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;
        if refreshed.access.is_empty() {
            return Err(RefreshError::InvalidResponse("empty access token".to_string()));
        }

        let tokens = AuthTokens::new(refreshed.access, refreshed.refresh);
        if let Err(e) = self.store.store_tokens(&tokens) {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }

        Ok(tokens.access_token)
    }
}

impl<T, S> AuthGateway<T, S> {
    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return to idle, handing back whoever queued during the episode
    fn take_waiters(&self, last_failure: Option<FailedEpisode>) -> VecDeque<Waiter> {
        match std::mem::replace(&mut *self.lock_state(), RefreshState::Idle { last_failure }) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle { .. } => VecDeque::new(),
        }
    }
}

/// Resets the gateway to idle even if the refreshing task is dropped mid-call
struct RefreshEpisode<'a, T, S> {
    gateway: &'a AuthGateway<T, S>,
    settled: bool,
}

impl<T, S> RefreshEpisode<'_, T, S> {
    fn settle(mut self, failure: Option<FailedEpisode>) -> VecDeque<Waiter> {
        self.settled = true;
        self.gateway.take_waiters(failure)
    }
}

impl<T, S> Drop for RefreshEpisode<'_, T, S> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let waiters = self.gateway.take_waiters(None);
        warn!(waiters = waiters.len(), "Refresh abandoned before completion");
        for waiter in waiters {
            let _ = waiter.send(Err(RefreshError::Abandoned));
        }
    }
}
