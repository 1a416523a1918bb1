//! Account endpoints (login, signup, logout, profile) on top of the gateway

use crate::error::Result;
use crate::gateway::AuthGateway;
use crate::token_store::CredentialStore;
use crate::transport::{ApiRequest, Transport};
use crate::types::{AuthTokens, LoginResponse, LogoutRequest, SignupResponse};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

const LOGIN_PATH: &str = "auth/login/";
const SIGNUP_PATH: &str = "auth/register/";
const LOGOUT_PATH: &str = "auth/logout/";
const ME_PATH: &str = "auth/me/";

/// Session lifecycle client
///
/// Login and signup go out without credentials and seed the credential
/// store; everything else goes through the gateway and benefits from
/// transparent token refresh.
pub struct AuthClient<T, S> {
    gateway: Arc<AuthGateway<T, S>>,
}

impl<T, S> Clone for AuthClient<T, S> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<T: Transport, S: CredentialStore> AuthClient<T, S> {
    pub fn new(gateway: Arc<AuthGateway<T, S>>) -> Self {
        Self { gateway }
    }

    /// The gateway shared with the other API clients
    pub fn gateway(&self) -> &Arc<AuthGateway<T, S>> {
        &self.gateway
    }

    /// Log in and store the issued credential pair
    ///
    /// # Arguments
    /// * `credentials` - body the backend expects, typically `{"username", "password"}`
    pub async fn login<C: Serialize + ?Sized>(&self, credentials: &C) -> Result<LoginResponse> {
        let request = ApiRequest::post(LOGIN_PATH).json(credentials)?;
        let login: LoginResponse = self.gateway.send_public(request).await?.json()?;

        self.gateway
            .store()
            .store_tokens(&AuthTokens::new(login.access.clone(), Some(login.refresh.clone())))?;
        info!(has_vendor_profile = login.vendor_profile().is_some(), "Logged in");

        Ok(login)
    }

    /// Register a new account, storing whatever tokens the backend hands out
    pub async fn signup<U: Serialize + ?Sized>(&self, user_data: &U) -> Result<SignupResponse> {
        let request = ApiRequest::post(SIGNUP_PATH).json(user_data)?;
        let signup: SignupResponse = self.gateway.send_public(request).await?.json()?;

        match signup.access_token() {
            Some(token) => {
                self.gateway
                    .store()
                    .store_tokens(&AuthTokens::new(token, signup.refresh.clone()))?;
                info!("Signed up and logged in");
            }
            None => info!("Signed up, no token issued"),
        }

        Ok(signup)
    }

    /// Revoke the refresh token server-side and forget the credentials
    ///
    /// Credentials are cleared even when the server call fails; that failure
    /// is still returned. Returns `Ok(None)` when there was nothing to revoke.
    pub async fn logout(&self) -> Result<Option<Value>> {
        let store = self.gateway.store();
        let Some(refresh_token) = store.refresh_token() else {
            warn!("No refresh token found for logout");
            store.clear()?;
            return Ok(None);
        };

        let outcome = self
            .gateway
            .post(LOGOUT_PATH, &LogoutRequest { refresh: &refresh_token })
            .await;
        let cleared = store.clear();

        let response = outcome?;
        cleared?;
        debug!(status = %response.status, "Logged out");

        if response.body.is_empty() {
            return Ok(Some(Value::Null));
        }
        // The revoke already succeeded; a non-JSON acknowledgement is still one
        Ok(Some(
            response
                .json()
                .unwrap_or_else(|_| Value::String(response.text())),
        ))
    }

    /// Profile of the logged-in user
    pub async fn current_user(&self) -> Result<Value> {
        self.gateway.get(ME_PATH).await?.json()
    }

    pub fn is_authenticated(&self) -> bool {
        self.gateway.store().access_token().is_some()
    }
}
