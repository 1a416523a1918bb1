//! Wire and credential types shared by the gateway and the auth API

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credential pair (access + refresh)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    /// Absent after a signup that only returns an access token
    pub refresh_token: Option<String>,
}

impl AuthTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

/// Body of `POST auth/refresh/`
#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Refresh endpoint answer; `refresh` is only present when the server rotates it
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Body of `POST auth/logout/`
#[derive(Debug, Serialize)]
pub struct LogoutRequest<'a> {
    pub refresh: &'a str,
}

/// Answer of `POST auth/login/`
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub user: Value,
}

impl LoginResponse {
    /// Vendor profile attached to the logged-in user, if any
    pub fn vendor_profile(&self) -> Option<&Value> {
        self.user.get("vendor_profile").filter(|v| !v.is_null())
    }
}

/// Answer of `POST auth/register/`
///
/// Older backends return `token`, newer ones `access`; some send both.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupResponse {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Value,
}

impl SignupResponse {
    /// Issued access token, `access` winning over the legacy `token`
    pub fn access_token(&self) -> Option<&str> {
        self.access.as_deref().or(self.token.as_deref())
    }
}
