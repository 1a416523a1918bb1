//! Scripted transport for exercising the gateway without a server

use crate::error::{ClientError, Result};
use crate::transport::{ApiRequest, ApiResponse, Transport};
use reqwest::StatusCode;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// How the stub answers the refresh endpoint
#[derive(Debug, Clone)]
pub(crate) enum RefreshBehavior {
    Succeed { access: String, refresh: Option<String> },
    Reject { status: StatusCode, body: String },
    /// 200 without an `access` field
    Malformed,
    /// No response at all
    Unreachable,
    /// Never answers
    Hang,
}

impl RefreshBehavior {
    pub(crate) fn succeed(access: &str, refresh: Option<&str>) -> Self {
        Self::Succeed {
            access: access.to_string(),
            refresh: refresh.map(str::to_string),
        }
    }

    pub(crate) fn reject(status: StatusCode, body: &str) -> Self {
        Self::Reject {
            status,
            body: body.to_string(),
        }
    }
}

/// Accepts requests bearing the one valid token, answers 401 otherwise
///
/// A successful refresh makes the new access token the valid one. Every
/// dispatched request is recorded.
pub(crate) struct StubTransport {
    refresh_path: String,
    valid_token: Mutex<String>,
    refresh: Mutex<RefreshBehavior>,
    fixed: Mutex<HashMap<String, (StatusCode, String)>>,
    bodies: Mutex<HashMap<String, String>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
    always_unauthorized: AtomicBool,
    hold_refresh_until: AtomicUsize,
    unauthorized: AtomicUsize,
    refresh_calls: AtomicUsize,
    requests: Mutex<Vec<ApiRequest>>,
}

impl StubTransport {
    pub(crate) fn new(valid_token: &str) -> Self {
        Self {
            refresh_path: "auth/refresh/".to_string(),
            valid_token: Mutex::new(valid_token.to_string()),
            refresh: Mutex::new(RefreshBehavior::reject(StatusCode::UNAUTHORIZED, "invalid_grant")),
            fixed: Mutex::new(HashMap::new()),
            bodies: Mutex::new(HashMap::new()),
            held: Mutex::new(HashMap::new()),
            always_unauthorized: AtomicBool::new(false),
            hold_refresh_until: AtomicUsize::new(0),
            unauthorized: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn refresh_with(self, behavior: RefreshBehavior) -> Self {
        self.set_refresh(behavior);
        self
    }

    pub(crate) fn always_unauthorized(self) -> Self {
        self.always_unauthorized.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_refresh(&self, behavior: RefreshBehavior) {
        *self.refresh.lock().unwrap() = behavior;
    }

    /// Keep the refresh call pending until this many 401s were handed out
    pub(crate) fn hold_refresh_until_unauthorized(&self, count: usize) {
        self.hold_refresh_until.store(count, Ordering::SeqCst);
    }

    /// Answer `path` with a fixed status, whatever the credentials
    pub(crate) fn respond_with(&self, path: &str, status: StatusCode) {
        self.respond_public(path, status, json!({ "detail": "scripted failure" }));
    }

    /// Answer `path` with a fixed status and body, whatever the credentials
    pub(crate) fn respond_public(&self, path: &str, status: StatusCode, body: serde_json::Value) {
        self.fixed
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Answer authorized requests to `path` with this body
    pub(crate) fn respond_json(&self, path: &str, body: serde_json::Value) {
        self.respond_text(path, &body.to_string());
    }

    /// Answer authorized requests to `path` with this raw body
    pub(crate) fn respond_text(&self, path: &str, body: &str) {
        self.bodies.lock().unwrap().insert(path.to_string(), body.to_string());
    }

    /// Record requests to `path` on dispatch but answer only once `release` is notified
    pub(crate) fn hold_response(&self, path: &str, release: Arc<Notify>) {
        self.held.lock().unwrap().insert(path.to_string(), release);
    }

    /// Invalidate every issued access token
    pub(crate) fn expire_tokens(&self) {
        self.valid_token.lock().unwrap().clear();
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn answer_refresh(&self) -> Result<ApiResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let hold = self.hold_refresh_until.load(Ordering::SeqCst);
        while self.unauthorized.load(Ordering::SeqCst) < hold {
            tokio::task::yield_now().await;
        }

        let behavior = self.refresh.lock().unwrap().clone();
        match behavior {
            RefreshBehavior::Succeed { access, refresh } => {
                *self.valid_token.lock().unwrap() = access.clone();
                let body = json!({ "access": access, "refresh": refresh });
                Ok(ApiResponse::new(StatusCode::OK, body.to_string()))
            }
            RefreshBehavior::Reject { status, body } => Ok(ApiResponse::new(status, body)),
            RefreshBehavior::Malformed => Ok(ApiResponse::new(StatusCode::OK, r#"{"detail":"ok"}"#)),
            RefreshBehavior::Unreachable => Err(ClientError::InvalidResponse("connection reset".to_string())),
            RefreshBehavior::Hang => std::future::pending().await,
        }
    }
}

impl Transport for StubTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        self.requests.lock().unwrap().push(request.clone());

        if request.path == self.refresh_path {
            return self.answer_refresh().await;
        }

        let release = self.held.lock().unwrap().get(&request.path).cloned();
        if let Some(release) = release {
            release.notified().await;
        }

        let fixed = self.fixed.lock().unwrap().get(&request.path).cloned();
        if let Some((status, body)) = fixed {
            return Ok(ApiResponse::new(status, body));
        }

        let valid = self.valid_token.lock().unwrap().clone();
        let authorized = !valid.is_empty()
            && request.bearer_token() == Some(valid.as_str())
            && !self.always_unauthorized.load(Ordering::SeqCst);
        if !authorized {
            self.unauthorized.fetch_add(1, Ordering::SeqCst);
            return Ok(ApiResponse::new(
                StatusCode::UNAUTHORIZED,
                r#"{"detail":"Given token not valid for any token type"}"#,
            ));
        }

        let scripted = self.bodies.lock().unwrap().get(&request.path).cloned();
        let body = scripted.unwrap_or_else(|| json!({ "path": request.path, "token": valid }).to_string());
        Ok(ApiResponse::new(StatusCode::OK, body))
    }
}
