//! Vendor Rust Client
//!
//! A client library for the vendor-management REST API, with bearer
//! authentication and a single-flight token refresh shared by every
//! request that hits an expired access token.

pub mod auth_client;
pub mod error;
pub mod gateway;
pub mod token_store;
pub mod transport;
pub mod types;

#[cfg(test)]
mod testing;

pub use auth_client::AuthClient;
pub use error::{ClientError, RefreshError, Result};
pub use gateway::{AuthGateway, GatewayConfig, SessionListener};
pub use token_store::{CredentialKey, CredentialStore, FileTokenStore, TokenStore};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
pub use types::AuthTokens;
