//! Basic gateway example
//!
//! Usage:
//!   VENDOR_USERNAME=... VENDOR_PASSWORD=... cargo run --example basic_gateway

use serde_json::json;
use std::sync::Arc;
use vendor_rs_client::{AuthClient, AuthGateway, FileTokenStore, GatewayConfig, RefreshError};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = GatewayConfig::from_env()?;
    let username = std::env::var("VENDOR_USERNAME").unwrap_or_else(|_| "vendor".to_string());
    let password = std::env::var("VENDOR_PASSWORD").unwrap_or_else(|_| "password".to_string());
    let credentials_path =
        std::env::var("VENDOR_CREDENTIALS").unwrap_or_else(|_| "vendor-credentials.json".to_string());

    println!("=== Vendor Client Example ===");
    println!("API: {}", config.base_url);
    println!("Credentials file: {}", credentials_path);
    println!();

    // Credentials persist across runs, like browser local storage
    let store = FileTokenStore::open(&credentials_path)?;
    let gateway = AuthGateway::connect(config, store)?.with_session_listener(|reason: &RefreshError| {
        println!("! Session ended ({reason}), please log in again");
    });
    let auth = AuthClient::new(Arc::new(gateway));

    if !auth.is_authenticated() {
        println!("Logging in as {}...", username);
        let login = auth
            .login(&json!({ "username": username, "password": password }))
            .await
            .map_err(|e| e.user_message())?;
        println!("✓ Logged in, vendor profile: {}", login.vendor_profile().is_some());
        println!();
    }

    // Several requests at once; an expired token is refreshed only once for all of them
    let gateway = auth.gateway();
    let (me, products, customers) = tokio::join!(
        auth.current_user(),
        gateway.get("products/vendor/my-products/"),
        gateway.get("customers/"),
    );

    match me {
        Ok(me) => println!("✓ Current user: {}", me),
        Err(e) => println!("! Failed to load profile: {}", e.user_message()),
    }
    for (name, result) in [("products", products), ("customers", customers)] {
        match result {
            Ok(response) => println!("✓ {} -> {}", name, response.status),
            Err(e) => println!("! {} failed: {}", name, e.user_message()),
        }
    }
    println!();

    if std::env::var("VENDOR_LOGOUT").is_ok() {
        auth.logout().await?;
        println!("✓ Logged out");
    }

    Ok(())
}
