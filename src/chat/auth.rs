//! Sign-in against the hosted auth endpoint.
//!
//! The core itself never checks credentials; it only needs a stable user id
//! and an access token to hand to the HTTP backend. Every other operation
//! treats a missing identity as a silent no-op.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SignInResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    pub user: AuthUser,
}

#[derive(Debug, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: String,
}

/// Authenticated identity as the rest of the core consumes it.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
}

/// Password sign-in. Returns the session the `HttpBackend` is built from.
pub async fn sign_in(
    auth_base_url: &str,
    anon_key: &str,
    email: String,
    password: String,
) -> Result<AuthSession> {
    let client = reqwest::Client::new();
    let operation_id = Uuid::new_v4().to_string();
    let url = format!("{auth_base_url}/auth/v1/token?grant_type=password");

    info!("[Auth] signing in {}", email);
    debug!("[Auth]   url: {}, operation id: {}", url, operation_id);

    let response = client
        .post(&url)
        .header("Content-Type", "application/json")
        .header("apikey", anon_key)
        .header("x-operation-id", &operation_id)
        .json(&SignInRequest { email, password })
        .send()
        .await
        .context("sign-in request failed")?;

    let resp: SignInResponse = crate::chat::types::handle_rest_response(response, "sign-in").await?;

    info!("[Auth] signed in, user id: {}", resp.user.id);
    Ok(AuthSession {
        user_id: resp.user.id,
        access_token: resp.access_token,
    })
}
