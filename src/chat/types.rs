//! Shared wire types and HTTP response handling for the hosted backend's
//! row API.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, error};

/// Error body returned by the row API on a non-2xx status.
///
/// All fields are optional in practice; `message` is the one worth
/// surfacing.
#[derive(Debug, Default, Deserialize)]
pub struct RestErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

/// Common handling for every row-API response: check the HTTP status,
/// surface the backend's error body on failure, deserialize the payload on
/// success. All REST calls share this path.
pub async fn handle_rest_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<T> {
    let status = response.status();

    // Body can only be read once, so read bytes up front.
    let body_bytes = response
        .bytes()
        .await
        .with_context(|| format!("{operation_name}: failed to read response body"))?;

    if !status.is_success() {
        let body = serde_json::from_slice::<RestErrorBody>(&body_bytes).unwrap_or_default();
        let detail = if body.message.is_empty() {
            String::from_utf8_lossy(&body_bytes).into_owned()
        } else {
            body.message
        };
        error!("[HTTP] {} failed, status {}: {}", operation_name, status, detail);
        return Err(anyhow::anyhow!("{operation_name}: HTTP {status}: {detail}"));
    }
    debug!("[HTTP] {} succeeded, status {}", operation_name, status);

    serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[HTTP] {} response deserialization failed: {:?}, raw body: {}",
            operation_name,
            e,
            String::from_utf8_lossy(&body_bytes)
        );
        anyhow::anyhow!("{operation_name}: failed to deserialize response: {e:?}")
    })
}
