//! Shared HTTP utilities for talking to the network runner gateway.

use std::time::Duration;

use anyhow::Context;
use serde::{Serialize, de::DeserializeOwned};

/// Timeout for establishing a connection to the gateway.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between polling attempts when waiting for readiness.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Create an HTTP client for JSON requests.
///
/// Only the connection is bounded here; callers put an explicit deadline on
/// each request.
pub fn create_client() -> Result<reqwest::Client, anyhow::Error> {
    reqwest::Client::builder()
        .connect_timeout(DIAL_TIMEOUT)
        .build()
        .context("Failed to create HTTP client")
}

/// Error body returned by the gateway for failed calls.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct GatewayStatus {
    pub code: i32,
    pub message: String,
}

/// Outcome of a gateway call that reached the server.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Non-success HTTP status with the decoded error body.
    Status(u16, GatewayStatus),
    /// Success status but an undecodable body.
    Malformed(String),
}

/// POST `body` as JSON to `url` and decode the reply.
///
/// Transport failures are returned as `reqwest::Error` so callers can
/// classify connection and timeout errors; non-success replies are decoded as
/// [`GatewayStatus`].
pub async fn post_json<B, T>(
    client: &reqwest::Client,
    url: &str,
    body: &B,
) -> Result<CallOutcome<T>, reqwest::Error>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        let detail = serde_json::from_slice::<GatewayStatus>(&bytes).unwrap_or_else(|_| {
            GatewayStatus {
                code: 0,
                message: String::from_utf8_lossy(&bytes).into_owned(),
            }
        });
        return Ok(CallOutcome::Status(status.as_u16(), detail));
    }

    Ok(match serde_json::from_slice(&bytes) {
        Ok(value) => CallOutcome::Ok(value),
        Err(e) => CallOutcome::Malformed(format!("Failed to decode response from {url}: {e}")),
    })
}

/// Wait for a service to be ready by repeatedly calling a check function.
///
/// # Arguments
/// * `name` - Name of the service (for error messages)
/// * `timeout` - Maximum time to wait
/// * `check_fn` - Function that returns Ok(()) when the service is ready
///
/// # Returns
/// Ok(()) when the service is ready, or an error after timeout.
pub async fn wait_until_ready<F, Fut>(
    name: &str,
    timeout: Duration,
    check_fn: F,
) -> Result<(), anyhow::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<(), anyhow::Error>>,
{
    let start = std::time::Instant::now();

    loop {
        let last_error = match check_fn().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::trace!(error = %e, service = %name, "Readiness check failed, retrying...");
                e
            }
        };

        if start.elapsed() > timeout {
            return Err(last_error)
                .with_context(|| format!("Timeout waiting for {name} to be ready"));
        }

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
    }
}
