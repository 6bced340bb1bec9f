//! Best-effort telemetry to a ThingsBoard-style HTTP endpoint.

use crate::{config::TelemetryConfig, worker::spawn_detached};

use log::{debug, warn};
use reqwest::blocking::Client;
use serde_json::Value;
use std::time::Duration;

/// Upper bound on one telemetry request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Somewhere to send telemetry. Publishing never blocks and never fails
/// the caller; delivery problems are only logged.
pub trait TelemetrySink: Send + Sync {
    /// Queue one JSON object for delivery.
    fn publish(&self, payload: Value);
}

/// Posts JSON payloads to `{host}/api/v1/{token}/telemetry`.
#[derive(Debug, Clone)]
pub struct ThingsBoard {
    client: Client,
    url: String,
}

impl ThingsBoard {
    /// Fails only if the HTTP client cannot be built.
    pub fn new(config: &TelemetryConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: telemetry_url(config),
        })
    }
}

fn telemetry_url(config: &TelemetryConfig) -> String {
    format!("{}/api/v1/{}/telemetry", config.host.trim_end_matches('/'), config.token)
}

impl TelemetrySink for ThingsBoard {
    fn publish(&self, payload: Value) {
        let client = self.client.clone();
        let url = self.url.clone();
        spawn_detached("telemetry", move || {
            match client.post(&url).json(&payload).send() {
                Ok(response) if response.status().is_success() => {
                    debug!("Telemetry sent: {}", payload);
                }
                Ok(response) => warn!("Telemetry rejected with status {}", response.status()),
                Err(e) => warn!("Telemetry failed: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_layout() {
        let config = TelemetryConfig {
            host: "http://thingsboard.cloud/".to_owned(),
            token: "A1B2".to_owned(),
        };
        assert_eq!(telemetry_url(&config), "http://thingsboard.cloud/api/v1/A1B2/telemetry");
    }
}
