//! Alert emission.
//!
//! Every alert is printed to stdout as `[ALERT <level>] <json>` so log
//! shippers can grep a stable prefix. Warn and critical alerts are
//! additionally POSTed to the configured webhook, best-effort with a short
//! timeout - a dead webhook must never slow a trade cycle down.

use std::time::Duration;

use keeper_core::alerts::Alert;
use tracing::{debug, warn};

/// Webhook delivery timeout.
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

// ═══════════════════════════════════════════════════════════════════════════════
// ALERT SINK
// ═══════════════════════════════════════════════════════════════════════════════

/// Emits alerts to stdout and (for warn/critical) a webhook.
#[derive(Debug, Clone)]
pub struct AlertSink {
    webhook_url: Option<String>,
    http: reqwest::Client,
}

impl AlertSink {
    /// Create a sink; `webhook_url = None` keeps everything on stdout.
    #[must_use]
    pub fn new(webhook_url: Option<String>) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    /// Emit one alert.
    ///
    /// Never fails: serialization problems and webhook errors are logged
    /// and swallowed.
    pub async fn emit(&self, alert: &Alert) {
        let json = match serde_json::to_string(alert) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, kind = %alert.kind, "Unserializable alert");
                return;
            }
        };

        // Stable prefix for log shippers
        println!("[ALERT {}] {json}", alert.level.as_str());

        if alert.level.is_forwarded()
            && let Some(url) = &self.webhook_url
        {
            let result = self
                .http
                .post(url)
                .timeout(WEBHOOK_TIMEOUT)
                .header("content-type", "application/json")
                .body(json)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(kind = %alert.kind, "Alert forwarded to webhook");
                }
                Ok(response) => {
                    warn!(
                        kind = %alert.kind,
                        status = response.status().as_u16(),
                        "Webhook rejected alert"
                    );
                }
                Err(e) => {
                    warn!(kind = %alert.kind, error = %e, "Webhook delivery failed");
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_core::alerts::AlertLevel;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn info_alerts_skip_the_webhook() {
        let server = MockServer::start().await;
        // No mock mounted: any POST would 404 and be logged, but emit must
        // not even attempt delivery for info level.
        let sink = AlertSink::new(Some(server.uri()));

        let alert = Alert::cycle_summary(3, 0, 120, 0.001, 0.05);
        assert_eq!(alert.level, AlertLevel::Info);
        sink.emit(&alert).await;

        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn critical_alerts_reach_the_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(
                serde_json::json!({ "kind": "keeper_gas_critical" }),
            ))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = AlertSink::new(Some(server.uri()));
        sink.emit(&Alert::keeper_gas_critical(0.001, 0.01)).await;
    }

    #[tokio::test]
    async fn webhook_failures_are_swallowed() {
        // Closed port: delivery fails, emit still returns
        let sink = AlertSink::new(Some("http://127.0.0.1:1".into()));
        sink.emit(&Alert::keeper_gas_critical(0.001, 0.01)).await;
    }

    #[tokio::test]
    async fn no_webhook_configured_is_fine() {
        let sink = AlertSink::new(None);
        sink.emit(&Alert::high_spend_rate("e1", 45.0, 30.0)).await;
    }
}
