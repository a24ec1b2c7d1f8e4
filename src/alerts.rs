//! Threshold evaluation and outbound alert delivery
//!
//! Two independent rule sets produce alerts:
//!
//! - the fixed critical rules applied to every metrics update pushed through
//!   the webhook dispatcher ([`evaluate_fixed_thresholds`])
//! - the per-host, user-editable [`AlertConfig`] rows applied to polled
//!   telemetry ([`evaluate_configs`])
//!
//! Neither consults the other.

use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, instrument};

use crate::storage::schema::{Alert, AlertConfig, AlertOperator, NewAlert, Severity};
use crate::{MetricType, MetricsSnapshot};

/// Percentage above which the fixed rules raise a critical alert
pub const CRITICAL_THRESHOLD: f64 = 90.0;

const FIXED_RULES: [(MetricType, &str); 3] = [
    (MetricType::Cpu, "High CPU usage"),
    (MetricType::Ram, "High memory usage"),
    (MetricType::Disk, "Low disk space"),
];

/// Critical alerts for CPU, RAM and disk usage strictly above 90%
pub fn evaluate_fixed_thresholds(snapshot: &MetricsSnapshot) -> Vec<NewAlert> {
    FIXED_RULES
        .iter()
        .filter_map(|(metric_type, message)| {
            let value = snapshot.value_of(*metric_type);
            (value > CRITICAL_THRESHOLD).then(|| NewAlert {
                host_id: snapshot.host_id,
                metric_type: *metric_type,
                current_value: value,
                threshold: CRITICAL_THRESHOLD,
                severity: Severity::Critical,
                message: message.to_string(),
            })
        })
        .collect()
}

fn describe(operator: AlertOperator) -> &'static str {
    match operator {
        AlertOperator::Greater => "above",
        AlertOperator::Less => "below",
        AlertOperator::Equal => "at",
    }
}

/// Warning alerts for every enabled rule of the snapshot's host that trips
pub fn evaluate_configs(configs: &[AlertConfig], snapshot: &MetricsSnapshot) -> Vec<NewAlert> {
    configs
        .iter()
        .filter(|config| config.enabled && config.host_id == snapshot.host_id)
        .filter_map(|config| {
            let value = snapshot.value_of(config.metric_type);
            config
                .operator
                .holds(value, config.threshold)
                .then(|| NewAlert {
                    host_id: snapshot.host_id,
                    metric_type: config.metric_type,
                    current_value: value,
                    threshold: config.threshold,
                    severity: Severity::Warning,
                    message: format!(
                        "{} is {} {} (current {:.1})",
                        config.metric_type,
                        describe(config.operator),
                        config.threshold,
                        value
                    ),
                })
        })
        .collect()
}

/// Posts raised alerts to a configured URL as JSON
///
/// Delivery failures are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct AlertNotifier {
    client: Client,
    url: String,
}

impl AlertNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request per alert
    #[instrument(skip(self, alerts), fields(count = alerts.len()))]
    pub async fn notify(&self, host: &str, alerts: &[Alert]) {
        for alert in alerts {
            self.send_webhook_alert(host, alert).await;
        }
    }

    async fn send_webhook_alert(&self, host: &str, alert: &Alert) {
        let payload = json!({
            "message": format!("[{}] {}: {}", alert.severity.as_str(), host, alert.message),
            "host": host,
            "alert": alert,
            "timestamp": Utc::now().to_rfc3339()
        });

        debug!("sending alert {} to {}", alert.id, self.url);
        match self.client.post(&self.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent webhook alert");
                } else {
                    error!("Webhook alert failed with status: {}", response.status());
                }
            }
            Err(e) => {
                error!("Failed to send webhook alert: {}", e);
            }
        }
    }
}
