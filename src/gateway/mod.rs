// ============================================================================
// SECTION 7: GATEWAY CLIENTS
// ============================================================================
// One HTTP round-trip per gateway per cycle:
// - AC Infinity: cloud API, token in a header, values scaled by 100
// - EcoWitt: LAN console, values as strings with a trailing unit
// Every failure is returned as a GatewayError; nothing here panics or retries.
// ============================================================================

pub mod ac_infinity;
pub mod ecowitt;

use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;

use crate::error::{GatewayError, GatewayResult};
use crate::model::{SensorKey, SensorSource};

// ----------------------------------------------------------------------------
// 7.1 Gateway Reports
// ----------------------------------------------------------------------------

/// One measured quantity as reported by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    /// Metric key, unique per device (e.g. `ACI.3.99`, `Soil.2`)
    pub metric: String,
    /// Value after unit stripping and rescaling
    pub value: f64,
    /// Suggested human label for a newly registered sensor
    pub label: String,
    /// Suggested display unit
    pub unit: String,
}

impl MetricSample {
    pub fn new(metric: impl Into<String>, value: f64, label: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value,
            label: label.into(),
            unit: unit.into(),
        }
    }
}

/// Everything one device reported in a single round-trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub source: SensorSource,
    pub device: String,
    pub samples: Vec<MetricSample>,
}

impl DeviceReport {
    /// Sensor identity of one of this report's samples.
    pub fn key_for(&self, sample: &MetricSample) -> SensorKey {
        SensorKey::new(self.source, &self.device, &sample.metric)
    }

    pub fn sample(&self, metric: &str) -> Option<&MetricSample> {
        self.samples.iter().find(|s| s.metric == metric)
    }
}

// ----------------------------------------------------------------------------
// 7.2 Gateway Targets
// ----------------------------------------------------------------------------

/// A single gateway to poll, built fresh from configuration each cycle.
#[derive(Clone, PartialEq, Eq)]
pub enum GatewayTarget {
    AcInfinity { base_url: String, token: String },
    EcoWitt { address: String },
}

impl GatewayTarget {
    pub fn source(&self) -> SensorSource {
        match self {
            GatewayTarget::AcInfinity { .. } => SensorSource::AcInfinity,
            GatewayTarget::EcoWitt { .. } => SensorSource::EcoWitt,
        }
    }

    /// Short name for logs; never includes the token.
    pub fn label(&self) -> String {
        match self {
            GatewayTarget::AcInfinity { .. } => SensorSource::AcInfinity.to_string(),
            GatewayTarget::EcoWitt { address } => format!("{}@{}", SensorSource::EcoWitt, address),
        }
    }
}

impl Debug for GatewayTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

// ----------------------------------------------------------------------------
// 7.3 Gateway Client Trait
// ----------------------------------------------------------------------------

/// Fetches current values from one gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn fetch(&self, target: &GatewayTarget) -> GatewayResult<Vec<DeviceReport>>;

    /// Trade AC Infinity account credentials for an API token.
    async fn ac_infinity_login(
        &self,
        base_url: &str,
        email: &str,
        password: &str,
    ) -> GatewayResult<String>;
}

/// reqwest-backed client for both gateway families.
#[derive(Clone)]
pub struct HttpGatewayClient {
    /// HTTP client with connection pooling
    client: HttpClient,
}

impl HttpGatewayClient {
    /// Build a client whose every request is bounded by `timeout`.
    pub fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = HttpClient::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::transport("client", e))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl GatewayClient for HttpGatewayClient {
    async fn fetch(&self, target: &GatewayTarget) -> GatewayResult<Vec<DeviceReport>> {
        match target {
            GatewayTarget::AcInfinity { base_url, token } => {
                ac_infinity::fetch(&self.client, base_url, token).await
            }
            GatewayTarget::EcoWitt { address } => {
                let report = ecowitt::fetch(&self.client, address).await?;
                Ok(vec![report])
            }
        }
    }

    async fn ac_infinity_login(
        &self,
        base_url: &str,
        email: &str,
        password: &str,
    ) -> GatewayResult<String> {
        ac_infinity::login(&self.client, base_url, email, password).await
    }
}

/// Check the status and collect the body of a gateway response.
pub(crate) async fn read_body(gateway: &str, response: reqwest::Response) -> GatewayResult<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        return Err(GatewayError::Status {
            gateway: gateway.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| GatewayError::transport(gateway, e.without_url()))?;
    Ok(body.to_vec())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_label_hides_token() {
        let target = GatewayTarget::AcInfinity {
            base_url: "http://example.invalid".into(),
            token: "hunter2".into(),
        };
        assert_eq!(target.label(), "acinfinity");
        assert!(!format!("{:?}", target).contains("hunter2"));

        let lan = GatewayTarget::EcoWitt { address: "192.168.1.40".into() };
        assert_eq!(lan.label(), "ecowitt@192.168.1.40");
        assert_eq!(lan.source(), SensorSource::EcoWitt);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transport_error() {
        let client = HttpGatewayClient::new(Duration::from_millis(500)).unwrap();
        // Port 9 (discard) on loopback is closed in test environments.
        let target = GatewayTarget::EcoWitt { address: "127.0.0.1:9".into() };
        let err = client.fetch(&target).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport { .. }));
    }
}
