// ----------------------------------------------------------------------------
// 7.5 EcoWitt LAN Gateway
// ----------------------------------------------------------------------------
// Consoles expose `/get_livedata_info` on the local network. Every value is a
// string with a trailing unit (`"55%"`, `"72.5"`), so parsing is per field and
// a bad field never sinks the rest of the payload.
// ----------------------------------------------------------------------------

use std::net::{IpAddr, SocketAddr};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{read_body, DeviceReport, MetricSample};
use crate::error::{GatewayError, GatewayResult};
use crate::model::SensorSource;
use crate::ECOWITT_LIVEDATA_PATH;

const GATEWAY: &str = "ecowitt";

/// Dotted local hostnames: `console`, `console.lan`, `grow-room_2.local`.
static LOCAL_HOSTNAME: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z0-9_-]+\.)*[a-zA-Z0-9_-]+$").ok());

// ---- Response Types ----

#[derive(Debug, Default, Deserialize)]
struct LiveData {
    #[serde(default)]
    wh25: Vec<IndoorReading>,
    #[serde(default)]
    ch_soil: Vec<SoilChannel>,
}

#[derive(Debug, Default, Deserialize)]
struct IndoorReading {
    #[serde(default)]
    intemp: String,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    inhumi: String,
}

#[derive(Debug, Default, Deserialize)]
struct SoilChannel {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    humidity: String,
}

// ---- Value Parsing ----

/// Strip a trailing unit and parse what is left: `"55%"` gives `55.0`.
pub fn strip_unit(raw: &str) -> Option<f64> {
    let numeric = raw
        .trim()
        .trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    if numeric.is_empty() {
        return None;
    }
    numeric.parse::<f64>().ok()
}

fn push_sample(
    samples: &mut Vec<MetricSample>,
    address: &str,
    metric: String,
    raw: &str,
    label: String,
    unit: &str,
) {
    match strip_unit(raw) {
        Some(value) => samples.push(MetricSample::new(metric, value, label, unit)),
        None => warn!(
            target: "isley::gateway::ecowitt",
            device = address,
            metric = %metric,
            raw,
            "Unparseable value, skipping"
        ),
    }
}

/// Parse a `get_livedata_info` body from the console at `address`.
pub fn parse_live_data(address: &str, body: &[u8]) -> GatewayResult<DeviceReport> {
    let data: LiveData =
        serde_json::from_slice(body).map_err(|e| GatewayError::parse(GATEWAY, e))?;

    let mut samples = Vec::with_capacity(2 + data.ch_soil.len());

    for indoor in &data.wh25 {
        let temp_unit = match indoor.unit.trim() {
            "" => "°F".to_string(),
            unit if unit.starts_with('°') => unit.to_string(),
            unit => format!("°{}", unit),
        };
        push_sample(
            &mut samples,
            address,
            "WH25.InTemp".into(),
            &indoor.intemp,
            format!("EC ({}) InTemp", address),
            &temp_unit,
        );
        push_sample(
            &mut samples,
            address,
            "WH25.InHumi".into(),
            &indoor.inhumi,
            format!("EC ({}) InHumi", address),
            "%",
        );
    }

    for soil in &data.ch_soil {
        push_sample(
            &mut samples,
            address,
            format!("Soil.{}", soil.channel),
            &soil.humidity,
            soil.name.clone(),
            "%",
        );
    }

    Ok(DeviceReport {
        source: SensorSource::EcoWitt,
        device: address.to_string(),
        samples,
    })
}

// ---- Address Validation ----

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private(),
        // fc00::/7 unique local
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

/// Accept only private or loopback IPs and local hostnames, with an optional
/// port. Public IP literals are rejected.
pub fn validate_device_address(address: &str) -> bool {
    let address = address.trim();

    if let Ok(ip) = address.parse::<IpAddr>() {
        return is_local_ip(ip);
    }
    if let Ok(socket) = address.parse::<SocketAddr>() {
        return is_local_ip(socket.ip());
    }

    let host = match address.rsplit_once(':') {
        Some((host, port)) => {
            if port.parse::<u16>().is_err() {
                return false;
            }
            host
        }
        None => address,
    };

    if let Ok(ip) = host.parse::<IpAddr>() {
        return is_local_ip(ip);
    }
    LOCAL_HOSTNAME.as_ref().map_or(false, |re| re.is_match(host))
}

// ---- Fetch ----

/// Read live data from one console.
pub(crate) async fn fetch(client: &HttpClient, address: &str) -> GatewayResult<DeviceReport> {
    if !validate_device_address(address) {
        return Err(GatewayError::InvalidAddress {
            address: address.to_string(),
        });
    }

    let url = format!("http://{}{}", address, ECOWITT_LIVEDATA_PATH);
    let label = format!("{}@{}", GATEWAY, address);

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| GatewayError::transport(label.as_str(), e))?;

    let body = read_body(&label, response).await?;
    let report = parse_live_data(address, &body)?;

    debug!(
        target: "isley::gateway::ecowitt",
        device = address,
        samples = report.samples.len(),
        "Fetched live data"
    );
    Ok(report)
}
