// ----------------------------------------------------------------------------
// 7.4 AC Infinity Cloud Gateway
// ----------------------------------------------------------------------------
// One POST per cycle lists every controller on the account. Climate values
// arrive as integers scaled by 100; port speeds arrive as 0..10.
// ----------------------------------------------------------------------------

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tracing::{debug, info};

use super::{read_body, DeviceReport, MetricSample};
use crate::error::{GatewayError, GatewayResult};
use crate::model::SensorSource;
use crate::{
    AC_INFINITY_DEVICE_PATH, AC_INFINITY_LOGIN_PATH, AC_INFINITY_LOGIN_USER_AGENT,
    AC_INFINITY_USER_AGENT,
};

const GATEWAY: &str = "acinfinity";

/// Divisor for every climate value the API reports.
const VALUE_SCALE: f64 = 100.0;

/// Port speed 0..10 to percent.
const SPEED_SCALE: f64 = 10.0;

/// Application-level success code in API envelopes.
const API_OK: i64 = 200;

// ---- Response Types ----
//
// Lists and readings a controller lacks arrive as explicit `null`.

#[derive(Debug, Deserialize)]
struct DeviceListResponse {
    #[serde(default)]
    data: Option<Vec<DeviceEntry>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceEntry {
    dev_code: String,
    #[serde(default)]
    device_info: Option<DeviceInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceInfo {
    #[serde(default)]
    temperature_f: Option<f64>,
    #[serde(default)]
    temperature: Option<f64>,
    #[serde(default)]
    humidity: Option<f64>,
    /// 0 = Fahrenheit, 1 = Celsius
    #[serde(default)]
    unit: Option<i64>,
    #[serde(default)]
    ports: Option<Vec<PortInfo>>,
    #[serde(default)]
    sensors: Option<Vec<SubSensor>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PortInfo {
    port: i64,
    #[serde(default)]
    port_name: Option<String>,
    #[serde(default)]
    speak: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubSensor {
    access_port: i64,
    sensor_type: i64,
    #[serde(default)]
    sensor_data: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<LoginData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    #[serde(default)]
    app_id: Option<String>,
}

// ---- Sub-sensor Catalogue ----

/// Label and unit for a sub-sensor type.
///
/// Unknown types still get recorded under a generic label so they can be
/// renamed later.
fn describe_sub_sensor(device: &str, port: i64, sensor_type: i64, device_unit: i64) -> (String, String) {
    let temp_unit = if device_unit == 1 { "°C" } else { "°F" };
    let (label, unit) = match sensor_type {
        0 => ("inside temp", temp_unit),
        2 => ("inside humidity", "%"),
        3 => ("inside VPD", "kPa"),
        4 => ("outside temp", temp_unit),
        6 => ("outside humidity", "%"),
        7 => ("outside VPD", "kPa"),
        other => {
            let unit = match other {
                1 | 5 => temp_unit,
                _ => "",
            };
            info!(
                target: "isley::gateway::acinfinity",
                device,
                access_port = port,
                sensor_type = other,
                "Unknown sub-sensor type, recording under a generic label"
            );
            return (
                format!("ACI ({}) sensor {}.{}", device, port, other),
                unit.to_string(),
            );
        }
    };
    (format!("ACI ({}) {}", device, label), unit.to_string())
}

// ---- Parsing ----

/// Parse a `devInfoListAll` body into one report per controller.
pub fn parse_device_list(body: &[u8]) -> GatewayResult<Vec<DeviceReport>> {
    let response: DeviceListResponse =
        serde_json::from_slice(body).map_err(|e| GatewayError::parse(GATEWAY, e))?;

    let reports = response
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|entry| {
            let device = entry.dev_code;
            let info = entry.device_info.unwrap_or_default();
            let device_unit = info.unit.unwrap_or(0);
            let sensors = info.sensors.unwrap_or_default();
            let ports = info.ports.unwrap_or_default();
            let mut samples = Vec::with_capacity(3 + sensors.len() + ports.len());

            if let Some(raw) = info.temperature_f {
                samples.push(MetricSample::new(
                    "ACI.tempF",
                    raw / VALUE_SCALE,
                    format!("AC Infinity ({}) Temp", device),
                    "°F",
                ));
            }
            if let Some(raw) = info.temperature {
                samples.push(MetricSample::new(
                    "ACI.tempC",
                    raw / VALUE_SCALE,
                    format!("AC Infinity ({}) Temp", device),
                    "°C",
                ));
            }
            if let Some(raw) = info.humidity {
                samples.push(MetricSample::new(
                    "ACI.humidity",
                    raw / VALUE_SCALE,
                    format!("AC Infinity ({}) Humidity", device),
                    "%",
                ));
            }

            for sensor in sensors {
                let Some(raw) = sensor.sensor_data else {
                    debug!(
                        target: "isley::gateway::acinfinity",
                        device = %device,
                        access_port = sensor.access_port,
                        sensor_type = sensor.sensor_type,
                        "Sub-sensor reported no value"
                    );
                    continue;
                };
                let (label, unit) =
                    describe_sub_sensor(&device, sensor.access_port, sensor.sensor_type, device_unit);
                samples.push(MetricSample::new(
                    format!("ACI.{}.{}", sensor.access_port, sensor.sensor_type),
                    raw / VALUE_SCALE,
                    label,
                    unit,
                ));
            }

            for port in ports {
                let Some(speed) = port.speak else {
                    continue;
                };
                let label = port
                    .port_name
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("AC Infinity ({}) port {}", device, port.port));
                samples.push(MetricSample::new(
                    format!("ACIP.{}", port.port),
                    speed * SPEED_SCALE,
                    label,
                    "%",
                ));
            }

            DeviceReport {
                source: SensorSource::AcInfinity,
                device,
                samples,
            }
        })
        .collect();

    Ok(reports)
}

// ---- Fetch ----

/// List every controller on the account.
pub(crate) async fn fetch(
    client: &HttpClient,
    base_url: &str,
    token: &str,
) -> GatewayResult<Vec<DeviceReport>> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), AC_INFINITY_DEVICE_PATH);

    let response = client
        .post(&url)
        .query(&[("userId", token)])
        .header("token", token)
        .header(USER_AGENT, AC_INFINITY_USER_AGENT)
        .send()
        .await
        // The token travels in the query string.
        .map_err(|e| GatewayError::transport(GATEWAY, e.without_url()))?;

    let body = read_body(GATEWAY, response).await?;
    let reports = parse_device_list(&body)?;

    debug!(
        target: "isley::gateway::acinfinity",
        devices = reports.len(),
        "Fetched device list"
    );
    Ok(reports)
}

// ---- Login ----

/// Extract the account token from an `appUserLogin` body.
pub fn parse_login(body: &[u8]) -> GatewayResult<String> {
    let response: LoginResponse =
        serde_json::from_slice(body).map_err(|e| GatewayError::parse(GATEWAY, e))?;

    if response.code != API_OK {
        return Err(GatewayError::Rejected {
            gateway: GATEWAY.to_string(),
            message: response
                .msg
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("code {}", response.code)),
        });
    }

    response
        .data
        .and_then(|d| d.app_id)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| GatewayError::parse(GATEWAY, "login succeeded without an appId"))
}

/// Exchange account credentials for the token the device listing needs.
pub(crate) async fn login(
    client: &HttpClient,
    base_url: &str,
    email: &str,
    password: &str,
) -> GatewayResult<String> {
    let url = format!("{}{}", base_url.trim_end_matches('/'), AC_INFINITY_LOGIN_PATH);

    // `appPasswordl` is the field name the API actually reads.
    let response = client
        .post(&url)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded; charset=utf-8")
        .header(USER_AGENT, AC_INFINITY_LOGIN_USER_AGENT)
        .form(&[("appEmail", email), ("appPasswordl", password)])
        .send()
        .await
        .map_err(|e| GatewayError::transport(GATEWAY, e.without_url()))?;

    let body = read_body(GATEWAY, response).await?;
    let token = parse_login(&body)?;
    info!(target: "isley::gateway::acinfinity", "Obtained account token");
    Ok(token)
}
