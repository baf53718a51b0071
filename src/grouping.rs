// ============================================================================
// SECTION 15: SENSOR GROUPING
// ============================================================================
// Dashboard overview: visible sensors nested zone → device → metric, each
// with its most recent value and a trend against the recent mean. The
// builder is pure; the async wrapper only gathers its inputs, and
// `GroupedCache` keeps the result for a tenth of the polling interval.
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::config::{ConfigSource, TelemetryConfig};
use crate::error::StorageResult;
use crate::model::{Reading, ReadingWindow, Sensor, SensorId, SensorSource, ZoneId};
use crate::storage::TelemetryStorage;

/// Span of readings, ending at the latest one, that the trend is measured
/// against.
pub const TREND_WINDOW_MINUTES: i64 = 30;

/// Differences below this count as flat.
const TREND_TOLERANCE: f64 = 1e-9;

// ----------------------------------------------------------------------------
// 15.1 Trend
// ----------------------------------------------------------------------------

/// Direction of the latest reading relative to the recent mean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    #[default]
    Flat,
}

impl Trend {
    /// Compare `latest` with the mean of `recent`. No history means flat.
    pub fn against_mean(latest: f64, recent: &[Reading]) -> Self {
        if recent.is_empty() {
            return Trend::Flat;
        }
        let mean = recent.iter().map(|r| r.value).sum::<f64>() / recent.len() as f64;
        let delta = latest - mean;
        if delta > TREND_TOLERANCE {
            Trend::Up
        } else if delta < -TREND_TOLERANCE {
            Trend::Down
        } else {
            Trend::Flat
        }
    }
}

// ----------------------------------------------------------------------------
// 15.2 Grouping
// ----------------------------------------------------------------------------

/// One sensor as shown in the overview.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedSensor {
    pub id: SensorId,
    pub name: String,
    pub source: SensorSource,
    pub unit: String,
    /// Latest reading, if any was recorded
    pub value: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub trend: Trend,
}

/// metric → sensors
pub type MetricGroup = BTreeMap<String, Vec<GroupedSensor>>;
/// device → metrics
pub type DeviceGroup = BTreeMap<String, MetricGroup>;
/// zone name → devices
pub type GroupedSensors = BTreeMap<String, DeviceGroup>;

/// Nest visible, zoned sensors by zone name, device and metric.
///
/// Sensors without a zone are left out. A zone missing from `zone_name`
/// is shown as `zone-<id>`.
pub fn group_sensors<'a, I, F>(sensors: I, zone_name: F) -> GroupedSensors
where
    I: IntoIterator<Item = (&'a Sensor, Option<(Reading, Trend)>)>,
    F: Fn(ZoneId) -> Option<String>,
{
    let mut grouped = GroupedSensors::new();

    for (sensor, latest) in sensors {
        if !sensor.visible {
            continue;
        }
        let Some(zone) = sensor.zone_id else {
            continue;
        };
        let zone = zone_name(zone).unwrap_or_else(|| format!("zone-{}", zone.0));

        grouped
            .entry(zone)
            .or_default()
            .entry(sensor.key.device.to_string())
            .or_default()
            .entry(sensor.key.metric.to_string())
            .or_default()
            .push(GroupedSensor {
                id: sensor.id,
                name: sensor.name.clone(),
                source: sensor.key.source,
                unit: sensor.unit.clone(),
                value: latest.map(|(r, _)| r.value),
                updated_at: latest.map(|(r, _)| r.created_at),
                trend: latest.map(|(_, t)| t).unwrap_or_default(),
            });
    }

    grouped
}

/// Gather sensors, their latest readings and trends from storage and group
/// them.
pub async fn grouped_with_latest(
    storage: &dyn TelemetryStorage,
    config: &TelemetryConfig,
) -> StorageResult<GroupedSensors> {
    let sensors = storage.list_sensors().await?;
    let mut rows = Vec::with_capacity(sensors.len());
    for sensor in &sensors {
        let latest = if sensor.visible && sensor.zone_id.is_some() {
            match storage.latest_reading(sensor.id).await? {
                Some(reading) => {
                    let window = ReadingWindow::Between(
                        reading.created_at - Duration::minutes(TREND_WINDOW_MINUTES),
                        reading.created_at,
                    );
                    let recent = storage.query_readings(sensor.id, window).await?;
                    Some((reading, Trend::against_mean(reading.value, &recent)))
                }
                None => None,
            }
        } else {
            None
        };
        rows.push((sensor, latest));
    }

    Ok(group_sensors(rows, |zone| config.zone_name(zone).map(str::to_string)))
}

// ----------------------------------------------------------------------------
// 15.3 Overview Cache
// ----------------------------------------------------------------------------

/// Holds the last overview for one cache TTL (a tenth of the polling
/// interval).
pub struct GroupedCache {
    config: Arc<dyn ConfigSource>,
    cached: Mutex<Option<(Instant, Arc<GroupedSensors>)>>,
}

impl GroupedCache {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self {
            config,
            cached: Mutex::new(None),
        }
    }

    /// The cached overview while fresh, otherwise a rebuilt one.
    pub async fn get(&self, storage: &dyn TelemetryStorage) -> StorageResult<Arc<GroupedSensors>> {
        let config = self.config.snapshot();
        let ttl = config.cache_ttl();
        let fresh = self
            .cached
            .lock()
            .as_ref()
            .filter(|(cached_at, _)| cached_at.elapsed() < ttl)
            .map(|(_, grouped)| Arc::clone(grouped));
        if let Some(grouped) = fresh {
            trace!(target: "isley::grouping", "Overview served from cache");
            return Ok(grouped);
        }

        let grouped = Arc::new(grouped_with_latest(storage, &config).await?);
        *self.cached.lock() = Some((Instant::now(), Arc::clone(&grouped)));
        Ok(grouped)
    }

    /// Drop the cached overview, e.g. after a sensor was edited.
    pub fn invalidate(&self) {
        self.cached.lock().take();
    }
}
