// ============================================================================
// SECTION 3: CORE TYPE SYSTEM
// ============================================================================
// Sensors, readings and the wire record served to the charting frontend.
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// 3.1 Identifiers
// ----------------------------------------------------------------------------

/// Storage-assigned sensor identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct SensorId(pub i64);

impl Display for SensorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SensorId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(SensorId)
    }
}

/// Storage-assigned reading identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ReadingId(pub u64);

/// Zone identifier, owned by the zone CRUD collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ZoneId(pub i64);

// ----------------------------------------------------------------------------
// 3.2 Sensor Source
// ----------------------------------------------------------------------------

/// Gateway family a sensor was discovered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSource {
    /// AC Infinity cloud API
    AcInfinity,
    /// EcoWitt console on the local network
    EcoWitt,
    /// Pushed over HTTP by an external script
    Api,
}

impl SensorSource {
    /// Wire name, as stored in the `source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorSource::AcInfinity => "acinfinity",
            SensorSource::EcoWitt => "ecowitt",
            SensorSource::Api => "api",
        }
    }

    /// Inverse of [`as_str`](Self::as_str).
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "acinfinity" => Some(SensorSource::AcInfinity),
            "ecowitt" => Some(SensorSource::EcoWitt),
            "api" => Some(SensorSource::Api),
            _ => None,
        }
    }
}

impl Display for SensorSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// 3.3 Sensor
// ----------------------------------------------------------------------------

/// Unique identity of a sensor: which gateway, which device, which metric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SensorKey {
    pub source: SensorSource,
    pub device: CompactString,
    pub metric: CompactString,
}

impl SensorKey {
    pub fn new(source: SensorSource, device: impl AsRef<str>, metric: impl AsRef<str>) -> Self {
        Self {
            source,
            device: CompactString::from(device.as_ref()),
            metric: CompactString::from(metric.as_ref()),
        }
    }
}

impl Display for SensorKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.device, self.metric)
    }
}

/// A registered sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// Storage identifier
    pub id: SensorId,
    /// Identity tuple
    #[serde(flatten)]
    pub key: SensorKey,
    /// Human label
    pub name: String,
    /// Display unit
    pub unit: String,
    /// Zone association, if any
    pub zone_id: Option<ZoneId>,
    /// Whether the sensor shows up on dashboards
    pub visible: bool,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

/// Everything needed to register a sensor; the id is assigned by storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSensor {
    pub key: SensorKey,
    pub name: String,
    pub unit: String,
    pub zone_id: Option<ZoneId>,
    pub visible: bool,
}

/// Replacement for the editable part of a sensor. The identity tuple and
/// the id never change.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorUpdate {
    pub name: String,
    pub unit: String,
    /// `None` takes the sensor out of every zone
    #[serde(default)]
    pub zone_id: Option<ZoneId>,
    pub visible: bool,
}

// ----------------------------------------------------------------------------
// 3.4 Readings
// ----------------------------------------------------------------------------

/// One immutable, timestamped reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: ReadingId,
    pub sensor_id: SensorId,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}

/// Time window for a reading query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingWindow {
    /// Strictly after the instant
    Since(DateTime<Utc>),
    /// Between both instants, inclusive
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl ReadingWindow {
    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        match *self {
            ReadingWindow::Since(start) => at > start,
            ReadingWindow::Between(start, end) => at >= start && at <= end,
        }
    }
}

// ----------------------------------------------------------------------------
// 3.5 Chart Record
// ----------------------------------------------------------------------------

/// The record shape the charting frontend consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartRecord {
    pub id: ReadingId,
    pub sensor_id: SensorId,
    pub value: f64,
    pub create_dt: DateTime<Utc>,
    pub sensor_name: String,
}

impl ChartRecord {
    pub fn from_reading(reading: &Reading, sensor_name: &str) -> Self {
        Self {
            id: reading.id,
            sensor_id: reading.sensor_id,
            value: reading.value,
            create_dt: reading.created_at,
            sensor_name: sensor_name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sensor_id_parsing() {
        assert_eq!(" 7 ".parse::<SensorId>().ok(), Some(SensorId(7)));
        assert!("seven".parse::<SensorId>().is_err());
    }

    #[test]
    fn test_source_wire_names() {
        for source in [SensorSource::AcInfinity, SensorSource::EcoWitt, SensorSource::Api] {
            assert_eq!(SensorSource::from_wire(source.as_str()), Some(source));
        }
        assert_eq!(SensorSource::from_wire("mqtt"), None);
    }

    #[test]
    fn test_window_bounds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();

        assert!(!ReadingWindow::Since(t0).contains(t0));
        assert!(ReadingWindow::Since(t0).contains(t1));
        assert!(ReadingWindow::Between(t0, t1).contains(t0));
        assert!(ReadingWindow::Between(t0, t1).contains(t1));
    }

    #[test]
    fn test_chart_record_wire_shape() {
        let reading = Reading {
            id: ReadingId(3),
            sensor_id: SensorId(7),
            value: 23.5,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        };
        let json = serde_json::to_value(ChartRecord::from_reading(&reading, "Tent temp")).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["sensor_id"], 7);
        assert_eq!(json["value"], 23.5);
        assert_eq!(json["create_dt"], "2024-01-01T12:00:00Z");
        assert_eq!(json["sensor_name"], "Tent temp");
    }
}
