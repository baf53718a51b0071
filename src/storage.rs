// ============================================================================
// SECTION 8: STORAGE CONTRACT
// ============================================================================
// The narrow slice of persistence the telemetry core needs:
// - Sensor lookup by identity tuple and by id
// - Append-only readings, queried per sensor in ascending time order
// - Bulk pruning for retention
//
// `MemoryStorage` is the in-process implementation; a relational backend
// implements the same trait out of tree.
// ============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::error::{StorageError, StorageResult};
use crate::model::{
    NewSensor, Reading, ReadingId, ReadingWindow, Sensor, SensorId, SensorKey, SensorUpdate,
};

// ----------------------------------------------------------------------------
// 8.1 Storage Trait
// ----------------------------------------------------------------------------

/// Persistence operations used by the registry, the reading store and the
/// retention job.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetryStorage: Send + Sync {
    /// Look a sensor up by its identity tuple.
    async fn find_sensor(&self, key: &SensorKey) -> StorageResult<Option<SensorId>>;

    /// Register a sensor. Fails with [`StorageError::Conflict`] when the key
    /// is already taken.
    async fn insert_sensor(&self, sensor: NewSensor) -> StorageResult<SensorId>;

    async fn sensor(&self, id: SensorId) -> StorageResult<Option<Sensor>>;

    /// All sensors, ordered by id.
    async fn list_sensors(&self) -> StorageResult<Vec<Sensor>>;

    /// Overwrite name, unit, zone and visibility; returns the updated row.
    async fn update_sensor(&self, id: SensorId, update: SensorUpdate) -> StorageResult<Sensor>;

    async fn insert_reading(
        &self,
        sensor: SensorId,
        value: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<ReadingId>;

    /// Readings of one sensor inside `window`, ascending by time.
    async fn query_readings(
        &self,
        sensor: SensorId,
        window: ReadingWindow,
    ) -> StorageResult<Vec<Reading>>;

    async fn latest_reading(&self, sensor: SensorId) -> StorageResult<Option<Reading>>;

    /// Delete every reading strictly older than `cutoff`; returns the count.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64>;
}

// ----------------------------------------------------------------------------
// 8.2 In-Memory Storage
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct SensorTable {
    by_id: BTreeMap<SensorId, Sensor>,
    by_key: HashMap<SensorKey, SensorId>,
}

/// In-process storage backed by a sensor table and per-sensor reading vectors.
pub struct MemoryStorage {
    /// Sensor rows plus the unique identity index
    sensors: RwLock<SensorTable>,
    /// Readings per sensor, kept sorted by `created_at`
    readings: DashMap<SensorId, Vec<Reading>>,
    next_sensor_id: AtomicI64,
    next_reading_id: AtomicU64,
    /// Total readings currently held
    reading_count: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            sensors: RwLock::new(SensorTable::default()),
            readings: DashMap::new(),
            next_sensor_id: AtomicI64::new(1),
            next_reading_id: AtomicU64::new(1),
            reading_count: AtomicUsize::new(0),
        }
    }

    /// Number of readings currently stored.
    pub fn reading_count(&self) -> usize {
        self.reading_count.load(AtomicOrdering::Relaxed)
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.read().by_id.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetryStorage for MemoryStorage {
    async fn find_sensor(&self, key: &SensorKey) -> StorageResult<Option<SensorId>> {
        Ok(self.sensors.read().by_key.get(key).copied())
    }

    async fn insert_sensor(&self, sensor: NewSensor) -> StorageResult<SensorId> {
        let mut table = self.sensors.write();
        if table.by_key.contains_key(&sensor.key) {
            return Err(StorageError::Conflict { key: sensor.key });
        }

        let id = SensorId(self.next_sensor_id.fetch_add(1, AtomicOrdering::Relaxed));
        table.by_key.insert(sensor.key.clone(), id);
        table.by_id.insert(
            id,
            Sensor {
                id,
                key: sensor.key,
                name: sensor.name,
                unit: sensor.unit,
                zone_id: sensor.zone_id,
                visible: sensor.visible,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    async fn sensor(&self, id: SensorId) -> StorageResult<Option<Sensor>> {
        Ok(self.sensors.read().by_id.get(&id).cloned())
    }

    async fn list_sensors(&self) -> StorageResult<Vec<Sensor>> {
        Ok(self.sensors.read().by_id.values().cloned().collect())
    }

    async fn update_sensor(&self, id: SensorId, update: SensorUpdate) -> StorageResult<Sensor> {
        let mut table = self.sensors.write();
        let sensor = table
            .by_id
            .get_mut(&id)
            .ok_or(StorageError::SensorNotFound { id })?;

        sensor.name = update.name;
        sensor.unit = update.unit;
        sensor.zone_id = update.zone_id;
        sensor.visible = update.visible;
        Ok(sensor.clone())
    }

    async fn insert_reading(
        &self,
        sensor: SensorId,
        value: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<ReadingId> {
        if !self.sensors.read().by_id.contains_key(&sensor) {
            return Err(StorageError::SensorNotFound { id: sensor });
        }

        let id = ReadingId(self.next_reading_id.fetch_add(1, AtomicOrdering::Relaxed));
        let reading = Reading {
            id,
            sensor_id: sensor,
            value,
            created_at: at,
        };

        let mut series = self.readings.entry(sensor).or_default();
        // Appends are almost always in order; backfills land after equal timestamps.
        let pos = series.partition_point(|r| r.created_at <= at);
        series.insert(pos, reading);
        self.reading_count.fetch_add(1, AtomicOrdering::Relaxed);

        Ok(id)
    }

    async fn query_readings(
        &self,
        sensor: SensorId,
        window: ReadingWindow,
    ) -> StorageResult<Vec<Reading>> {
        let Some(series) = self.readings.get(&sensor) else {
            return Ok(Vec::new());
        };

        let (lo, hi) = match window {
            ReadingWindow::Since(start) => (series.partition_point(|r| r.created_at <= start), series.len()),
            ReadingWindow::Between(start, end) => {
                if start > end {
                    return Ok(Vec::new());
                }
                (
                    series.partition_point(|r| r.created_at < start),
                    series.partition_point(|r| r.created_at <= end),
                )
            }
        };

        Ok(series[lo..hi].to_vec())
    }

    async fn latest_reading(&self, sensor: SensorId) -> StorageResult<Option<Reading>> {
        Ok(self.readings.get(&sensor).and_then(|series| series.last().copied()))
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> StorageResult<u64> {
        let mut removed = 0usize;
        for mut series in self.readings.iter_mut() {
            let keep_from = series.partition_point(|r| r.created_at < cutoff);
            if keep_from > 0 {
                series.drain(..keep_from);
                removed += keep_from;
            }
        }
        self.reading_count.fetch_sub(removed, AtomicOrdering::Relaxed);
        Ok(removed as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SensorSource, ZoneId};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn new_sensor(metric: &str) -> NewSensor {
        NewSensor {
            key: SensorKey::new(SensorSource::EcoWitt, "10.0.0.2", metric),
            name: metric.to_string(),
            unit: "%".into(),
            zone_id: None,
            visible: true,
        }
    }

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    #[tokio::test]
    async fn test_insert_sensor_conflict() {
        let storage = MemoryStorage::new();
        let id = storage.insert_sensor(new_sensor("Soil.1")).await.unwrap();
        assert_eq!(storage.find_sensor(&new_sensor("Soil.1").key).await.unwrap(), Some(id));

        let err = storage.insert_sensor(new_sensor("Soil.1")).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));
        assert_eq!(storage.sensor_count(), 1);
    }

    #[tokio::test]
    async fn test_update_sensor_keeps_identity() {
        let storage = MemoryStorage::new();
        let id = storage.insert_sensor(new_sensor("Soil.1")).await.unwrap();

        let updated = storage
            .update_sensor(
                id,
                SensorUpdate {
                    name: "Pot A moisture".into(),
                    unit: "% VWC".into(),
                    zone_id: Some(ZoneId(3)),
                    visible: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Pot A moisture");
        assert_eq!(updated.zone_id, Some(ZoneId(3)));
        assert!(!updated.visible);
        assert_eq!(updated.key, new_sensor("Soil.1").key);
        assert_eq!(storage.sensor(id).await.unwrap(), Some(updated));
        assert_eq!(storage.find_sensor(&new_sensor("Soil.1").key).await.unwrap(), Some(id));

        let err = storage
            .update_sensor(
                SensorId(99),
                SensorUpdate { name: "x".into(), unit: "".into(), zone_id: None, visible: true },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SensorNotFound { id: SensorId(99) }));
    }

    #[tokio::test]
    async fn test_reading_for_unknown_sensor() {
        let storage = MemoryStorage::new();
        let err = storage.insert_reading(SensorId(42), 1.0, t(0)).await.unwrap_err();
        assert!(matches!(err, StorageError::SensorNotFound { id: SensorId(42) }));
    }

    #[tokio::test]
    async fn test_readings_stay_sorted_and_windows_apply() {
        let storage = MemoryStorage::new();
        let id = storage.insert_sensor(new_sensor("Soil.1")).await.unwrap();
        for minute in [0, 10, 5, 20, 15] {
            storage.insert_reading(id, minute as f64, t(minute)).await.unwrap();
        }

        let all = storage.query_readings(id, ReadingWindow::Since(t(-1))).await.unwrap();
        let values: Vec<f64> = all.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![0.0, 5.0, 10.0, 15.0, 20.0]);

        // Since is exclusive
        let since = storage.query_readings(id, ReadingWindow::Since(t(10))).await.unwrap();
        assert_eq!(since.len(), 2);

        // Between is inclusive on both ends
        let between = storage
            .query_readings(id, ReadingWindow::Between(t(5), t(15)))
            .await
            .unwrap();
        assert_eq!(between.len(), 3);

        let inverted = storage
            .query_readings(id, ReadingWindow::Between(t(15), t(5)))
            .await
            .unwrap();
        assert!(inverted.is_empty());

        assert_eq!(storage.latest_reading(id).await.unwrap().unwrap().value, 20.0);
    }

    #[tokio::test]
    async fn test_prune_before() {
        let storage = MemoryStorage::new();
        let a = storage.insert_sensor(new_sensor("Soil.1")).await.unwrap();
        let b = storage.insert_sensor(new_sensor("Soil.2")).await.unwrap();
        for minute in 0..10 {
            storage.insert_reading(a, 1.0, t(minute)).await.unwrap();
            storage.insert_reading(b, 2.0, t(minute)).await.unwrap();
        }

        let removed = storage.prune_before(t(4)).await.unwrap();
        assert_eq!(removed, 8);
        assert_eq!(storage.reading_count(), 12);

        let left = storage.query_readings(a, ReadingWindow::Since(t(-1))).await.unwrap();
        assert_eq!(left.first().unwrap().created_at, t(4));
    }
}
