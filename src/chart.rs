// ============================================================================
// SECTION 13: CHART QUERY SERVICE
// ============================================================================
// Read path of the charting frontend:
//   cache lookup → reading store → downsampler (duration only) → cache fill
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::cache::{CachedRecords, QueryCache};
use crate::downsample;
use crate::error::QueryError;
use crate::model::{ChartRecord, SensorId};
use crate::readings::ReadingStore;

// ----------------------------------------------------------------------------
// 13.1 Request
// ----------------------------------------------------------------------------

/// Raw chart query parameters, as they arrive on the query string.
///
/// Empty strings count as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChartRequest {
    pub sensor: Option<String>,
    pub minutes: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Which store query a request maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPlan<'a> {
    Range { start: &'a str, end: &'a str },
    Duration { minutes: u64 },
}

impl ChartRequest {
    pub fn for_minutes(sensor: SensorId, minutes: u64) -> Self {
        Self {
            sensor: Some(sensor.to_string()),
            minutes: Some(minutes.to_string()),
            ..Self::default()
        }
    }

    pub fn for_range(sensor: SensorId, start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            sensor: Some(sensor.to_string()),
            start: Some(start.into()),
            end: Some(end.into()),
            ..Self::default()
        }
    }

    fn sensor_id(&self) -> Result<SensorId, QueryError> {
        let raw = present(&self.sensor).ok_or(QueryError::MissingSensor)?;
        raw.parse::<SensorId>()
            .map_err(|_| QueryError::InvalidSensor { raw: raw.to_string() })
    }

    /// A complete start/end pair wins over `minutes`.
    fn plan(&self) -> Result<QueryPlan<'_>, QueryError> {
        if let (Some(start), Some(end)) = (present(&self.start), present(&self.end)) {
            return Ok(QueryPlan::Range { start, end });
        }
        match present(&self.minutes) {
            Some(raw) => raw
                .parse::<u64>()
                .map(|minutes| QueryPlan::Duration { minutes })
                .map_err(|_| QueryError::InvalidMinutes { raw: raw.to_string() }),
            None => Err(QueryError::MissingWindow),
        }
    }

    fn cache_key(&self) -> String {
        QueryCache::key(
            present(&self.sensor).unwrap_or_default(),
            present(&self.minutes).unwrap_or_default(),
            present(&self.start).unwrap_or_default(),
            present(&self.end).unwrap_or_default(),
        )
    }
}

// ----------------------------------------------------------------------------
// 13.2 Service
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ChartStats {
    requests: AtomicU64,
    store_queries: AtomicU64,
}

/// Serves chart data through the query cache.
pub struct ChartQueryService {
    store: ReadingStore,
    cache: Arc<QueryCache>,
    stats: ChartStats,
}

impl ChartQueryService {
    pub fn new(store: ReadingStore, cache: Arc<QueryCache>) -> Self {
        Self {
            store,
            cache,
            stats: ChartStats::default(),
        }
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Answer a chart request.
    ///
    /// A cache hit returns the cached `Arc` itself; a miss queries the store,
    /// downsamples duration queries and fills the cache.
    pub async fn handle(&self, request: &ChartRequest) -> Result<CachedRecords, QueryError> {
        self.stats.requests.fetch_add(1, AtomicOrdering::Relaxed);

        let sensor = request.sensor_id()?;
        let plan = request.plan()?;
        let key = request.cache_key();

        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        self.stats.store_queries.fetch_add(1, AtomicOrdering::Relaxed);
        let readings = match plan {
            QueryPlan::Range { start, end } => self.store.query_by_range(sensor, start, end).await?,
            QueryPlan::Duration { minutes } => {
                let rows = self.store.query_by_duration(sensor, minutes).await?;
                downsample::reduce(rows, minutes)
            }
        };

        let sensor_name = self
            .store
            .storage()
            .sensor(sensor)
            .await?
            .map(|s| s.name)
            .unwrap_or_default();

        let records: Vec<ChartRecord> = readings
            .iter()
            .map(|r| ChartRecord::from_reading(r, &sensor_name))
            .collect();

        debug!(
            target: "isley::chart",
            sensor = %sensor,
            plan = ?plan,
            points = records.len(),
            "Chart query served from storage"
        );

        let records = Arc::new(records);
        self.cache.put(key, Arc::clone(&records));
        Ok(records)
    }

    /// `(requests, store queries)` since start.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.stats.requests.load(AtomicOrdering::Relaxed),
            self.stats.store_queries.load(AtomicOrdering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigManager, TelemetryConfig};
    use crate::model::{NewSensor, Reading, ReadingId, SensorKey, SensorSource};
    use crate::storage::{MemoryStorage, MockTelemetryStorage, TelemetryStorage};
    use chrono::{Duration, Utc};
    use pretty_assertions::assert_eq;

    fn cache() -> Arc<QueryCache> {
        Arc::new(QueryCache::new(Arc::new(ConfigManager::new(TelemetryConfig::default()))))
    }

    async fn seeded_service(count: i64, spacing_minutes: i64) -> (ChartQueryService, SensorId) {
        let storage = Arc::new(MemoryStorage::new());
        let sensor = storage
            .insert_sensor(NewSensor {
                key: SensorKey::new(SensorSource::EcoWitt, "10.0.0.2", "Soil.1"),
                name: "Pot A".into(),
                unit: "%".into(),
                zone_id: None,
                visible: true,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let store = ReadingStore::new(storage);
        for i in 0..count {
            let at = now - Duration::minutes((count - i) * spacing_minutes);
            store.append_at(sensor, i as f64, at).await.unwrap();
        }
        (ChartQueryService::new(store, cache()), sensor)
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let (service, sensor) = seeded_service(0, 1).await;

        let err = service.handle(&ChartRequest::default()).await.unwrap_err();
        assert!(matches!(err, QueryError::MissingSensor));

        let request = ChartRequest { sensor: Some("abc".into()), minutes: Some("60".into()), ..Default::default() };
        assert!(matches!(service.handle(&request).await.unwrap_err(), QueryError::InvalidSensor { .. }));

        let request = ChartRequest { sensor: Some(sensor.to_string()), ..Default::default() };
        assert!(matches!(service.handle(&request).await.unwrap_err(), QueryError::MissingWindow));

        // Half a range is no range
        let request = ChartRequest {
            sensor: Some(sensor.to_string()),
            start: Some("2024-01-01".into()),
            ..Default::default()
        };
        assert!(matches!(service.handle(&request).await.unwrap_err(), QueryError::MissingWindow));

        let request = ChartRequest { sensor: Some(sensor.to_string()), minutes: Some("-5".into()), ..Default::default() };
        assert!(matches!(service.handle(&request).await.unwrap_err(), QueryError::InvalidMinutes { .. }));
    }

    #[tokio::test]
    async fn test_week_long_duration_is_downsampled() {
        // 2000 readings, five minutes apart, all inside the window
        let (service, sensor) = seeded_service(2000, 5).await;

        let records = service.handle(&ChartRequest::for_minutes(sensor, 10_081)).await.unwrap();
        assert_eq!(records.len(), 100);
        assert_eq!(records[0].value, 0.0);
        assert_eq!(records[1].value, 20.0);
        assert_eq!(records[0].sensor_name, "Pot A");
        assert!(records.windows(2).all(|w| w[0].create_dt <= w[1].create_dt));
    }

    #[tokio::test]
    async fn test_range_path_wins_and_is_not_downsampled() {
        let (service, sensor) = seeded_service(500, 1).await;
        let request = ChartRequest {
            minutes: Some("10081".into()),
            ..ChartRequest::for_range(sensor, "2000-01-01", "2100-01-01")
        };
        let records = service.handle(&request).await.unwrap();
        assert_eq!(records.len(), 500);
    }

    #[tokio::test]
    async fn test_repeat_request_is_served_from_cache() {
        let mut storage = MockTelemetryStorage::new();
        storage.expect_query_readings().times(1).returning(|sensor, _| {
            Ok(vec![Reading {
                id: ReadingId(1),
                sensor_id: sensor,
                value: 23.5,
                created_at: Utc::now(),
            }])
        });
        storage.expect_sensor().times(1).returning(|_| Ok(None));

        let service = ChartQueryService::new(ReadingStore::new(Arc::new(storage)), cache());
        let request = ChartRequest::for_minutes(SensorId(7), 60);

        let first = service.handle(&request).await.unwrap();
        let second = service.handle(&request).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first[0].sensor_name, "");
        assert_eq!(service.counters(), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_a_tenth_of_the_interval() {
        let mut storage = MockTelemetryStorage::new();
        storage.expect_query_readings().times(2).returning(|sensor, _| {
            Ok(vec![Reading {
                id: ReadingId(1),
                sensor_id: sensor,
                value: 23.5,
                created_at: Utc::now(),
            }])
        });
        storage.expect_sensor().times(2).returning(|_| Ok(None));

        // 60s polling interval, so entries live for 6s
        let service = ChartQueryService::new(ReadingStore::new(Arc::new(storage)), cache());
        let request = ChartRequest::for_minutes(SensorId(7), 60);

        let first = service.handle(&request).await.unwrap();
        tokio::time::advance(std::time::Duration::from_millis(6_100)).await;
        let second = service.handle(&request).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(service.counters(), (2, 2));
    }

    #[tokio::test]
    async fn test_distinct_parameters_are_distinct_entries() {
        let (service, sensor) = seeded_service(10, 1).await;
        service.handle(&ChartRequest::for_minutes(sensor, 60)).await.unwrap();
        service.handle(&ChartRequest::for_minutes(sensor, 30)).await.unwrap();
        assert_eq!(service.cache().len(), 2);
    }
}
