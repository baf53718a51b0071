// ============================================================================
// SECTION 9: READING STORE
// ============================================================================
// Write path: timestamped appends for resolved sensors.
// Read path: duration queries anchored at "now" and inclusive range queries
// whose bounds are canonicalised to UTC before they reach storage.
// ============================================================================

use std::sync::Arc;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, TimeZone, Utc};
use tracing::trace;

use crate::error::{QueryError, StorageResult};
use crate::model::{Reading, ReadingId, ReadingWindow, SensorId};
use crate::storage::TelemetryStorage;

// ----------------------------------------------------------------------------
// 9.1 Bound Canonicalisation
// ----------------------------------------------------------------------------

/// Wall-clock formats accepted for range bounds, interpreted in local time.
const LOCAL_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

fn resolve_local<Tz: TimeZone>(raw: &str, tz: &Tz, naive: NaiveDateTime) -> Result<DateTime<Utc>, QueryError> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        // Repeated hour when clocks go back: take the first occurrence.
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => Err(QueryError::invalid_bound(
            raw,
            "local time does not exist (daylight saving gap)",
        )),
    }
}

/// Convert a raw range bound to a UTC instant.
///
/// - `YYYY-MM-DD` is local midnight of that day
/// - `YYYY-MM-DD HH:MM[:SS]` and the `T`-separated form are local wall-clock
///   times
/// - RFC 3339 strings carry their own offset
pub fn canonicalize_bound<Tz: TimeZone>(raw: &str, tz: &Tz) -> Result<DateTime<Utc>, QueryError> {
    let trimmed = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let midnight = date.and_time(chrono::NaiveTime::MIN);
        return resolve_local(raw, tz, midnight);
    }

    for format in LOCAL_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return resolve_local(raw, tz, naive);
        }
    }

    Err(QueryError::invalid_bound(
        raw,
        "expected YYYY-MM-DD, YYYY-MM-DD HH:MM[:SS] or an RFC 3339 timestamp",
    ))
}

// ----------------------------------------------------------------------------
// 9.2 Reading Store
// ----------------------------------------------------------------------------

/// Appends and queries readings over a [`TelemetryStorage`].
#[derive(Clone)]
pub struct ReadingStore {
    storage: Arc<dyn TelemetryStorage>,
}

impl ReadingStore {
    pub fn new(storage: Arc<dyn TelemetryStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn TelemetryStorage> {
        &self.storage
    }

    /// Record a reading stamped with the current time.
    pub async fn append(&self, sensor: SensorId, value: f64) -> StorageResult<ReadingId> {
        self.append_at(sensor, value, Utc::now()).await
    }

    pub async fn append_at(
        &self,
        sensor: SensorId,
        value: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<ReadingId> {
        self.storage.insert_reading(sensor, value, at).await
    }

    /// Readings strictly newer than `now - minutes`, ascending.
    pub async fn query_by_duration(&self, sensor: SensorId, minutes: u64) -> Result<Vec<Reading>, QueryError> {
        let start = i64::try_from(minutes)
            .ok()
            .and_then(Duration::try_minutes)
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let readings = self
            .storage
            .query_readings(sensor, ReadingWindow::Since(start))
            .await?;

        trace!(
            target: "isley::readings",
            sensor = %sensor,
            minutes,
            rows = readings.len(),
            "Duration query"
        );
        Ok(readings)
    }

    /// Readings between two local-time bounds, both inclusive, ascending.
    pub async fn query_by_range(&self, sensor: SensorId, start: &str, end: &str) -> Result<Vec<Reading>, QueryError> {
        self.query_by_range_in(sensor, start, end, &chrono::Local).await
    }

    /// Same as [`query_by_range`](Self::query_by_range) with an explicit zone
    /// for the bare-date and wall-clock forms.
    pub async fn query_by_range_in<Tz: TimeZone>(
        &self,
        sensor: SensorId,
        start: &str,
        end: &str,
        tz: &Tz,
    ) -> Result<Vec<Reading>, QueryError> {
        let start = canonicalize_bound(start, tz)?;
        let end = canonicalize_bound(end, tz)?;
        if start > end {
            return Ok(Vec::new());
        }

        let readings = self
            .storage
            .query_readings(sensor, ReadingWindow::Between(start, end))
            .await?;

        trace!(
            target: "isley::readings",
            sensor = %sensor,
            start = %start,
            end = %end,
            rows = readings.len(),
            "Range query"
        );
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewSensor, SensorKey, SensorSource};
    use crate::storage::MemoryStorage;
    use chrono::FixedOffset;
    use pretty_assertions::assert_eq;

    async fn store_with_sensor() -> (ReadingStore, SensorId) {
        let storage = Arc::new(MemoryStorage::new());
        let id = storage
            .insert_sensor(NewSensor {
                key: SensorKey::new(SensorSource::AcInfinity, "E4A1", "ACI.tempF"),
                name: "Temp".into(),
                unit: "°F".into(),
                zone_id: None,
                visible: true,
            })
            .await
            .unwrap();
        (ReadingStore::new(storage), id)
    }

    #[test]
    fn test_bare_date_is_local_midnight() {
        let tz = FixedOffset::east_opt(2 * 3600).unwrap();
        let got = canonicalize_bound("2024-01-01", &tz).unwrap();
        assert_eq!(got, Utc.with_ymd_and_hms(2023, 12, 31, 22, 0, 0).unwrap());
    }

    #[test]
    fn test_wall_clock_forms_agree() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 17, 30, 0).unwrap();
        for raw in [
            "2024-01-01 12:30",
            "2024-01-01 12:30:00",
            "2024-01-01T12:30",
            "2024-01-01T12:30:00",
            "2024-01-01T17:30:00Z",
            "2024-01-01T12:30:00-05:00",
        ] {
            assert_eq!(canonicalize_bound(raw, &tz).unwrap(), expected, "{}", raw);
        }
    }

    #[test]
    fn test_unparseable_bound() {
        let err = canonicalize_bound("yesterday", &Utc).unwrap_err();
        assert!(matches!(err, QueryError::InvalidBound { .. }));
        assert!(err.is_client_error());
        assert!(canonicalize_bound("2024-13-01", &Utc).is_err());
    }

    #[test]
    fn test_date_and_midnight_are_equivalent() {
        let local = chrono::Local;
        assert_eq!(
            canonicalize_bound("2024-01-01", &local).unwrap(),
            canonicalize_bound("2024-01-01 00:00:00", &local).unwrap()
        );
        assert_eq!(
            canonicalize_bound("2024-01-02", &local).unwrap(),
            canonicalize_bound("2024-01-02 00:00:00", &local).unwrap()
        );
    }

    #[tokio::test]
    async fn test_range_query_equivalence() {
        let (store, id) = store_with_sensor().await;
        let tz = FixedOffset::east_opt(0).unwrap();
        for hour in 0..30 {
            let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(hour);
            store.append_at(id, hour as f64, at).await.unwrap();
        }

        let by_date = store.query_by_range_in(id, "2024-01-01", "2024-01-02", &tz).await.unwrap();
        let by_time = store
            .query_by_range_in(id, "2024-01-01 00:00:00", "2024-01-02 00:00:00", &tz)
            .await
            .unwrap();
        assert_eq!(by_date, by_time);
        // Inclusive on both ends: hours 0..=24
        assert_eq!(by_date.len(), 25);
        assert_eq!(by_date.first().unwrap().value, 0.0);
        assert_eq!(by_date.last().unwrap().value, 24.0);
    }

    #[tokio::test]
    async fn test_inverted_range_is_empty() {
        let (store, id) = store_with_sensor().await;
        store.append(id, 1.0).await.unwrap();
        let rows = store
            .query_by_range_in(id, "2030-01-02", "2000-01-01", &Utc)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_duration_query_is_anchored_at_now() {
        let (store, id) = store_with_sensor().await;
        let now = Utc::now();
        store.append_at(id, 1.0, now - Duration::minutes(90)).await.unwrap();
        store.append_at(id, 2.0, now - Duration::minutes(30)).await.unwrap();
        store.append_at(id, 3.0, now - Duration::minutes(5)).await.unwrap();

        let rows = store.query_by_duration(id, 60).await.unwrap();
        let values: Vec<f64> = rows.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);

        // Absurd spans clamp instead of overflowing
        assert_eq!(store.query_by_duration(id, u64::MAX).await.unwrap().len(), 3);
    }
}
