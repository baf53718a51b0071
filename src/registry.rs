// ============================================================================
// SECTION 10: SENSOR REGISTRY
// ============================================================================
// Maps a gateway identity tuple (source, device, metric) onto a sensor id,
// creating the sensor the first time the tuple is seen. Creation is
// serialised behind a lock and backed by the storage uniqueness constraint,
// so concurrent first sightings still produce a single row.
// ============================================================================

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::gateway::DeviceReport;
use crate::model::{NewSensor, Sensor, SensorId, SensorKey, SensorUpdate, ZoneId};
use crate::storage::TelemetryStorage;

// ----------------------------------------------------------------------------
// 10.1 Discovery Summary
// ----------------------------------------------------------------------------

/// Outcome of an explicit discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySummary {
    /// Sensors registered by this pass
    pub created: usize,
    /// Sensors that were already registered
    pub existing: usize,
    /// Ids of every sensor the pass touched, in report order
    pub sensors: Vec<SensorId>,
}

// ----------------------------------------------------------------------------
// 10.2 Registry
// ----------------------------------------------------------------------------

pub struct SensorRegistry {
    storage: Arc<dyn TelemetryStorage>,
    /// Held only while creating; lookups never take it
    create_lock: TokioMutex<()>,
}

impl SensorRegistry {
    pub fn new(storage: Arc<dyn TelemetryStorage>) -> Self {
        Self {
            storage,
            create_lock: TokioMutex::new(()),
        }
    }

    /// Resolve `key` to a sensor id, registering it on first sight.
    ///
    /// `label` and `unit` are only used when the sensor is created.
    pub async fn resolve(
        &self,
        key: &SensorKey,
        label: &str,
        unit: &str,
        zone: Option<ZoneId>,
    ) -> StorageResult<SensorId> {
        self.resolve_tracked(key, label, unit, zone)
            .await
            .map(|(id, _)| id)
    }

    /// Like [`resolve`](Self::resolve), also reporting whether a row was
    /// created.
    async fn resolve_tracked(
        &self,
        key: &SensorKey,
        label: &str,
        unit: &str,
        zone: Option<ZoneId>,
    ) -> StorageResult<(SensorId, bool)> {
        if let Some(id) = self.storage.find_sensor(key).await? {
            return Ok((id, false));
        }

        let _guard = self.create_lock.lock().await;

        // Another task may have created it while we waited.
        if let Some(id) = self.storage.find_sensor(key).await? {
            return Ok((id, false));
        }

        let new_sensor = NewSensor {
            key: key.clone(),
            name: label.to_string(),
            unit: unit.to_string(),
            zone_id: zone,
            visible: true,
        };

        match self.storage.insert_sensor(new_sensor).await {
            Ok(id) => {
                info!(
                    target: "isley::registry",
                    sensor = %id,
                    key = %key,
                    name = label,
                    "Registered new sensor"
                );
                Ok((id, true))
            }
            // A writer outside this process won the race.
            Err(StorageError::Conflict { .. }) => {
                debug!(target: "isley::registry", key = %key, "Insert conflict, re-reading winner");
                match self.storage.find_sensor(key).await? {
                    Some(id) => Ok((id, false)),
                    None => Err(StorageError::UnresolvedSensor { key: key.clone() }),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Rename, re-unit, move or hide a sensor.
    pub async fn update(&self, id: SensorId, update: SensorUpdate) -> StorageResult<Sensor> {
        let sensor = self.storage.update_sensor(id, update).await?;
        info!(
            target: "isley::registry",
            sensor = %id,
            name = %sensor.name,
            zone = ?sensor.zone_id,
            visible = sensor.visible,
            "Updated sensor"
        );
        Ok(sensor)
    }

    /// Register every sample of freshly fetched reports under `zone`.
    pub async fn discover(
        &self,
        reports: &[DeviceReport],
        zone: Option<ZoneId>,
    ) -> StorageResult<DiscoverySummary> {
        let mut summary = DiscoverySummary::default();

        for report in reports {
            for sample in &report.samples {
                let key = report.key_for(sample);
                let (id, created) = self
                    .resolve_tracked(&key, &sample.label, &sample.unit, zone)
                    .await?;
                if created {
                    summary.created += 1;
                } else {
                    summary.existing += 1;
                }
                summary.sensors.push(id);
            }
        }

        info!(
            target: "isley::registry",
            created = summary.created,
            existing = summary.existing,
            zone = ?zone,
            "Discovery complete"
        );
        Ok(summary)
    }

    /// Every registered sensor, ordered by id.
    pub async fn list(&self) -> StorageResult<Vec<Sensor>> {
        self.storage.list_sensors().await
    }
}
