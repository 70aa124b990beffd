use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    models::{CommandAuditEvent, DeviceRecord, DeviceUpdate, ListQuery, NewReading, StoredReading},
    Store, StoreError,
};

/// Process-local store. Each collection sits behind its own `RwLock`, so a
/// device merge is applied under one write guard.
#[derive(Clone, Default)]
pub struct MemoryStore {
    devices: Arc<RwLock<HashMap<String, Map<String, Value>>>>,
    readings: Arc<RwLock<Vec<StoredReading>>>,
    audit: Arc<RwLock<Vec<CommandAuditEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_device(&self, key: &str) -> Result<Option<DeviceRecord>, StoreError> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(key)
            .map(DeviceRecord::from_document)
            .transpose()?)
    }

    async fn merge_device(&self, key: &str, update: &DeviceUpdate) -> Result<(), StoreError> {
        let mut devices = self.devices.write().await;
        let doc = devices.entry(key.to_owned()).or_default();
        for (field, value) in update.to_document() {
            doc.insert(field, value);
        }
        Ok(())
    }

    async fn insert_reading(&self, reading: NewReading) -> Result<StoredReading, StoreError> {
        let stored = StoredReading {
            id: Uuid::new_v4(),
            device_id: reading.device_id,
            received_at: Utc::now(),
            values: reading.values,
        };
        self.readings.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn list_readings(&self, query: &ListQuery) -> Result<Vec<StoredReading>, StoreError> {
        let readings = self.readings.read().await;
        let mut matching: Vec<StoredReading> = readings
            .iter()
            .filter(|r| query.device_id.as_ref().map_or(true, |id| &r.device_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        matching.truncate(query.limit);
        Ok(matching)
    }

    async fn latest_per_device(&self) -> Result<Vec<StoredReading>, StoreError> {
        let readings = self.readings.read().await;
        Ok(latest_per_device(readings.iter()))
    }

    async fn append_audit(&self, event: &CommandAuditEvent) -> Result<(), StoreError> {
        self.audit.write().await.push(event.clone());
        Ok(())
    }

    async fn list_audit(&self, query: &ListQuery) -> Result<Vec<CommandAuditEvent>, StoreError> {
        let audit = self.audit.read().await;
        let mut matching: Vec<CommandAuditEvent> = audit
            .iter()
            .filter(|e| query.device_id.as_ref().map_or(true, |id| &e.device_id == id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        matching.truncate(query.limit);
        Ok(matching)
    }
}

/// Single pass keeping the best-seen reading per device.
///
/// Ties on `received_at` keep whichever reading was seen first; callers must
/// not rely on that.
pub fn latest_per_device<'a>(
    readings: impl IntoIterator<Item = &'a StoredReading>,
) -> Vec<StoredReading> {
    let mut best: HashMap<&str, &StoredReading> = HashMap::new();
    for reading in readings {
        best.entry(reading.device_id.as_str())
            .and_modify(|current| {
                if reading.received_at > current.received_at {
                    *current = reading;
                }
            })
            .or_insert(reading);
    }
    best.into_values().cloned().collect()
}
