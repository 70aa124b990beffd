use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    control::CommandRequest,
    db::models::{
        CommandAuditEvent, CommandPayload, DeviceRecord, DeviceStatus, LastUpdate, StoredReading,
    },
};

/// A stored reading: the device's metric fields plus server metadata.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReadingDto {
    pub id: Uuid,
    pub device_id: String,
    /// RFC 3339 receive time.
    pub received_at: DateTime<Utc>,
    /// Metric name → value, as pushed by the device.
    #[serde(flatten)]
    pub values: BTreeMap<String, Value>,
}

impl From<StoredReading> for ReadingDto {
    fn from(r: StoredReading) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            received_at: r.received_at,
            values: r.values.into_iter().collect(),
        }
    }
}

/// Body of `POST /api/command`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CommandRequestDto {
    /// Required; a missing or blank value is rejected with `400`.
    pub device_id: Option<String>,
    pub cmd: Option<String>,
    pub action: Option<String>,
    #[schema(value_type = Option<f64>)]
    pub duration: Option<serde_json::Number>,
    /// Issuing user; recorded as `api` when absent.
    pub user: Option<String>,
}

impl From<CommandRequestDto> for CommandRequest {
    fn from(d: CommandRequestDto) -> Self {
        Self {
            device_id: d.device_id,
            cmd: d.cmd,
            action: d.action,
            duration: d.duration,
            user: d.user,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandResponseDto {
    pub status: String,
    pub topic: String,
    pub payload: CommandPayload,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CommandAuditDto {
    pub id: Uuid,
    pub device_id: String,
    pub topic: String,
    pub command: CommandPayload,
    pub user: String,
    pub issued_at: DateTime<Utc>,
}

impl From<CommandAuditEvent> for CommandAuditDto {
    fn from(e: CommandAuditEvent) -> Self {
        Self {
            id: e.id,
            device_id: e.device_id,
            topic: e.topic,
            command: e.command,
            user: e.user,
            issued_at: e.issued_at,
        }
    }
}

/// The aggregate device document.
///
/// Besides `Sensor` and `LastUpdate` it carries one field per metric
/// (`Temperature`, `CO2`, …) and one rolling-history string per metric
/// (`Avg_Temp`, `Avg_CO2`, …) of the form `"22.5:16/Oct,21.0:15/Oct"`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeviceDocumentDto {
    #[serde(rename = "Sensor", skip_serializing_if = "Option::is_none")]
    pub sensor: Option<DeviceStatus>,
    #[serde(rename = "LastUpdate", skip_serializing_if = "Option::is_none")]
    pub last_update: Option<LastUpdate>,
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl From<DeviceRecord> for DeviceDocumentDto {
    fn from(r: DeviceRecord) -> Self {
        let mut fields: BTreeMap<String, Value> = r.to_document().into_iter().collect();
        fields.remove("Sensor");
        fields.remove("LastUpdate");
        Self {
            sensor: r.status,
            last_update: r.last_update,
            fields,
        }
    }
}
