use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

/// Reserved value a device reports when a metric is not available.
pub const SENTINEL: f64 = -1.0;

// ---------------------------------------------------------------------------
// Metric
// ---------------------------------------------------------------------------

/// The fixed set of metrics tracked on the aggregate device document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Temperature,
    Humidity,
    Co2,
    FlowRate,
    Lux,
    Level,
    Tds,
    Ph,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Co2,
        Metric::FlowRate,
        Metric::Lux,
        Metric::Level,
        Metric::Tds,
        Metric::Ph,
    ];

    /// Document field holding the current value.
    pub fn field(self) -> &'static str {
        match self {
            Metric::Temperature => "Temperature",
            Metric::Humidity => "Humidity",
            Metric::Co2 => "CO2",
            Metric::FlowRate => "FlowRate",
            Metric::Lux => "Lux",
            Metric::Level => "Level",
            Metric::Tds => "TDS",
            Metric::Ph => "pH",
        }
    }

    /// Document field holding the encoded rolling history.
    pub fn history_field(self) -> &'static str {
        match self {
            Metric::Temperature => "Avg_Temp",
            Metric::Humidity => "Avg_Humid",
            Metric::Co2 => "Avg_CO2",
            Metric::FlowRate => "Avg_FlowRate",
            Metric::Lux => "Avg_Lux",
            Metric::Level => "Avg_Level",
            Metric::Tds => "Avg_TDS",
            Metric::Ph => "Avg_pH",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

// ---------------------------------------------------------------------------
// Device status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum DeviceStatus {
    Online,
    #[serde(rename = "Error_Offline")]
    ErrorOffline,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Online => f.write_str("Online"),
            DeviceStatus::ErrorOffline => f.write_str("Error_Offline"),
        }
    }
}

/// Wall-clock stamp of the most recent successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LastUpdate {
    /// `%H:%M`
    #[serde(rename = "Time")]
    pub time: String,
    /// `%d/%m`
    #[serde(rename = "Date")]
    pub date: String,
}

impl LastUpdate {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            time: now.format("%H:%M").to_string(),
            date: date_stamp(now),
        }
    }
}

/// Calendar date in the `LastUpdate.Date` format.
pub fn date_stamp(now: NaiveDateTime) -> String {
    now.format("%d/%m").to_string()
}

// ---------------------------------------------------------------------------
// Device record
// ---------------------------------------------------------------------------

/// Aggregate state of one device as persisted in the device document.
///
/// Every field is optional because the document is created lazily: an
/// offline cycle may upsert a document that only carries `Sensor`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceRecord {
    pub status: Option<DeviceStatus>,
    pub metrics: BTreeMap<Metric, f64>,
    pub last_update: Option<LastUpdate>,
    /// Encoded rolling history per metric, newest entry first.
    pub history: BTreeMap<Metric, String>,
}

impl DeviceRecord {
    pub fn from_document(doc: &Map<String, Value>) -> Result<Self, serde_json::Error> {
        let status = doc
            .get("Sensor")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?;
        let last_update = doc
            .get("LastUpdate")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()?;

        let mut metrics = BTreeMap::new();
        let mut history = BTreeMap::new();
        for metric in Metric::ALL {
            if let Some(v) = doc.get(metric.field()).and_then(Value::as_f64) {
                metrics.insert(metric, v);
            }
            if let Some(h) = doc.get(metric.history_field()).and_then(Value::as_str) {
                history.insert(metric, h.to_owned());
            }
        }

        Ok(Self { status, metrics, last_update, history })
    }

    pub fn to_document(&self) -> Map<String, Value> {
        let mut doc = Map::new();
        if let Some(status) = self.status {
            doc.insert("Sensor".to_owned(), Value::String(status.to_string()));
        }
        for (metric, value) in &self.metrics {
            doc.insert(metric.field().to_owned(), Value::from(*value));
        }
        if let Some(last_update) = &self.last_update {
            doc.insert(
                "LastUpdate".to_owned(),
                serde_json::json!({ "Time": last_update.time, "Date": last_update.date }),
            );
        }
        for (metric, encoded) in &self.history {
            doc.insert(metric.history_field().to_owned(), Value::String(encoded.clone()));
        }
        doc
    }
}

/// Metric values, timestamp and rolled history written on an `Online` cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSnapshot {
    pub metrics: BTreeMap<Metric, f64>,
    pub last_update: LastUpdate,
    pub history: BTreeMap<Metric, String>,
}

/// One cycle's write to the device document.
///
/// The status is written every cycle; the snapshot only when the cycle is
/// `Online`. Both land in a single merge so a reader never sees one without
/// the other.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate {
    pub status: DeviceStatus,
    pub snapshot: Option<MetricSnapshot>,
}

impl DeviceUpdate {
    pub fn status_only(status: DeviceStatus) -> Self {
        Self { status, snapshot: None }
    }

    pub fn online(snapshot: MetricSnapshot) -> Self {
        Self {
            status: DeviceStatus::Online,
            snapshot: Some(snapshot),
        }
    }

    /// Fields to merge into the stored document; untouched fields are absent.
    pub fn to_document(&self) -> Map<String, Value> {
        let record = match &self.snapshot {
            Some(s) => DeviceRecord {
                status: Some(self.status),
                metrics: s.metrics.clone(),
                last_update: Some(s.last_update.clone()),
                history: s.history.clone(),
            },
            None => DeviceRecord {
                status: Some(self.status),
                ..DeviceRecord::default()
            },
        };
        record.to_document()
    }
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

/// A device-pushed reading before it is stored.
#[derive(Debug, Clone)]
pub struct NewReading {
    pub device_id: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: Uuid,
    pub device_id: String,
    pub received_at: DateTime<Utc>,
    #[serde(flatten)]
    pub values: Map<String, Value>,
}

/// Optional device filter plus result cap, newest first.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub device_id: Option<String>,
    pub limit: usize,
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Outbound command body. Absent fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CommandPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>)]
    pub duration: Option<serde_json::Number>,
}

/// Append-only record of a command that was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAuditEvent {
    pub id: Uuid,
    pub device_id: String,
    pub topic: String,
    pub command: CommandPayload,
    pub user: String,
    pub issued_at: DateTime<Utc>,
}
