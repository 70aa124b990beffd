use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{Local, NaiveDateTime};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    rolling,
    source::ReadingSource,
    validator::{self, MergedReading},
};
use crate::{
    config::Source,
    db::{
        models::{date_stamp, DeviceRecord, DeviceStatus, DeviceUpdate, LastUpdate, MetricSnapshot},
        Store,
    },
};

/// How one ingestion cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A source could not be read; only the status was written.
    SourceUnavailable,
    /// A tracked metric held the sentinel; only the status was written.
    InvalidReading,
    /// Valid data but no device document to roll history from; only the
    /// status was written.
    MissingBaseDocument,
    /// Status, metrics, timestamp and history written together.
    Updated,
}

/// Polls the configured sensor boards and folds their readings into the
/// aggregate device document.
pub struct SensorService {
    store: Arc<dyn Store>,
    source: Arc<dyn ReadingSource>,
    sources: Vec<Source>,
    device_key: String,
    retry_delay: Duration,
}

impl SensorService {
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn ReadingSource>,
        sources: Vec<Source>,
        device_key: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            source,
            sources,
            device_key: device_key.into(),
            retry_delay,
        }
    }

    /// Runs the ingestion loop until `cancel` fires.
    /// Spawn this via `tokio::spawn`.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            device_key = %self.device_key,
            sources = self.sources.len(),
            delay_ms = self.retry_delay.as_millis() as u64,
            "Ingestion loop started"
        );

        loop {
            let now = Local::now().naive_local();
            match self.run_cycle(now).await {
                Ok(outcome) => debug!(?outcome, "Ingestion cycle finished"),
                Err(e) => error!(error = %format!("{e:#}"), "Ingestion cycle failed"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(self.retry_delay) => {}
            }
        }

        info!("Ingestion loop stopped");
    }

    /// One iteration: fetch, validate, derive status, roll history, write.
    pub async fn run_cycle(&self, now: NaiveDateTime) -> Result<CycleOutcome> {
        let mut bodies = Vec::with_capacity(self.sources.len());
        let mut unavailable = Vec::new();
        for source in &self.sources {
            match self.source.fetch(&source.url).await {
                Some(body) => bodies.push((source.kind, body)),
                None => unavailable.push(source.url.as_str()),
            }
        }

        if !unavailable.is_empty() {
            warn!(sources = ?unavailable, "Sensor source unavailable; device marked offline");
            self.write_status(DeviceStatus::ErrorOffline).await?;
            return Ok(CycleOutcome::SourceUnavailable);
        }

        let merged = validator::merge(&bodies);
        if !validator::is_valid(&merged) {
            warn!(reading = ?merged, "Invalid sensor data; device marked offline");
            self.write_status(DeviceStatus::ErrorOffline).await?;
            return Ok(CycleOutcome::InvalidReading);
        }

        // Status is upserted every cycle, so the document exists from the
        // first healthy cycle on.
        self.write_status(DeviceStatus::Online).await?;

        let Some(current) = self.store.find_device(&self.device_key).await? else {
            warn!(device_key = %self.device_key, "No base device document; skipping metric update");
            return Ok(CycleOutcome::MissingBaseDocument);
        };

        let snapshot = build_snapshot(&current, &merged, now);
        self.store
            .merge_device(&self.device_key, &DeviceUpdate::online(snapshot))
            .await?;

        info!(device_key = %self.device_key, "Device document updated with new sensor data");
        Ok(CycleOutcome::Updated)
    }

    async fn write_status(&self, status: DeviceStatus) -> Result<()> {
        self.store
            .merge_device(&self.device_key, &DeviceUpdate::status_only(status))
            .await?;
        Ok(())
    }
}

/// Fold a valid reading into the current record.
///
/// The first `Online` cycle of a calendar day prepends a history entry;
/// later cycles that day overwrite it.
pub(crate) fn build_snapshot(
    current: &DeviceRecord,
    merged: &MergedReading,
    now: NaiveDateTime,
) -> MetricSnapshot {
    let new_day = current
        .last_update
        .as_ref()
        .map_or(true, |lu| lu.date != date_stamp(now));

    let history = merged
        .iter()
        .map(|(metric, value)| {
            let existing = current.history.get(metric).map(String::as_str).unwrap_or("");
            (*metric, rolling::roll(existing, *value, now, new_day))
        })
        .collect();

    MetricSnapshot {
        metrics: merged.clone(),
        last_update: LastUpdate::at(now),
        history,
    }
}
