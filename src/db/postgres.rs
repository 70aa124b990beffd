use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::{types::Json, FromRow, PgPool};
use uuid::Uuid;

use super::{
    models::{
        CommandAuditEvent, CommandPayload, DeviceRecord, DeviceUpdate, ListQuery, NewReading,
        StoredReading,
    },
    Store, StoreError,
};

/// PostgreSQL-backed store. Documents live in `JSONB` columns.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// `LIMIT` takes a signed 64-bit value; larger requests mean "everything".
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[derive(FromRow)]
struct ReadingRow {
    id: Uuid,
    device_id: String,
    received_at: DateTime<Utc>,
    payload: Json<Map<String, Value>>,
}

impl From<ReadingRow> for StoredReading {
    fn from(r: ReadingRow) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            received_at: r.received_at,
            values: r.payload.0,
        }
    }
}

#[derive(FromRow)]
struct AuditRow {
    id: Uuid,
    device_id: String,
    topic: String,
    command: Json<CommandPayload>,
    user: String,
    issued_at: DateTime<Utc>,
}

impl From<AuditRow> for CommandAuditEvent {
    fn from(r: AuditRow) -> Self {
        Self {
            id: r.id,
            device_id: r.device_id,
            topic: r.topic,
            command: r.command.0,
            user: r.user,
            issued_at: r.issued_at,
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn find_device(&self, key: &str) -> Result<Option<DeviceRecord>, StoreError> {
        let doc = sqlx::query_scalar::<_, Json<Map<String, Value>>>(
            "SELECT document FROM device_records WHERE device_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(doc.map(|d| DeviceRecord::from_document(&d.0)).transpose()?)
    }

    async fn merge_device(&self, key: &str, update: &DeviceUpdate) -> Result<(), StoreError> {
        // `||` on JSONB overwrites only the keys present in the update.
        sqlx::query(
            r#"
            INSERT INTO device_records (device_key, document, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (device_key) DO UPDATE
               SET document   = device_records.document || EXCLUDED.document,
                   updated_at = now()
            "#,
        )
        .bind(key)
        .bind(Json(update.to_document()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_reading(&self, reading: NewReading) -> Result<StoredReading, StoreError> {
        let row = sqlx::query_as::<_, ReadingRow>(
            r#"
            INSERT INTO sensor_readings (id, device_id, received_at, payload)
            VALUES ($1, $2, now(), $3)
            RETURNING id, device_id, received_at, payload
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&reading.device_id)
        .bind(Json(reading.values))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn list_readings(&self, query: &ListQuery) -> Result<Vec<StoredReading>, StoreError> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT id, device_id, received_at, payload
            FROM sensor_readings
            WHERE ($1::text IS NULL OR device_id = $1)
            ORDER BY received_at DESC
            LIMIT $2
            "#,
        )
        .bind(query.device_id.as_deref())
        .bind(sql_limit(query.limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn latest_per_device(&self) -> Result<Vec<StoredReading>, StoreError> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            r#"
            SELECT DISTINCT ON (device_id)
                id, device_id, received_at, payload
            FROM sensor_readings
            ORDER BY device_id, received_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn append_audit(&self, event: &CommandAuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO command_audit (id, device_id, topic, command, "user", issued_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.id)
        .bind(&event.device_id)
        .bind(&event.topic)
        .bind(Json(&event.command))
        .bind(&event.user)
        .bind(event.issued_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_audit(&self, query: &ListQuery) -> Result<Vec<CommandAuditEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, device_id, topic, command, "user", issued_at
            FROM command_audit
            WHERE ($1::text IS NULL OR device_id = $1)
            ORDER BY issued_at DESC
            LIMIT $2
            "#,
        )
        .bind(query.device_id.as_deref())
        .bind(sql_limit(query.limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::db::models::{DeviceStatus, LastUpdate, Metric, MetricSnapshot};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    async fn insert_at(pool: &PgPool, device_id: &str, minutes: i64, temperature: f64) {
        sqlx::query(
            "INSERT INTO sensor_readings (id, device_id, received_at, payload) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(device_id)
        .bind(base_time() + Duration::minutes(minutes))
        .bind(Json(json!({ "Temperature": temperature })))
        .execute(pool)
        .await
        .unwrap();
    }

    fn online_update(temperature: f64) -> DeviceUpdate {
        let now = base_time().naive_utc();
        DeviceUpdate::online(MetricSnapshot {
            metrics: [(Metric::Temperature, temperature)].into_iter().collect(),
            last_update: LastUpdate::at(now),
            history: [(Metric::Temperature, format!("{temperature:.1}:16/Oct"))]
                .into_iter()
                .collect(),
        })
    }

    #[test]
    fn limit_is_clamped_to_i64() {
        assert_eq!(sql_limit(100), 100);
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
    }

    // -----------------------------------------------------------------------
    // Device document
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn find_missing_device_returns_none(pool: PgPool) {
        let store = PgStore::new(pool);
        assert!(store.find_device("default").await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn status_only_merge_keeps_existing_metrics(pool: PgPool) {
        let store = PgStore::new(pool);
        store.merge_device("default", &online_update(22.5)).await.unwrap();
        store
            .merge_device("default", &DeviceUpdate::status_only(DeviceStatus::ErrorOffline))
            .await
            .unwrap();

        let r = store.find_device("default").await.unwrap().unwrap();
        assert_eq!(r.status, Some(DeviceStatus::ErrorOffline));
        assert_eq!(r.metrics[&Metric::Temperature], 22.5);
        assert_eq!(r.history[&Metric::Temperature], "22.5:16/Oct");
        assert_eq!(r.last_update.unwrap().time, "12:00");
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn status_only_merge_creates_document(pool: PgPool) {
        let store = PgStore::new(pool);
        store
            .merge_device("default", &DeviceUpdate::status_only(DeviceStatus::Online))
            .await
            .unwrap();

        let r = store.find_device("default").await.unwrap().unwrap();
        assert_eq!(r.status, Some(DeviceStatus::Online));
        assert!(r.metrics.is_empty());
        assert!(r.last_update.is_none());
    }

    // -----------------------------------------------------------------------
    // Readings
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn inserted_reading_is_returned_with_server_fields(pool: PgPool) {
        let store = PgStore::new(pool);
        let values = json!({ "pH": 6.4 }).as_object().cloned().unwrap();
        let stored = store
            .insert_reading(NewReading { device_id: "dev1".into(), values })
            .await
            .unwrap();

        assert_eq!(stored.device_id, "dev1");
        assert_eq!(stored.values["pH"], 6.4);

        let listed = store
            .list_readings(&ListQuery { device_id: None, limit: 10 })
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn latest_returns_one_row_per_device(pool: PgPool) {
        insert_at(&pool, "dev1", 0, 20.0).await;
        insert_at(&pool, "dev1", 10, 25.0).await;
        insert_at(&pool, "dev1", 5, 23.0).await;
        insert_at(&pool, "dev2", 1, 30.0).await;

        let store = PgStore::new(pool);
        let latest = store.latest_per_device().await.unwrap();
        assert_eq!(latest.len(), 2);

        let dev1 = latest.iter().find(|r| r.device_id == "dev1").unwrap();
        assert_eq!(dev1.values["Temperature"], 25.0);
        assert_eq!(dev1.received_at, base_time() + Duration::minutes(10));

        let dev2 = latest.iter().find(|r| r.device_id == "dev2").unwrap();
        assert_eq!(dev2.values["Temperature"], 30.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn listing_is_filtered_limited_and_newest_first(pool: PgPool) {
        for (minutes, t) in [(0, 1.0), (1, 2.0), (2, 3.0)] {
            insert_at(&pool, "dev1", minutes, t).await;
        }
        insert_at(&pool, "dev2", 3, 9.0).await;

        let store = PgStore::new(pool);
        let rows = store
            .list_readings(&ListQuery { device_id: Some("dev1".into()), limit: 2 })
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].values["Temperature"], 3.0);
        assert_eq!(rows[1].values["Temperature"], 2.0);

        let all = store
            .list_readings(&ListQuery { device_id: None, limit: usize::MAX })
            .await
            .unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].device_id, "dev2");
    }

    // -----------------------------------------------------------------------
    // Audit
    // -----------------------------------------------------------------------

    #[sqlx::test(migrations = "./migrations")]
    async fn audit_round_trips(pool: PgPool) {
        let store = PgStore::new(pool);
        let event = CommandAuditEvent {
            id: Uuid::new_v4(),
            device_id: "dev1".into(),
            topic: "hydro/dev1/commands".into(),
            command: CommandPayload {
                cmd: Some("filter".into()),
                action: Some("on".into()),
                duration: None,
            },
            user: "api".into(),
            issued_at: base_time(),
        };
        store.append_audit(&event).await.unwrap();

        let other = CommandAuditEvent {
            id: Uuid::new_v4(),
            device_id: "dev2".into(),
            issued_at: base_time() + Duration::minutes(1),
            ..event.clone()
        };
        store.append_audit(&other).await.unwrap();

        let listed = store
            .list_audit(&ListQuery { device_id: Some("dev1".into()), limit: 10 })
            .await
            .unwrap();
        assert_eq!(listed, vec![event]);

        let all = store
            .list_audit(&ListQuery { device_id: None, limit: usize::MAX })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].device_id, "dev2");
    }
}
