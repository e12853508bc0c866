//! # PostgreSQL Tracking Store
//!
//! Records are stored as JSONB beside the indexed `stage_state` and `order_stamp` columns.
//! Mutations are read-modify-write under optimistic concurrency: the update only lands when
//! the row still carries the version that was read, otherwise it is retried on a fresh read.

use super::errors::{TrackingError, TrackingResult};
use super::{merge_in_stage, ProgressCursor, TrackingStore};
use crate::constants::MAX_VERSION_RETRIES;
use crate::models::{DocumentRecord, StageMapUpdate, StateTransition};
use crate::state_machine::StageState;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument, warn};

const SCHEMA_SQL: &str = include_str!("../../migrations/20260101000000_create_docpipe_documents.sql");

const SELECT_ASCENDING: &str = "SELECT record FROM docpipe_documents \
     WHERE stage_state = $1 ORDER BY order_stamp ASC, document_id ASC LIMIT $2";
const SELECT_DESCENDING: &str = "SELECT record FROM docpipe_documents \
     WHERE stage_state = $1 ORDER BY order_stamp DESC, document_id DESC LIMIT $2";
const SELECT_AFTER: &str = "SELECT record FROM docpipe_documents \
     WHERE stage_state = $1 AND (order_stamp, document_id) > ($2, $3) \
     ORDER BY order_stamp ASC, document_id ASC LIMIT $4";

#[derive(Debug, Clone)]
pub struct PostgresTrackingStore {
    pool: PgPool,
}

impl PostgresTrackingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the documents table and progress index if missing
    pub async fn ensure_schema(&self) -> TrackingResult<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(|e| TrackingError::database("ensure_schema", e.to_string()))?;
        info!("✅ Tracking schema ready");
        Ok(())
    }

    fn decode(value: Value) -> TrackingResult<DocumentRecord> {
        Ok(serde_json::from_value(value)?)
    }

    fn decode_rows(rows: Vec<sqlx::postgres::PgRow>) -> TrackingResult<Vec<DocumentRecord>> {
        rows.into_iter()
            .map(|row| Self::decode(row.try_get::<Value, _>("record")?))
            .collect()
    }

    fn limit(limit: usize) -> i64 {
        i64::try_from(limit).unwrap_or(i64::MAX)
    }

    /// Write `record` only if the stored row is still at `expected_version`
    async fn compare_and_write(
        &self,
        record: &DocumentRecord,
        expected_version: u64,
    ) -> TrackingResult<bool> {
        let payload = serde_json::to_value(record)?;
        let result = sqlx::query(
            "UPDATE docpipe_documents \
             SET stage_state = $2, order_stamp = $3, version = $4, record = $5, updated_at = $6 \
             WHERE document_id = $1 AND version = $7",
        )
        .bind(&record.document_id)
        .bind(record.stage_state.as_str())
        .bind(record.order_stamp.as_micros())
        .bind(record.version as i64)
        .bind(&payload)
        .bind(record.updated_at)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Optimistic read-modify-write; `mutate` returns whether it changed the record
    async fn mutate<F>(&self, document_id: &str, mut mutate: F) -> TrackingResult<DocumentRecord>
    where
        F: FnMut(&mut DocumentRecord) -> TrackingResult<bool> + Send,
    {
        for attempt in 1..=MAX_VERSION_RETRIES {
            let mut record = self.require(document_id).await?;
            let read_version = record.version;

            if !mutate(&mut record)? {
                return Ok(record);
            }
            if self.compare_and_write(&record, read_version).await? {
                return Ok(record);
            }
            debug!(document_id = %document_id, attempt, "Version moved underneath update, retrying");
        }

        warn!(document_id = %document_id, "⚠️ Giving up after repeated version conflicts");
        Err(TrackingError::VersionConflict {
            document_id: document_id.to_string(),
            attempts: MAX_VERSION_RETRIES,
        })
    }
}

#[async_trait]
impl TrackingStore for PostgresTrackingStore {
    #[instrument(skip(self, record), fields(document_id = %record.document_id))]
    async fn create(&self, record: &DocumentRecord) -> TrackingResult<bool> {
        let payload = serde_json::to_value(record)?;
        let result = sqlx::query(
            "INSERT INTO docpipe_documents \
             (document_id, stage_state, order_stamp, version, record, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (document_id) DO NOTHING",
        )
        .bind(&record.document_id)
        .bind(record.stage_state.as_str())
        .bind(record.order_stamp.as_micros())
        .bind(record.version as i64)
        .bind(&payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn put(&self, record: &DocumentRecord) -> TrackingResult<()> {
        let payload = serde_json::to_value(record)?;
        sqlx::query(
            "INSERT INTO docpipe_documents \
             (document_id, stage_state, order_stamp, version, record, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (document_id) DO UPDATE SET \
             stage_state = EXCLUDED.stage_state, order_stamp = EXCLUDED.order_stamp, \
             version = EXCLUDED.version, record = EXCLUDED.record, updated_at = EXCLUDED.updated_at",
        )
        .bind(&record.document_id)
        .bind(record.stage_state.as_str())
        .bind(record.order_stamp.as_micros())
        .bind(record.version as i64)
        .bind(&payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, document_id: &str) -> TrackingResult<Option<DocumentRecord>> {
        let row = sqlx::query("SELECT record FROM docpipe_documents WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| Self::decode(row.try_get::<Value, _>("record")?))
            .transpose()
    }

    #[instrument(skip(self, update), fields(stage = %update.stage()))]
    async fn merge_stage_map(
        &self,
        document_id: &str,
        update: &StageMapUpdate,
    ) -> TrackingResult<DocumentRecord> {
        self.mutate(document_id, |record| merge_in_stage(record, update))
            .await
    }

    #[instrument(skip(self, transition), fields(expected = %transition.expected, target = %transition.target))]
    async fn transition(
        &self,
        document_id: &str,
        transition: &StateTransition,
    ) -> TrackingResult<DocumentRecord> {
        self.mutate(document_id, |record| {
            if record.stage_state != transition.expected {
                return Err(TrackingError::stale_state(
                    record.document_id.clone(),
                    transition.expected,
                    record.stage_state,
                ));
            }
            record.apply_transition(transition);
            Ok(true)
        })
        .await
    }

    async fn query_by_state(
        &self,
        state: StageState,
        ascending: bool,
        limit: usize,
    ) -> TrackingResult<Vec<DocumentRecord>> {
        let sql = if ascending {
            SELECT_ASCENDING
        } else {
            SELECT_DESCENDING
        };
        let rows = sqlx::query(sql)
            .bind(state.as_str())
            .bind(Self::limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Self::decode_rows(rows)
    }

    async fn query_by_state_after(
        &self,
        state: StageState,
        cursor: &ProgressCursor,
        limit: usize,
    ) -> TrackingResult<Vec<DocumentRecord>> {
        let rows = sqlx::query(SELECT_AFTER)
            .bind(state.as_str())
            .bind(cursor.order_stamp.as_micros())
            .bind(&cursor.document_id)
            .bind(Self::limit(limit))
            .fetch_all(&self.pool)
            .await?;
        Self::decode_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AcquireMap, ObjectLocator, OutputMap};
    use crate::state_machine::Stage;

    async fn store() -> Option<PostgresTrackingStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.ok()?;
        let store = PostgresTrackingStore::new(pool);
        store.ensure_schema().await.ok()?;
        Some(store)
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL (DATABASE_URL)"]
    async fn test_postgres_transition_round_trip() {
        let Some(store) = store().await else {
            return;
        };
        let id = format!("pg-{}", uuid::Uuid::new_v4());
        let record = DocumentRecord::new(
            id.clone(),
            AcquireMap {
                input: Some(ObjectLocator::new("store", format!("acquire/{id}.png"))),
                received_at: None,
            },
        );
        assert!(store.create(&record).await.unwrap());
        assert!(!store.create(&record).await.unwrap());

        let begin = StateTransition::begin(StageState::Acquire, Stage::Classify);
        let moved = store.transition(&id, &begin).await.unwrap();
        assert_eq!(moved.stage_state, StageState::Classify);
        assert!(matches!(
            store.transition(&id, &begin).await,
            Err(TrackingError::StaleState { .. })
        ));

        let early = StageMapUpdate::Extract(OutputMap {
            stage_output: Some(ObjectLocator::new("store", format!("extract/{id}.json"))),
        });
        assert!(matches!(
            store.merge_stage_map(&id, &early).await,
            Err(TrackingError::StaleState {
                expected: StageState::Extract,
                actual: StageState::Classify,
                ..
            })
        ));

        let classifying = store
            .query_by_state(StageState::Classify, true, 1000)
            .await
            .unwrap();
        assert!(classifying.iter().any(|r| r.document_id == id));
        assert!(classifying
            .iter()
            .all(|r| r.stage_state == StageState::Classify));
    }
}
