//! Browser observation event repository.
//!
//! Events arrive in bulk from the (external) browser job handler; the rules
//! job loads them by id and marks them processed after evaluation.

use serde_json::Value;
use uuid::Uuid;

use crate::data::models::Event;
use crate::db::DbContext;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub session_id: Uuid,
    pub source_job_id: Option<Uuid>,
    pub event_type: String,
    pub event_data: Value,
    pub metadata: Value,
    pub priority: i32,
    pub should_process: bool,
    pub storage_key: Option<String>,
}

pub struct BrowserEventOps<'a> {
    ctx: &'a DbContext,
}

impl<'a> BrowserEventOps<'a> {
    pub(crate) fn new(ctx: &'a DbContext) -> Self {
        Self { ctx }
    }

    /// Batch insert events using UNNEST for a single round-trip.
    pub async fn insert_batch(&self, events: &[NewEvent]) -> Result<Vec<Event>> {
        if events.is_empty() {
            return Ok(Vec::new());
        }

        let mut session_ids = Vec::with_capacity(events.len());
        let mut source_job_ids = Vec::with_capacity(events.len());
        let mut event_types = Vec::with_capacity(events.len());
        let mut event_datas = Vec::with_capacity(events.len());
        let mut metadatas = Vec::with_capacity(events.len());
        let mut priorities = Vec::with_capacity(events.len());
        let mut should_processes = Vec::with_capacity(events.len());
        let mut storage_keys = Vec::with_capacity(events.len());

        for event in events {
            session_ids.push(event.session_id);
            source_job_ids.push(event.source_job_id);
            event_types.push(event.event_type.clone());
            event_datas.push(event.event_data.clone());
            metadatas.push(event.metadata.clone());
            priorities.push(event.priority);
            should_processes.push(event.should_process);
            storage_keys.push(event.storage_key.clone());
        }

        let inserted = sqlx::query_as::<_, Event>(
            r#"
            INSERT INTO events (
                session_id, source_job_id, event_type, event_data,
                metadata, priority, should_process, storage_key
            )
            SELECT * FROM UNNEST(
                $1::uuid[], $2::uuid[], $3::text[], $4::jsonb[],
                $5::jsonb[], $6::int[], $7::bool[], $8::text[]
            )
            RETURNING *
            "#,
        )
        .bind(&session_ids)
        .bind(&source_job_ids)
        .bind(&event_types)
        .bind(&event_datas)
        .bind(&metadatas)
        .bind(&priorities)
        .bind(&should_processes)
        .bind(&storage_keys)
        .fetch_all(self.ctx.pool())
        .await?;

        Ok(inserted)
    }

    /// Load events by id, preserving only rows that still exist.
    pub async fn fetch_by_ids(&self, ids: &[Uuid]) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, Event>(
            "SELECT * FROM events WHERE id = ANY($1) ORDER BY created_at",
        )
        .bind(ids)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Events flagged for processing that no rules job has consumed yet.
    pub async fn unprocessed(&self, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query_as::<_, Event>(
            r#"
            SELECT * FROM events
            WHERE should_process AND NOT processed
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.ctx.pool())
        .await?;
        Ok(rows)
    }

    /// Mark a set of events consumed by a rules job.
    pub async fn mark_processed(&self, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("UPDATE events SET processed = true WHERE id = ANY($1)")
            .bind(ids)
            .execute(self.ctx.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
