use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, CorrelationId, EventId, OutboxError, OutboxEvent, OutboxStatus, Result,
    store::{InboundLog, OutboxStore},
};

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
    claim_window: Duration,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store with a 30 second claim window.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            claim_window: Duration::seconds(30),
        }
    }

    /// Overrides how long a fetched batch is withheld from other
    /// publishers before a crashed run's rows become due again.
    pub fn with_claim_window(mut self, claim_window: Duration) -> Self {
        self.claim_window = claim_window;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    /// Inserts outbox rows inside a caller-owned transaction.
    ///
    /// This is the seam for the outbox pattern proper: the business
    /// mutation and its outbox rows commit or roll back together.
    pub async fn enqueue_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        events: &[OutboxEvent],
    ) -> Result<()> {
        for event in events {
            Self::insert_event(tx.as_mut(), event).await?;
        }
        Ok(())
    }

    async fn insert_event<'e, E>(executor: E, event: &OutboxEvent) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query(
            r#"
            INSERT INTO outbox_events
                (id, event_type, aggregate_id, correlation_id, occurred_at, created_at,
                 published_at, status, attempt_count, next_attempt_at, last_error, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(&event.event_type)
        .bind(event.aggregate_id.as_uuid())
        .bind(event.correlation_id.as_uuid())
        .bind(event.occurred_at)
        .bind(event.created_at)
        .bind(event.published_at)
        .bind(event.status.as_str())
        .bind(event.attempt_count as i32)
        .bind(event.next_attempt_at)
        .bind(&event.last_error)
        .bind(&event.payload)
        .execute(executor)
        .await?;
        Ok(())
    }

    fn row_to_event(row: PgRow) -> Result<OutboxEvent> {
        let status: String = row.try_get("status")?;
        let status: OutboxStatus = status
            .parse()
            .map_err(|e: String| OutboxError::Database(sqlx::Error::Decode(e.into())))?;

        Ok(OutboxEvent {
            event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
            event_type: row.try_get("event_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            occurred_at: row.try_get("occurred_at")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
            status,
            attempt_count: row.try_get::<i32, _>("attempt_count")? as u32,
            next_attempt_at: row.try_get("next_attempt_at")?,
            last_error: row.try_get("last_error")?,
            payload: row.try_get("payload")?,
        })
    }

    async fn get_status(&self, event_id: EventId) -> Result<Option<OutboxStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM outbox_events WHERE id = $1")
                .bind(event_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        status
            .map(|s| {
                s.parse()
                    .map_err(|e: String| OutboxError::Database(sqlx::Error::Decode(e.into())))
            })
            .transpose()
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn enqueue(&self, events: Vec<OutboxEvent>) -> Result<()> {
        metrics::counter!("outbox_enqueued_total").increment(events.len() as u64);
        let mut tx = self.pool.begin().await?;
        Self::enqueue_in_tx(&mut tx, &events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fetch_due(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<OutboxEvent>> {
        // Claim rows by pushing next_attempt_at past the claim window, so
        // concurrent publishers skip them while a crashed run's claim
        // simply expires. SKIP LOCKED keeps competing claimers from
        // blocking on each other.
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, correlation_id, occurred_at, created_at,
                   published_at, status, attempt_count, next_attempt_at, last_error, payload
            FROM outbox_events
            WHERE status = 'Pending' AND next_attempt_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(tx.as_mut())
        .await?;

        if rows.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let events = rows
            .into_iter()
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>>>()?;

        let ids: Vec<Uuid> = events.iter().map(|e| e.event_id.as_uuid()).collect();
        sqlx::query("UPDATE outbox_events SET next_attempt_at = $1 WHERE id = ANY($2)")
            .bind(now + self.claim_window)
            .bind(&ids)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;
        tracing::debug!(claimed = events.len(), "claimed outbox batch");
        Ok(events)
    }

    async fn mark_published(&self, event_id: EventId, published_at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'Published', published_at = $2, last_error = NULL
            WHERE id = $1 AND status <> 'Published'
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(published_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.get_status(event_id).await? {
                // Already published: published_at is write-once, skip.
                Some(OutboxStatus::Published) => Ok(()),
                Some(_) => Ok(()),
                None => Err(OutboxError::EventNotFound(event_id)),
            }
        } else {
            Ok(())
        }
    }

    async fn mark_retry(
        &self,
        event_id: EventId,
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempt_count = $2, next_attempt_at = $3, last_error = $4
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(attempt_count as i32)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.get_status(event_id).await? {
                Some(status) => Err(OutboxError::AlreadyTerminal {
                    event_id,
                    status: status.to_string(),
                }),
                None => Err(OutboxError::EventNotFound(event_id)),
            }
        } else {
            Ok(())
        }
    }

    async fn mark_failed(&self, event_id: EventId, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET status = 'Failed', last_error = $2
            WHERE id = $1 AND status = 'Pending'
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.get_status(event_id).await? {
                Some(OutboxStatus::Failed) => Ok(()),
                Some(status) => Err(OutboxError::AlreadyTerminal {
                    event_id,
                    status: status.to_string(),
                }),
                None => Err(OutboxError::EventNotFound(event_id)),
            }
        } else {
            Ok(())
        }
    }

    async fn get_event(&self, event_id: EventId) -> Result<Option<OutboxEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, correlation_id, occurred_at, created_at,
                   published_at, status, attempt_count, next_attempt_at, last_error, payload
            FROM outbox_events
            WHERE id = $1
            "#,
        )
        .bind(event_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_event).transpose()
    }

    async fn events_for_correlation(
        &self,
        correlation_id: CorrelationId,
    ) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, event_type, aggregate_id, correlation_id, occurred_at, created_at,
                   published_at, status, attempt_count, next_attempt_at, last_error, payload
            FROM outbox_events
            WHERE correlation_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(correlation_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_event).collect()
    }
}

/// PostgreSQL-backed inbound dedup log.
#[derive(Clone)]
pub struct PostgresInboundLog {
    pool: PgPool,
}

impl PostgresInboundLog {
    /// Creates a new PostgreSQL inbound log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboundLog for PostgresInboundLog {
    async fn record_consumed(
        &self,
        event_id: EventId,
        consumed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO inbound_events (event_id, consumed_at)
            VALUES ($1, $2)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id.as_uuid())
        .bind(consumed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn is_consumed(&self, event_id: EventId) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM inbound_events WHERE event_id = $1)")
                .bind(event_id.as_uuid())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }
}
