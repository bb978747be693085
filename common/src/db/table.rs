// Job table: durable storage of job definitions and next run times

use crate::config::is_sql_identifier;
use crate::db::DbPool;
use crate::errors::DatabaseError;
use crate::models::{Job, JobKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::time::Duration;
use tracing::instrument;

/// Keyed storage of jobs, the only source of truth for what exists and when
/// it runs next. Implementations do not retry; errors go to the caller.
#[async_trait]
pub trait JobTable: Send + Sync {
    async fn get(&self, key: &JobKey) -> Result<Option<Job>, DatabaseError>;

    /// Insert a job, or update the existing row with the same key.
    ///
    /// On update the interval is replaced and the next run is shifted by the
    /// interval delta (`old.next_run + new.interval - old.interval`), keeping
    /// the job's phase. Returns the stored row.
    async fn insert(&self, job: &Job) -> Result<Job, DatabaseError>;

    /// Set the next run time of an existing job without touching its interval.
    /// Returns `None` when the key does not exist.
    async fn reschedule(
        &self,
        key: &JobKey,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError>;

    /// Move an existing job to one stored interval after `now`. The interval is
    /// read from the row at update time, not from an earlier snapshot.
    /// Returns `None` when the key does not exist.
    async fn advance(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError>;

    /// Returns `false` when there was nothing to delete
    async fn delete(&self, key: &JobKey) -> Result<bool, DatabaseError>;

    /// The job with the smallest next run time; ties ordered by key
    async fn earliest(&self) -> Result<Option<Job>, DatabaseError>;

    async fn count(&self) -> Result<i64, DatabaseError>;
}

const COLUMNS: &str = "routing_key, body, interval_seconds, next_run, one_off";

/// PostgreSQL-backed job table
#[derive(Debug, Clone)]
pub struct PgJobTable {
    pool: DbPool,
    table: String,
}

impl PgJobTable {
    /// Create a table handle. `table` must be a plain SQL identifier since it
    /// is interpolated into every statement.
    pub fn new(pool: DbPool, table: impl Into<String>) -> Result<Self, DatabaseError> {
        let table = table.into();
        if !is_sql_identifier(&table) {
            return Err(DatabaseError::SchemaFailed(format!(
                "invalid table name: {}",
                table
            )));
        }
        Ok(Self { pool, table })
    }

    /// Create the table and its next-run index when missing
    #[instrument(skip(self), fields(table = %self.table))]
    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                routing_key      TEXT        NOT NULL,
                body             TEXT        NOT NULL,
                interval_seconds BIGINT      NOT NULL CHECK (interval_seconds > 0),
                next_run         TIMESTAMPTZ NOT NULL,
                one_off          BOOLEAN     NOT NULL DEFAULT FALSE,
                PRIMARY KEY (routing_key, body)
            )
            "#,
            table = self.table
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {table}_next_run_idx ON {table} (next_run)",
            table = self.table
        );

        for statement in [create_table, create_index] {
            sqlx::query(&statement)
                .execute(self.pool.pool())
                .await
                .map_err(|e| DatabaseError::SchemaFailed(e.to_string()))?;
        }

        tracing::info!("Job table schema ensured");
        Ok(())
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, DatabaseError> {
    let interval_seconds: i64 = row.try_get("interval_seconds")?;
    let interval_seconds = u64::try_from(interval_seconds).map_err(|_| {
        DatabaseError::InvalidRow(format!("negative interval: {}", interval_seconds))
    })?;

    Ok(Job {
        key: JobKey {
            routing_key: row.try_get("routing_key")?,
            body: row.try_get("body")?,
        },
        interval: Duration::from_secs(interval_seconds),
        next_run: row.try_get("next_run")?,
        one_off: row.try_get("one_off")?,
    })
}

#[async_trait]
impl JobTable for PgJobTable {
    #[instrument(skip(self), fields(routing_key = %key.routing_key))]
    async fn get(&self, key: &JobKey) -> Result<Option<Job>, DatabaseError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE routing_key = $1 AND body = $2",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&key.routing_key)
            .bind(&key.body)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self, job), fields(routing_key = %job.key.routing_key, interval = job.interval_seconds()))]
    async fn insert(&self, job: &Job) -> Result<Job, DatabaseError> {
        // SET expressions read the pre-update row, so both see the old interval
        let sql = format!(
            r#"
            INSERT INTO {table} AS j ({COLUMNS})
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (routing_key, body) DO UPDATE SET
                next_run = j.next_run
                    + (EXCLUDED.interval_seconds - j.interval_seconds) * INTERVAL '1 second',
                interval_seconds = EXCLUDED.interval_seconds,
                one_off = EXCLUDED.one_off
            RETURNING {COLUMNS}
            "#,
            table = self.table
        );
        let row = sqlx::query(&sql)
            .bind(&job.key.routing_key)
            .bind(&job.key.body)
            .bind(job.interval_seconds())
            .bind(job.next_run)
            .bind(job.one_off)
            .fetch_one(self.pool.pool())
            .await?;

        let stored = job_from_row(&row)?;
        tracing::debug!(next_run = %stored.next_run, "Job upserted");
        Ok(stored)
    }

    #[instrument(skip(self), fields(routing_key = %key.routing_key))]
    async fn reschedule(
        &self,
        key: &JobKey,
        next_run: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        let sql = format!(
            "UPDATE {} SET next_run = $3 WHERE routing_key = $1 AND body = $2 RETURNING {COLUMNS}",
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&key.routing_key)
            .bind(&key.body)
            .bind(next_run)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(routing_key = %key.routing_key))]
    async fn advance(&self, key: &JobKey, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        let sql = format!(
            r#"
            UPDATE {} SET next_run = $3 + interval_seconds * INTERVAL '1 second'
            WHERE routing_key = $1 AND body = $2
            RETURNING {COLUMNS}
            "#,
            self.table
        );
        let row = sqlx::query(&sql)
            .bind(&key.routing_key)
            .bind(&key.body)
            .bind(now)
            .fetch_optional(self.pool.pool())
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(routing_key = %key.routing_key))]
    async fn delete(&self, key: &JobKey) -> Result<bool, DatabaseError> {
        let sql = format!(
            "DELETE FROM {} WHERE routing_key = $1 AND body = $2",
            self.table
        );
        let result = sqlx::query(&sql)
            .bind(&key.routing_key)
            .bind(&key.body)
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn earliest(&self) -> Result<Option<Job>, DatabaseError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} ORDER BY next_run ASC, routing_key ASC, body ASC LIMIT 1",
            self.table
        );
        let row = sqlx::query(&sql).fetch_optional(self.pool.pool()).await?;

        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn count(&self) -> Result<i64, DatabaseError> {
        let sql = format!("SELECT COUNT(*) AS total FROM {}", self.table);
        let row = sqlx::query(&sql).fetch_one(self.pool.pool()).await?;
        Ok(row.try_get("total")?)
    }
}
