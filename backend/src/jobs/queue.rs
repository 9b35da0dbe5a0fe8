// Durable delayed queue backed by Postgres

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::time::Duration;
use thiserror::Error;
use tokio_cron_scheduler::JobSchedulerError;
use tracing::warn;
use uuid::Uuid;

use crate::automations::ExecutionContext;
use relay_shared::Node;

/// Job type tag for suspended automation executions.
pub const DELAYED_EXECUTION_JOB: &str = "automation_delay";

#[derive(Error, Debug)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type JobResult<T> = Result<T, JobError>;

/// Everything a worker needs to resume a suspended execution. The node set
/// rides along defensively; the worker falls back to reloading the
/// definition only when the embedded copy is empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    pub execution_id: Uuid,
    pub automation_id: Uuid,
    pub context: ExecutionContext,
    pub next_node_ids: Vec<String>,
    pub nodes: Vec<Node>,
}

/// How retry delays grow between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential { base_secs: u64 },
    Fixed { delay_secs: u64 },
}

impl BackoffStrategy {
    /// Delay before retry `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::Exponential { base_secs } => {
                let doublings = attempt.saturating_sub(1).min(16);
                Duration::from_secs(base_secs.saturating_mul(1 << doublings))
            }
            Self::Fixed { delay_secs } => Duration::from_secs(*delay_secs),
        }
    }
}

/// Resilience contract applied to a delayed job, independent of the queue
/// implementation behind it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential { base_secs: 5 },
        }
    }
}

/// The one queue operation the interpreter needs: park a continuation until
/// its due time. Jobs are removed on successful completion and retried per
/// `policy` on failure.
#[async_trait]
pub trait DelayQueue: Send + Sync {
    async fn enqueue(
        &self,
        continuation: &Continuation,
        delay: Duration,
        policy: &RetryPolicy,
    ) -> JobResult<Uuid>;
}

/// A claimed job ready for resumption.
#[derive(Debug, Clone)]
pub struct DueJob {
    pub id: Uuid,
    pub continuation: Continuation,
    pub policy: RetryPolicy,
    pub attempts: i32,
}

#[derive(Clone)]
pub struct PgDelayQueue {
    pool: PgPool,
}

impl PgDelayQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Claim up to `limit` due jobs, marking them processing so a concurrent
    /// worker does not pick them up as well.
    pub async fn claim_due(&self, limit: i64) -> JobResult<Vec<DueJob>> {
        type Row = (Uuid, serde_json::Value, serde_json::Value, i32);

        let rows: Vec<Row> = sqlx::query_as(
            r#"
            UPDATE delayed_jobs SET status = 'processing', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM delayed_jobs
                WHERE status = 'pending' AND job_type = $1 AND run_at <= NOW()
                ORDER BY run_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, payload, retry_policy, attempts
            "#,
        )
        .bind(DELAYED_EXECUTION_JOB)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for (id, payload, policy, attempts) in rows {
            let continuation: Continuation = match serde_json::from_value(payload) {
                Ok(c) => c,
                Err(e) => {
                    warn!(job_id = %id, error = %e, "dropping job with undecodable payload");
                    self.mark_failed(id, &format!("payload decode failed: {e}")).await?;
                    continue;
                }
            };
            let policy: RetryPolicy = serde_json::from_value(policy).unwrap_or_default();
            jobs.push(DueJob {
                id,
                continuation,
                policy,
                attempts,
            });
        }
        Ok(jobs)
    }

    /// Remove a finished job (jobs do not linger after success).
    pub async fn complete(&self, id: Uuid) -> JobResult<()> {
        sqlx::query("DELETE FROM delayed_jobs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Put a failed job back on the queue for another attempt after `delay`.
    pub async fn reschedule(&self, id: Uuid, attempts: i32, delay: Duration) -> JobResult<()> {
        sqlx::query(
            r#"
            UPDATE delayed_jobs
            SET status = 'pending', attempts = $2,
                run_at = NOW() + ($3 || ' seconds')::interval,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(delay.as_secs().to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a job permanently failed. The row stays behind for inspection.
    pub async fn mark_failed(&self, id: Uuid, reason: &str) -> JobResult<()> {
        sqlx::query(
            r#"
            UPDATE delayed_jobs
            SET status = 'failed', last_error = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DelayQueue for PgDelayQueue {
    async fn enqueue(
        &self,
        continuation: &Continuation,
        delay: Duration,
        policy: &RetryPolicy,
    ) -> JobResult<Uuid> {
        let payload = serde_json::to_value(continuation)?;
        let retry_policy = serde_json::to_value(policy)?;

        let (id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO delayed_jobs (job_type, payload, retry_policy, run_at)
            VALUES ($1, $2, $3, NOW() + ($4 || ' seconds')::interval)
            RETURNING id
            "#,
        )
        .bind(DELAYED_EXECUTION_JOB)
        .bind(payload)
        .bind(retry_policy)
        .bind(delay.as_secs().to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}
