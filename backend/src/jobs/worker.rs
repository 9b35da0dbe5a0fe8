// Delay worker - resumes suspended executions from the durable queue

use relay_shared::node_map;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::automations::{
    AuditLevel, DefinitionStore, EngineError, ExecutionContext, ExecutionOutcome, ExecutionStore,
    GraphExecutor,
};
use crate::config::WorkerConfig;
use super::queue::{Continuation, DueJob, JobResult, PgDelayQueue};

/// Polls the delayed queue and re-enters the graph executor for each due
/// continuation. Runs on whatever process hosts it; nothing in-memory is
/// shared with the process that suspended the execution.
#[derive(Clone)]
pub struct DelayWorker {
    queue: PgDelayQueue,
    store: Arc<dyn DefinitionStore>,
    executions: Arc<dyn ExecutionStore>,
    executor: Arc<GraphExecutor>,
    poll_interval_secs: u32,
    batch_size: i64,
}

impl DelayWorker {
    pub fn new(
        queue: PgDelayQueue,
        store: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        executor: Arc<GraphExecutor>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            queue,
            store,
            executions,
            executor,
            poll_interval_secs: config.poll_interval_secs,
            batch_size: config.batch_size,
        }
    }

    /// Register the poll tick and start the scheduler. The returned scheduler
    /// handle must be kept alive for the worker to keep running.
    pub async fn start(&self) -> JobResult<JobScheduler> {
        let scheduler = JobScheduler::new().await?;
        let cron = format!("*/{} * * * * *", self.poll_interval_secs);

        let worker = self.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let worker = worker.clone();
            Box::pin(async move {
                worker.tick().await;
            })
        })?;

        scheduler.add(job).await?;
        scheduler.start().await?;

        info!("delay worker started (poll every {}s)", self.poll_interval_secs);
        Ok(scheduler)
    }

    /// One poll cycle: claim due jobs and process them in order.
    pub async fn tick(&self) {
        let jobs = match self.queue.claim_due(self.batch_size).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "failed to claim due delayed jobs");
                return;
            }
        };

        for job in jobs {
            self.process(job).await;
        }
    }

    async fn process(&self, job: DueJob) {
        match resume_continuation(
            &self.executor,
            self.store.as_ref(),
            self.executions.as_ref(),
            &job.continuation,
        )
        .await
        {
            Ok((outcome, context)) => {
                let record = match outcome {
                    ExecutionOutcome::Completed => self.executions.mark_completed(&context).await,
                    ExecutionOutcome::Suspended => self.executions.mark_suspended(&context).await,
                };
                if let Err(e) = record {
                    error!(job_id = %job.id, error = %e, "failed to record resumed execution state");
                }
                if let Err(e) = self.queue.complete(job.id).await {
                    error!(job_id = %job.id, error = %e, "failed to remove completed job");
                }
                info!(job_id = %job.id, execution_id = %context.execution_id, ?outcome, "delayed execution resumed");
            }
            Err(e) => {
                let attempts = job.attempts + 1;
                if attempts >= job.policy.max_attempts as i32 {
                    error!(job_id = %job.id, attempts, error = %e, "delayed job permanently failed");
                    if let Err(mark_err) = self.queue.mark_failed(job.id, &e.to_string()).await {
                        error!(job_id = %job.id, error = %mark_err, "failed to mark job failed");
                    }
                    if let Err(mark_err) = self
                        .executions
                        .mark_failed(&job.continuation.context, &e.to_string())
                        .await
                    {
                        error!(job_id = %job.id, error = %mark_err, "failed to record execution failure");
                    }
                } else {
                    let delay = job.policy.backoff.delay_for(attempts as u32);
                    warn!(
                        job_id = %job.id,
                        attempts,
                        retry_in_secs = delay.as_secs(),
                        error = %e,
                        "resume failed, retrying"
                    );
                    if let Err(re) = self.queue.reschedule(job.id, attempts, delay).await {
                        error!(job_id = %job.id, error = %re, "failed to reschedule job");
                    }
                }
            }
        }
    }
}

/// Re-enter the graph executor from a recorded continuation.
///
/// The context is rebuilt from the continuation alone; an execution must not
/// depend on any state from the process that suspended it.
pub async fn resume_continuation(
    executor: &GraphExecutor,
    store: &dyn DefinitionStore,
    executions: &dyn ExecutionStore,
    continuation: &Continuation,
) -> Result<(ExecutionOutcome, ExecutionContext), EngineError> {
    let mut context = continuation.context.clone();
    let resume_at = continuation
        .next_node_ids
        .first()
        .map(String::as_str)
        .unwrap_or_default();
    context.log(
        resume_at,
        AuditLevel::Info,
        "delay_completed",
        format!("delay elapsed, resuming {} node(s)", continuation.next_node_ids.len()),
    );

    let nodes = if continuation.nodes.is_empty() {
        match store.find_by_id(continuation.automation_id).await? {
            Some(definition) => definition.nodes,
            None => {
                warn!(
                    automation_id = %continuation.automation_id,
                    "automation no longer exists, resuming with an empty graph"
                );
                Vec::new()
            }
        }
    } else {
        continuation.nodes.clone()
    };

    if let Err(e) = executions.mark_running(&context).await {
        warn!(execution_id = %context.execution_id, error = %e, "execution bookkeeping failed");
    }

    let map = node_map(&nodes);
    let outcome = executor.run(&continuation.next_node_ids, &map, &mut context).await?;
    Ok((outcome, context))
}
