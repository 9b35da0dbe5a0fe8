// Graph executor - node-by-node interpretation of an automation graph

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use relay_shared::{Node, NodeKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::jobs::{Continuation, DelayQueue, JobError, RetryPolicy};
use super::handlers::{HandlerRegistry, Outcome};

/// Traversal guard against cyclic or runaway definitions.
pub const MAX_TRAVERSAL_DEPTH: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification send failed: {0}")]
    Notification(String),
    #[error("handler error: {0}")]
    Handler(String),
    #[error("traversal depth exceeded {MAX_TRAVERSAL_DEPTH} nodes")]
    DepthExceeded,
    #[error("queue error: {0}")]
    Queue(#[from] JobError),
    #[error("storage error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warn,
    Error,
}

/// One entry of the per-execution audit trail. Audit entries travel with the
/// context and are persisted with the execution record; they never drive
/// control flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub level: AuditLevel,
    pub action: String,
    pub message: String,
}

/// The mutable data bag threaded through one automation run, seeded from the
/// triggering event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub automation_id: Uuid,
    pub data: serde_json::Value,
    #[serde(default)]
    pub logs: Vec<AuditEntry>,
}

impl ExecutionContext {
    pub fn new(automation_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            automation_id,
            data,
            logs: Vec::new(),
        }
    }

    pub fn log(&mut self, node_id: &str, level: AuditLevel, action: &str, message: impl Into<String>) {
        self.logs.push(AuditEntry {
            timestamp: Utc::now(),
            node_id: node_id.to_string(),
            level,
            action: action.to_string(),
            message: message.into(),
        });
    }
}

/// How a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every reachable branch ran to a terminal node.
    Completed,
    /// At least one branch parked a continuation on the delayed queue.
    Suspended,
}

pub struct GraphExecutor {
    registry: Arc<HandlerRegistry>,
    queue: Arc<dyn DelayQueue>,
    retry_policy: RetryPolicy,
}

impl GraphExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, queue: Arc<dyn DelayQueue>) -> Self {
        Self {
            registry,
            queue,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Run the graph from each start id, strictly in order. A branch does not
    /// begin until the previous one, including all of its descendants, has
    /// finished. Handler errors abort the remaining branches but leave the
    /// side effects of earlier ones in place.
    pub async fn run(
        &self,
        start_ids: &[String],
        nodes: &HashMap<String, Node>,
        ctx: &mut ExecutionContext,
    ) -> Result<ExecutionOutcome, EngineError> {
        let mut suspensions = 0;
        for id in start_ids {
            suspensions += self.run_node(id, nodes, ctx, 0).await?;
        }
        Ok(if suspensions > 0 {
            ExecutionOutcome::Suspended
        } else {
            ExecutionOutcome::Completed
        })
    }

    fn run_node<'a>(
        &'a self,
        node_id: &'a str,
        nodes: &'a HashMap<String, Node>,
        ctx: &'a mut ExecutionContext,
        depth: usize,
    ) -> BoxFuture<'a, Result<usize, EngineError>> {
        Box::pin(async move {
            if depth >= MAX_TRAVERSAL_DEPTH {
                return Err(EngineError::DepthExceeded);
            }

            let Some(node) = nodes.get(node_id) else {
                warn!(node_id, "node not found in graph, branch ends here");
                ctx.log(node_id, AuditLevel::Warn, "node_missing", "node id not present in graph");
                return Ok(0);
            };

            // A trigger reached mid-traversal never re-fires; pass straight
            // through to its successors.
            if let NodeKind::Trigger { next, .. } = &node.kind {
                debug!(node_id, "trigger node reached mid-traversal, passing through");
                let mut suspensions = 0;
                for id in next {
                    suspensions += self.run_node(id, nodes, ctx, depth + 1).await?;
                }
                return Ok(suspensions);
            }

            // Timed waits unwind the stack into a durable continuation
            // instead of sleeping in-process.
            if let NodeKind::Delay { delay_minutes, next } = &node.kind {
                self.suspend(node, *delay_minutes, next, nodes, ctx).await?;
                return Ok(1);
            }

            let Some(handler) = self.registry.get(node.kind.type_tag()) else {
                warn!(
                    node_id = %node.id,
                    node_type = node.kind.type_tag(),
                    "no handler registered for node type, skipping"
                );
                ctx.log(
                    &node.id,
                    AuditLevel::Warn,
                    "handler_missing",
                    format!("unsupported node type '{}'", node.kind.type_tag()),
                );
                return Ok(0);
            };

            let outcome = handler.execute(node, ctx).await?;

            let successors: &[String] = match (&node.kind, outcome) {
                (NodeKind::Condition { true_next, false_next, .. }, Outcome::Branch(matched)) => {
                    if matched { true_next } else { false_next }
                }
                _ => node.kind.default_next(),
            };

            let mut suspensions = 0;
            for id in successors {
                suspensions += self.run_node(id, nodes, ctx, depth + 1).await?;
            }
            Ok(suspensions)
        })
    }

    async fn suspend(
        &self,
        node: &Node,
        delay_minutes: u64,
        next: &[String],
        nodes: &HashMap<String, Node>,
        ctx: &mut ExecutionContext,
    ) -> Result<(), EngineError> {
        ctx.log(
            &node.id,
            AuditLevel::Info,
            "delay_scheduled",
            format!("waiting {delay_minutes}m before resuming {} node(s)", next.len()),
        );

        // The full node set rides along so the worker can resume even if the
        // definition cannot be reloaded later.
        let continuation = Continuation {
            execution_id: ctx.execution_id,
            automation_id: ctx.automation_id,
            context: ctx.clone(),
            next_node_ids: next.to_vec(),
            nodes: nodes.values().cloned().collect(),
        };

        let delay = Duration::from_secs(delay_minutes * 60);
        let job_id = self.queue.enqueue(&continuation, delay, &self.retry_policy).await?;
        debug!(%job_id, execution_id = %ctx.execution_id, "continuation enqueued");
        Ok(())
    }
}
