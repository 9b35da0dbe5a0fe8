// Automation engine - trigger matching and execution management

use futures::future::join_all;
use relay_shared::{AutomationDefinition, NodeKind, TRIGGER_NODE_ID, node_map};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::events::{DomainEvent, EventBus};
use super::executor::{ExecutionContext, ExecutionOutcome, GraphExecutor};
use super::store::{DefinitionStore, ExecutionStore};

/// Matches incoming domain events against active automation definitions and
/// runs each match as an independent execution.
#[derive(Clone)]
pub struct AutomationEngine {
    store: Arc<dyn DefinitionStore>,
    executions: Arc<dyn ExecutionStore>,
    executor: Arc<GraphExecutor>,
}

impl AutomationEngine {
    pub fn new(
        store: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        executor: Arc<GraphExecutor>,
    ) -> Self {
        Self {
            store,
            executions,
            executor,
        }
    }

    /// Subscribe to the bus and dispatch events until the bus closes.
    pub fn start(&self, bus: &EventBus) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let engine = engine.clone();
                        tokio::spawn(async move { engine.on_event(event).await });
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "event bus lagged, domain events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Match one event against every active definition. Each match spawns its
    /// own execution with its own context; matches do not observe each other.
    pub async fn on_event(&self, event: DomainEvent) {
        let definitions = match self.store.find_active().await {
            Ok(definitions) => definitions,
            Err(e) => {
                error!(error = %e, "failed to load automation definitions");
                return;
            }
        };

        let mut executions = Vec::new();
        for definition in definitions {
            let Some(start_ids) = trigger_successors(&definition, &event) else {
                continue;
            };
            info!(
                automation = %definition.name,
                module = %event.module,
                event = %event.event,
                "trigger matched, starting execution"
            );
            let engine = self.clone();
            let payload = event.payload.clone();
            executions.push(tokio::spawn(async move {
                engine.run_definition(definition, start_ids, payload).await;
            }));
        }
        join_all(executions).await;
    }

    async fn run_definition(
        &self,
        definition: AutomationDefinition,
        start_ids: Vec<String>,
        payload: Value,
    ) {
        let mut ctx = ExecutionContext::new(definition.id, payload);
        if let Err(e) = self.executions.create_running(&ctx).await {
            error!(automation = %definition.name, error = %e, "failed to record execution start");
            return;
        }

        let nodes = node_map(&definition.nodes);
        match self.executor.run(&start_ids, &nodes, &mut ctx).await {
            Ok(ExecutionOutcome::Completed) => {
                info!(automation = %definition.name, execution_id = %ctx.execution_id, "execution completed");
                if let Err(e) = self.executions.mark_completed(&ctx).await {
                    error!(error = %e, "failed to record execution completion");
                }
            }
            Ok(ExecutionOutcome::Suspended) => {
                info!(automation = %definition.name, execution_id = %ctx.execution_id, "execution suspended");
                if let Err(e) = self.executions.mark_suspended(&ctx).await {
                    error!(error = %e, "failed to record execution suspension");
                }
            }
            Err(e) => {
                error!(
                    automation = %definition.name,
                    execution_id = %ctx.execution_id,
                    error = %e,
                    "execution failed"
                );
                if let Err(mark_err) = self.executions.mark_failed(&ctx, &e.to_string()).await {
                    error!(error = %mark_err, "failed to record execution failure");
                }
            }
        }
    }
}

/// Check a definition's entry node against an event. Returns the trigger's
/// successor ids on a match.
fn trigger_successors(definition: &AutomationDefinition, event: &DomainEvent) -> Option<Vec<String>> {
    let Some(node) = definition.node(TRIGGER_NODE_ID) else {
        warn!(automation = %definition.name, "definition has no entry node, skipping");
        return None;
    };
    let NodeKind::Trigger { module, event: event_name, payload_match, next } = &node.kind else {
        warn!(automation = %definition.name, "entry node is not a trigger, skipping");
        return None;
    };

    if module != &event.module || event_name != &event.event {
        return None;
    }

    // Filter values are compared stringified; an empty filter matches any
    // payload of the right module/event.
    let matched = payload_match.iter().all(|(key, expected)| {
        event
            .payload
            .get(key)
            .map(|actual| payload_value_string(actual) == *expected)
            .unwrap_or(false)
    });

    matched.then(|| next.clone())
}

fn payload_value_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
