// Suspend/resume round trip through the continuation machinery.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::automations::{ExecutionContext, ExecutionOutcome};
use crate::jobs::{Continuation, resume_continuation};
use crate::tests::fixtures::{
    InMemoryDefinitionStore, InMemoryDelayQueue, InMemoryExecutionStore, RecordingSender,
    definition, executor_with,
};
use relay_shared::Node;

fn delayed_graph() -> Vec<Node> {
    vec![
        Node::trigger("1", "deals", "status_changed", &["2"]),
        Node::delay("2", 1, &["5"]),
        Node::send_email("5", "later@relay.test", "Re: {{deal_id}}", "still won", &[]),
    ]
}

#[tokio::test]
async fn test_suspend_then_resume_runs_recorded_successors() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue.clone());

    let nodes = relay_shared::node_map(&delayed_graph());
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({ "deal_id": "d-7" }));

    let outcome = executor
        .run(&["2".to_string()], &nodes, &mut ctx)
        .await
        .unwrap();
    assert_eq!(outcome, ExecutionOutcome::Suspended);
    assert!(sender.recipients().is_empty());

    let (continuation, delay, _policy) = queue.take_jobs().remove(0);
    assert_eq!(delay, Duration::from_secs(60));
    assert_eq!(continuation.next_node_ids, vec!["5".to_string()]);

    // The continuation is what a worker on another process would see: run it
    // through serde the way the queue stores it.
    let stored = serde_json::to_value(&continuation).unwrap();
    let restored: Continuation = serde_json::from_value(stored).unwrap();

    let executions = Arc::new(InMemoryExecutionStore::default());
    let store = InMemoryDefinitionStore::with(vec![]);
    let (outcome, resumed_ctx) =
        resume_continuation(&executor, store.as_ref(), executions.as_ref(), &restored)
            .await
            .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(sender.recipients(), vec!["later@relay.test"]);

    let sent = sender.sent.lock().unwrap();
    assert_eq!(sent[0].1, "Re: d-7");

    let delay_logs: Vec<_> = resumed_ctx
        .logs
        .iter()
        .filter(|l| l.action == "delay_completed")
        .collect();
    assert_eq!(delay_logs.len(), 1);
    assert_eq!(executions.seen(), vec!["running"]);
}

#[tokio::test]
async fn test_resume_reloads_nodes_when_embedded_copy_is_empty() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    let stored_definition = definition(delayed_graph());
    let continuation = Continuation {
        execution_id: Uuid::new_v4(),
        automation_id: stored_definition.id,
        context: ExecutionContext::new(stored_definition.id, json!({ "deal_id": "d-8" })),
        next_node_ids: vec!["5".to_string()],
        nodes: Vec::new(),
    };

    let executions = Arc::new(InMemoryExecutionStore::default());
    let store = InMemoryDefinitionStore::with(vec![stored_definition]);

    let (outcome, _) =
        resume_continuation(&executor, store.as_ref(), executions.as_ref(), &continuation)
            .await
            .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(sender.recipients(), vec!["later@relay.test"]);
}

#[tokio::test]
async fn test_resume_with_missing_definition_is_a_dead_end() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    let continuation = Continuation {
        execution_id: Uuid::new_v4(),
        automation_id: Uuid::new_v4(),
        context: ExecutionContext::new(Uuid::new_v4(), json!({})),
        next_node_ids: vec!["5".to_string()],
        nodes: Vec::new(),
    };

    let executions = Arc::new(InMemoryExecutionStore::default());
    let store = InMemoryDefinitionStore::with(vec![]);

    let (outcome, ctx) =
        resume_continuation(&executor, store.as_ref(), executions.as_ref(), &continuation)
            .await
            .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert!(sender.recipients().is_empty());
    assert!(ctx.logs.iter().any(|l| l.action == "node_missing"));
}

#[tokio::test]
async fn test_nested_delay_suspends_again_on_resume() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue.clone());

    let nodes = vec![
        Node::delay("2", 1, &["3"]),
        Node::delay("3", 5, &["4"]),
        Node::send_email("4", "eventually@relay.test", "s", "b", &[]),
    ];
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    executor
        .run(&["2".to_string()], &relay_shared::node_map(&nodes), &mut ctx)
        .await
        .unwrap();
    let (continuation, _, _) = queue.take_jobs().remove(0);

    let executions = Arc::new(InMemoryExecutionStore::default());
    let store = InMemoryDefinitionStore::with(vec![]);
    let (outcome, _) =
        resume_continuation(&executor, store.as_ref(), executions.as_ref(), &continuation)
            .await
            .unwrap();

    assert_eq!(outcome, ExecutionOutcome::Suspended);
    assert!(sender.recipients().is_empty());

    let (second, delay, _) = queue.take_jobs().remove(0);
    assert_eq!(second.next_node_ids, vec!["4".to_string()]);
    assert_eq!(delay, Duration::from_secs(300));
}
