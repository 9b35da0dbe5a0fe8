// Traversal semantics of the graph executor.

use relay_shared::{Node, NodeKind, Predicate, node_map};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::automations::{EngineError, ExecutionContext, ExecutionOutcome};
use crate::tests::fixtures::{InMemoryDelayQueue, RecordingSender, executor_with};

fn start(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_condition_routes_to_false_branch_below_threshold() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    let nodes = node_map(&[
        Node::condition("2", vec![Predicate::gt("amount", 1000.0)], &["3"], &["4"]),
        Node::send_email("3", "vp-sales@relay.test", "big", "b", &[]),
        Node::send_email("4", "sales@relay.test", "small", "b", &[]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({ "amount": 500 }));

    let outcome = executor.run(&start(&["2"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(sender.recipients(), vec!["sales@relay.test"]);
}

#[tokio::test]
async fn test_sibling_branches_run_sequentially_in_order() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    // 2 fans out to 3 and 5; 3's descendant 4 must run before 5 starts.
    let nodes = node_map(&[
        Node::send_email("2", "first@relay.test", "s", "b", &["3", "5"]),
        Node::send_email("3", "second@relay.test", "s", "b", &["4"]),
        Node::send_email("4", "third@relay.test", "s", "b", &[]),
        Node::send_email("5", "fourth@relay.test", "s", "b", &[]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    executor.run(&start(&["2"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(
        sender.recipients(),
        vec![
            "first@relay.test",
            "second@relay.test",
            "third@relay.test",
            "fourth@relay.test"
        ]
    );
}

#[tokio::test]
async fn test_unknown_node_id_ends_branch_without_error() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    let nodes = node_map(&[Node::send_email("2", "a@relay.test", "s", "b", &["99"])]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    let outcome = executor.run(&start(&["2"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(sender.recipients(), vec!["a@relay.test"]);
    assert!(ctx.logs.iter().any(|l| l.action == "node_missing"));
}

#[tokio::test]
async fn test_trigger_reached_mid_traversal_passes_through_without_side_effects() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    // 5 loops back to the trigger; the trigger is skipped and its successor
    // runs instead.
    let nodes = node_map(&[
        Node::trigger("1", "deals", "created", &["2"]),
        Node::send_email("2", "from-trigger@relay.test", "s", "b", &[]),
        Node::send_email("5", "entry@relay.test", "s", "b", &["1"]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    executor.run(&start(&["5"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(
        sender.recipients(),
        vec!["entry@relay.test", "from-trigger@relay.test"]
    );
}

#[tokio::test]
async fn test_cyclic_graph_hits_depth_guard() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender, queue);

    let nodes = node_map(&[
        Node::send_email("2", "a@relay.test", "s", "b", &["3"]),
        Node::send_email("3", "b@relay.test", "s", "b", &["2"]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    let result = executor.run(&start(&["2"]), &nodes, &mut ctx).await;
    assert!(matches!(result, Err(EngineError::DepthExceeded)));
}

#[tokio::test]
async fn test_unsupported_node_type_is_a_soft_no_op() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    let unknown: Node = serde_json::from_value(json!({
        "id": "2",
        "type": "update_record",
        "field": "stage",
        "next": ["3"]
    }))
    .unwrap();
    assert_eq!(unknown.kind, NodeKind::Unknown);

    let nodes = node_map(&[unknown]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    let outcome = executor.run(&start(&["2"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert!(ctx.logs.iter().any(|l| l.action == "handler_missing"));
}

#[tokio::test]
async fn test_failing_branch_keeps_earlier_sibling_effects() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue);

    // Email runs first, the webhook fails, the trailing email never runs.
    let nodes = node_map(&[
        Node::send_email("2", "before@relay.test", "s", "b", &["3"]),
        Node::http_request("3", &server.uri(), json!(null), &["4"]),
        Node::send_email("4", "after@relay.test", "s", "b", &[]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    let result = executor.run(&start(&["2"]), &nodes, &mut ctx).await;

    assert!(matches!(result, Err(EngineError::Http(_))));
    assert_eq!(sender.recipients(), vec!["before@relay.test"]);
}

#[tokio::test]
async fn test_delay_node_suspends_instead_of_visiting_successors() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue.clone());

    let nodes = node_map(&[
        Node::delay("2", 1, &["5"]),
        Node::send_email("5", "later@relay.test", "s", "b", &[]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({ "deal_id": "d-1" }));

    let outcome = executor.run(&start(&["2"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Suspended);
    assert!(sender.recipients().is_empty());

    let jobs = queue.take_jobs();
    assert_eq!(jobs.len(), 1);
    let (continuation, delay, _policy) = &jobs[0];
    assert_eq!(*delay, std::time::Duration::from_secs(60));
    assert_eq!(continuation.next_node_ids, vec!["5".to_string()]);
    assert_eq!(continuation.nodes.len(), 2);
    assert!(ctx.logs.iter().any(|l| l.action == "delay_scheduled"));
}

#[tokio::test]
async fn test_sibling_after_delay_still_runs() {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executor = executor_with(sender.clone(), queue.clone());

    // Suspension parks only the delayed subtree; the next sibling branch
    // proceeds synchronously.
    let nodes = node_map(&[
        Node::send_email("2", "now@relay.test", "s", "b", &["3", "4"]),
        Node::delay("3", 10, &["5"]),
        Node::send_email("4", "also-now@relay.test", "s", "b", &[]),
        Node::send_email("5", "later@relay.test", "s", "b", &[]),
    ]);
    let mut ctx = ExecutionContext::new(Uuid::new_v4(), json!({}));

    let outcome = executor.run(&start(&["2"]), &nodes, &mut ctx).await.unwrap();

    assert_eq!(outcome, ExecutionOutcome::Suspended);
    assert_eq!(sender.recipients(), vec!["now@relay.test", "also-now@relay.test"]);
    assert_eq!(queue.take_jobs().len(), 1);
}
