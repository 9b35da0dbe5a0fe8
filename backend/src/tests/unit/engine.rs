// End-to-end trigger dispatch through the automation engine.

use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::automations::AutomationEngine;
use crate::events::DomainEvent;
use crate::tests::fixtures::{
    InMemoryDefinitionStore, InMemoryDelayQueue, InMemoryExecutionStore, RecordingSender,
    deal_won_graph, definition, executor_with,
};
use relay_shared::Node;

struct Harness {
    engine: AutomationEngine,
    sender: Arc<RecordingSender>,
    executions: Arc<InMemoryExecutionStore>,
}

fn harness(definitions: Vec<relay_shared::AutomationDefinition>) -> Harness {
    let sender = Arc::new(RecordingSender::default());
    let queue = Arc::new(InMemoryDelayQueue::default());
    let executions = Arc::new(InMemoryExecutionStore::default());
    let engine = AutomationEngine::new(
        InMemoryDefinitionStore::with(definitions),
        executions.clone(),
        Arc::new(executor_with(sender.clone(), queue)),
    );
    Harness {
        engine,
        sender,
        executions,
    }
}

fn won_event(amount: f64) -> DomainEvent {
    DomainEvent::deal_status_changed(Uuid::new_v4(), "negotiation", "won", amount)
}

#[tokio::test]
async fn test_matching_event_starts_execution() {
    let h = harness(vec![definition(deal_won_graph())]);

    h.engine.on_event(won_event(5000.0)).await;

    assert_eq!(h.sender.recipients(), vec!["vp-sales@relay.test"]);
    assert_eq!(h.executions.seen(), vec!["running", "completed"]);
}

#[tokio::test]
async fn test_non_matching_payload_filter_starts_nothing() {
    let mut nodes = deal_won_graph();
    nodes[0] = Node::trigger("1", "deals", "status_changed", &["2"])
        .with_payload_match("status", "lost");
    let h = harness(vec![definition(nodes)]);

    h.engine.on_event(won_event(5000.0)).await;

    assert!(h.sender.recipients().is_empty());
    assert!(h.executions.seen().is_empty());
}

#[tokio::test]
async fn test_inactive_automation_never_runs() {
    let mut inactive = definition(deal_won_graph());
    inactive.is_active = false;
    let h = harness(vec![inactive]);

    h.engine.on_event(won_event(5000.0)).await;

    assert!(h.sender.recipients().is_empty());
    assert!(h.executions.seen().is_empty());
}

#[tokio::test]
async fn test_low_amount_routes_to_false_branch() {
    let h = harness(vec![definition(deal_won_graph())]);

    h.engine.on_event(won_event(500.0)).await;

    assert_eq!(h.sender.recipients(), vec!["sales@relay.test"]);
}

#[tokio::test]
async fn test_every_matching_definition_spawns_its_own_execution() {
    let h = harness(vec![
        definition(deal_won_graph()),
        definition(vec![
            Node::trigger("1", "deals", "status_changed", &["2"]),
            Node::send_email("2", "ops@relay.test", "any deal change", "b", &[]),
        ]),
    ]);

    h.engine.on_event(won_event(2000.0)).await;

    let mut recipients = h.sender.recipients();
    recipients.sort();
    assert_eq!(recipients, vec!["ops@relay.test", "vp-sales@relay.test"]);
    assert_eq!(h.executions.seen().len(), 4);
}

#[tokio::test]
async fn test_definition_without_trigger_is_skipped_quietly() {
    let h = harness(vec![definition(vec![Node::send_email(
        "2",
        "never@relay.test",
        "s",
        "b",
        &[],
    )])]);

    h.engine.on_event(won_event(2000.0)).await;

    assert!(h.sender.recipients().is_empty());
}

#[tokio::test]
async fn test_failed_execution_is_recorded_as_failed() {
    use crate::tests::fixtures::FailingSender;
    use crate::automations::GraphExecutor;
    use crate::tests::fixtures::registry_with;

    let queue = Arc::new(InMemoryDelayQueue::default());
    let executions = Arc::new(InMemoryExecutionStore::default());
    let engine = AutomationEngine::new(
        InMemoryDefinitionStore::with(vec![definition(deal_won_graph())]),
        executions.clone(),
        Arc::new(GraphExecutor::new(
            registry_with(Arc::new(FailingSender)),
            queue,
        )),
    );

    engine.on_event(won_event(5000.0)).await;

    let seen = executions.seen();
    assert_eq!(seen[0], "running");
    assert!(seen[1].starts_with("failed:"));
}
