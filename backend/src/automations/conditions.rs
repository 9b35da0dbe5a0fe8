// Condition evaluation - ordered conjunction of field predicates

use async_trait::async_trait;
use relay_shared::{Node, NodeKind, Predicate};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

use super::executor::{AuditLevel, EngineError, ExecutionContext};
use super::handlers::{NodeHandler, Outcome};

/// Evaluate predicates against context data.
///
/// Predicates are ANDed and evaluation stops at the first failure. An empty
/// predicate list passes.
pub fn evaluate_all(predicates: &[Predicate], data: &Value) -> bool {
    first_failure(predicates, data).is_none()
}

pub(crate) fn first_failure(predicates: &[Predicate], data: &Value) -> Option<usize> {
    predicates.iter().position(|p| !evaluate(p, data))
}

fn evaluate(predicate: &Predicate, data: &Value) -> bool {
    let value = lookup_path(data, &predicate.field);

    match predicate.operator.as_str() {
        "exists" => !matches!(value, None | Some(Value::Null)),
        "equals" => value.map(|v| *v == predicate.value).unwrap_or(false),
        "not_equals" => value.map(|v| *v != predicate.value).unwrap_or(true),
        "gt" => compare(value, &predicate.value) == Some(Ordering::Greater),
        "lt" => compare(value, &predicate.value) == Some(Ordering::Less),
        // Operators this engine does not know perform no check.
        _ => true,
    }
}

/// Resolve a dotted path against a json document. A missing segment ends the
/// walk with `None`.
pub(crate) fn lookup_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = data;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

fn compare(value: Option<&Value>, against: &Value) -> Option<Ordering> {
    match (value?, against) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Built-in handler for `condition` nodes.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<Outcome, EngineError> {
        let NodeKind::Condition { conditions, .. } = &node.kind else {
            warn!(node_id = %node.id, "condition handler invoked for a non-condition node");
            return Ok(Outcome::Advance);
        };

        let matched = evaluate_all(conditions, &ctx.data);
        ctx.log(
            &node.id,
            AuditLevel::Info,
            "condition_evaluated",
            format!("{} predicate(s) evaluated to {}", conditions.len(), matched),
        );
        Ok(Outcome::Branch(matched))
    }
}
