// Shared data model for Relay automations.
//
// These types are what the automation builder UI edits and what the backend
// stores in the `automations.nodes` jsonb column, so everything here has to
// round-trip through serde unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Entry node id every runnable automation graph starts from.
pub const TRIGGER_NODE_ID: &str = "1";

/// A named, independently activatable workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub nodes: Vec<Node>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AutomationDefinition {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Index a node list by id. Duplicate ids keep the last occurrence.
pub fn node_map(nodes: &[Node]) -> HashMap<String, Node> {
    nodes
        .iter()
        .map(|n| (n.id.clone(), n.clone()))
        .collect()
}

/// One step in an automation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// Type-specific node configuration, tagged by `type` in the stored json.
///
/// Node types the engine does not know deserialize as `Unknown` rather than
/// failing the whole definition; the executor treats them as a dead end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Trigger {
        module: String,
        event: String,
        #[serde(default)]
        payload_match: HashMap<String, String>,
        #[serde(default)]
        next: Vec<String>,
    },
    Condition {
        #[serde(default)]
        conditions: Vec<Predicate>,
        #[serde(default)]
        true_next: Vec<String>,
        #[serde(default)]
        false_next: Vec<String>,
    },
    HttpRequest {
        url: String,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        body: serde_json::Value,
        #[serde(default)]
        next: Vec<String>,
    },
    SendEmail {
        to: String,
        subject: String,
        body: String,
        #[serde(default)]
        next: Vec<String>,
    },
    Delay {
        delay_minutes: u64,
        #[serde(default)]
        next: Vec<String>,
    },
    #[serde(other)]
    Unknown,
}

fn default_http_method() -> String {
    "POST".to_string()
}

impl NodeKind {
    /// The registry key this node dispatches on.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Trigger { .. } => "trigger",
            Self::Condition { .. } => "condition",
            Self::HttpRequest { .. } => "http_request",
            Self::SendEmail { .. } => "send_email",
            Self::Delay { .. } => "delay",
            Self::Unknown => "unknown",
        }
    }

    /// Successors taken when no branching outcome applies. Condition nodes
    /// route through `true_next`/`false_next` instead.
    pub fn default_next(&self) -> &[String] {
        match self {
            Self::Trigger { next, .. }
            | Self::HttpRequest { next, .. }
            | Self::SendEmail { next, .. }
            | Self::Delay { next, .. } => next,
            Self::Condition { .. } | Self::Unknown => &[],
        }
    }
}

impl Node {
    pub fn new(id: &str, kind: NodeKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
        }
    }

    pub fn trigger(id: &str, module: &str, event: &str, next: &[&str]) -> Self {
        Self::new(
            id,
            NodeKind::Trigger {
                module: module.to_string(),
                event: event.to_string(),
                payload_match: HashMap::new(),
                next: owned(next),
            },
        )
    }

    pub fn condition(id: &str, conditions: Vec<Predicate>, true_next: &[&str], false_next: &[&str]) -> Self {
        Self::new(
            id,
            NodeKind::Condition {
                conditions,
                true_next: owned(true_next),
                false_next: owned(false_next),
            },
        )
    }

    pub fn http_request(id: &str, url: &str, body: serde_json::Value, next: &[&str]) -> Self {
        Self::new(
            id,
            NodeKind::HttpRequest {
                url: url.to_string(),
                method: default_http_method(),
                headers: HashMap::new(),
                body,
                next: owned(next),
            },
        )
    }

    pub fn send_email(id: &str, to: &str, subject: &str, body: &str, next: &[&str]) -> Self {
        Self::new(
            id,
            NodeKind::SendEmail {
                to: to.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
                next: owned(next),
            },
        )
    }

    pub fn delay(id: &str, delay_minutes: u64, next: &[&str]) -> Self {
        Self::new(id, NodeKind::Delay { delay_minutes, next: owned(next) })
    }

    /// Add a payload filter entry to a trigger node. No-op for other kinds.
    pub fn with_payload_match(mut self, key: &str, value: &str) -> Self {
        if let NodeKind::Trigger { payload_match, .. } = &mut self.kind {
            payload_match.insert(key.to_string(), value.to_string());
        }
        self
    }
}

fn owned(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

/// A single field check inside a condition node.
///
/// The operator is an open string so definitions created by newer builder
/// versions still load; the evaluator decides what each operator means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Field to evaluate, dot notation for nested payload fields.
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Predicate {
    pub fn new(field: &str, operator: &str, value: serde_json::Value) -> Self {
        Self {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    pub fn exists(field: &str) -> Self {
        Self::new(field, "exists", serde_json::Value::Null)
    }

    pub fn equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "equals", value)
    }

    pub fn not_equals(field: &str, value: serde_json::Value) -> Self {
        Self::new(field, "not_equals", value)
    }

    pub fn gt(field: &str, value: f64) -> Self {
        Self::new(field, "gt", serde_json::json!(value))
    }

    pub fn lt(field: &str, value: f64) -> Self {
        Self::new(field, "lt", serde_json::json!(value))
    }
}
