// Node handler capability and registry

use async_trait::async_trait;
use relay_shared::Node;
use std::collections::HashMap;
use std::sync::Arc;

use super::actions::{HttpRequestHandler, NotificationSender, SendEmailHandler};
use super::conditions::ConditionHandler;
use super::executor::{EngineError, ExecutionContext};

/// What the interpreter should do after a node executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Proceed into the node's `next` successors.
    Advance,
    /// Condition result: route to `true_next` or `false_next`.
    Branch(bool),
}

/// One unit of node behavior, keyed by node type in the registry.
///
/// Handlers read the node's own configuration and may read or write the
/// execution context. Errors abort the current branch.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<Outcome, EngineError>;
}

/// Maps a node type tag to its handler. Node types without a registered
/// handler are skipped by the executor, not failed.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in condition and action handlers.
    pub fn with_builtins(http: reqwest::Client, notifier: Arc<dyn NotificationSender>) -> Self {
        let mut registry = Self::new();
        registry.register("condition", Arc::new(ConditionHandler));
        registry.register("http_request", Arc::new(HttpRequestHandler::new(http)));
        registry.register("send_email", Arc::new(SendEmailHandler::new(notifier)));
        registry
    }

    pub fn register(&mut self, node_type: &str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.to_string(), handler);
    }

    pub fn get(&self, node_type: &str) -> Option<&Arc<dyn NodeHandler>> {
        self.handlers.get(node_type)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
