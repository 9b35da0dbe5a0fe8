// Automation Engine
//
// Event-driven automation system for the Relay CRM platform. Domain events
// are matched against trigger nodes; matching definitions are interpreted
// node by node, with condition branching and durable timed delays.

pub mod actions;
pub mod conditions;
pub mod engine;
pub mod executor;
pub mod handlers;
pub mod store;
pub mod template;

pub use actions::{HttpRequestHandler, NotificationSender, SendEmailHandler};
pub use engine::AutomationEngine;
pub use executor::{AuditEntry, AuditLevel, EngineError, ExecutionContext, ExecutionOutcome, GraphExecutor};
pub use handlers::{HandlerRegistry, NodeHandler, Outcome};
pub use store::{
    DefinitionStore, ExecutionRecord, ExecutionStatus, ExecutionStore, PgDefinitionStore,
    PgExecutionStore,
};
