// Domain event bus
//
// CRM modules publish domain events here; the automation engine subscribes
// and matches them against trigger nodes. Delivery is in-process only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// A business event emitted by a CRM module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub event_id: Uuid,
    /// Module that produced the event, e.g. `deals`.
    pub module: String,
    /// Event name within the module, e.g. `status_changed`.
    pub event: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(module: &str, event: &str, payload: serde_json::Value) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            module: module.to_string(),
            event: event.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn deal_created(deal_id: Uuid, name: &str, amount: f64, stage: &str) -> Self {
        Self::new(
            "deals",
            "created",
            serde_json::json!({
                "deal_id": deal_id,
                "name": name,
                "amount": amount,
                "stage": stage
            }),
        )
    }

    pub fn deal_status_changed(deal_id: Uuid, old_status: &str, new_status: &str, amount: f64) -> Self {
        Self::new(
            "deals",
            "status_changed",
            serde_json::json!({
                "deal_id": deal_id,
                "old_status": old_status,
                "status": new_status,
                "amount": amount
            }),
        )
    }

    pub fn contact_created(contact_id: Uuid, email: &str, name: &str) -> Self {
        Self::new(
            "contacts",
            "created",
            serde_json::json!({
                "contact_id": contact_id,
                "email": email,
                "name": name
            }),
        )
    }

    pub fn invoice_overdue(invoice_id: Uuid, amount: f64, days_overdue: i32) -> Self {
        Self::new(
            "invoices",
            "overdue",
            serde_json::json!({
                "invoice_id": invoice_id,
                "amount": amount,
                "days_overdue": days_overdue
            }),
        )
    }
}

/// Fan-out channel connecting event producers to the automation engine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    /// Publish an event. Events emitted while nobody subscribes are dropped.
    pub fn emit(&self, event: DomainEvent) {
        debug!(module = %event.module, event = %event.event, "domain event emitted");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
