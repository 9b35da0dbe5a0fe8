// Action handlers - outbound side effects performed by action nodes

use async_trait::async_trait;
use relay_shared::{Node, NodeKind};
use reqwest::Method;
use std::sync::Arc;
use tracing::{info, warn};

use super::executor::{AuditLevel, EngineError, ExecutionContext};
use super::handlers::{NodeHandler, Outcome};
use super::template::{expand_str, expand_value};

/// Outbound notification capability. Email today; structurally similar
/// channels (SMS, chat) plug in behind the same contract.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EngineError>;
}

/// Built-in handler for `http_request` nodes.
///
/// Url and body are template-expanded against the context; headers pass
/// through verbatim. Network failures and non-2xx responses abort the branch.
pub struct HttpRequestHandler {
    client: reqwest::Client,
}

impl HttpRequestHandler {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeHandler for HttpRequestHandler {
    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<Outcome, EngineError> {
        let NodeKind::HttpRequest { url, method, headers, body, .. } = &node.kind else {
            warn!(node_id = %node.id, "http_request handler invoked for a mismatched node kind");
            return Ok(Outcome::Advance);
        };

        let url = expand_str(url, &ctx.data);
        let body = expand_value(body, &ctx.data);
        let method = match method.to_uppercase().as_str() {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "PATCH" => Method::PATCH,
            "DELETE" => Method::DELETE,
            other => {
                return Err(EngineError::Handler(format!("unsupported HTTP method: {other}")));
            }
        };

        let mut request = self.client.request(method.clone(), &url);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        if !body.is_null() {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        response.error_for_status()?;

        info!(node_id = %node.id, %status, "http request dispatched");
        ctx.log(
            &node.id,
            AuditLevel::Info,
            "http_request_sent",
            format!("{method} {url} responded {status}"),
        );
        Ok(Outcome::Advance)
    }
}

/// Built-in handler for `send_email` nodes. Recipient, subject and body are
/// template-expanded, then handed to the notification sender.
pub struct SendEmailHandler {
    notifier: Arc<dyn NotificationSender>,
}

impl SendEmailHandler {
    pub fn new(notifier: Arc<dyn NotificationSender>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl NodeHandler for SendEmailHandler {
    async fn execute(&self, node: &Node, ctx: &mut ExecutionContext) -> Result<Outcome, EngineError> {
        let NodeKind::SendEmail { to, subject, body, .. } = &node.kind else {
            warn!(node_id = %node.id, "send_email handler invoked for a mismatched node kind");
            return Ok(Outcome::Advance);
        };

        let to = expand_str(to, &ctx.data);
        let subject = expand_str(subject, &ctx.data);
        let body = expand_str(body, &ctx.data);

        self.notifier.send(&to, &subject, &body).await?;

        info!(node_id = %node.id, %to, "notification email dispatched");
        ctx.log(
            &node.id,
            AuditLevel::Info,
            "email_sent",
            format!("sent '{subject}' to {to}"),
        );
        Ok(Outcome::Advance)
    }
}
