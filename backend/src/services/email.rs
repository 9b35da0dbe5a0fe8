use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{PoolConfig, authentication::Credentials},
};
use std::time::Duration;
use tracing::{error, info};

use crate::automations::{EngineError, NotificationSender};
use crate::config::SmtpConfig;

#[derive(Debug, Clone)]
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl EmailService {
    pub fn new(smtp_config: &SmtpConfig) -> Self {
        let creds = Credentials::new(
            smtp_config.username.clone(),
            smtp_config.password.clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            .port(smtp_config.port)
            .credentials(creds)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)))
            .build();

        EmailService {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        }
    }

    pub async fn send_email(
        &self,
        to_email: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let from = format!("{} <{}>", self.from_name, self.from_email).parse::<Mailbox>()?;
        let to = to_email.parse::<Mailbox>()?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        match self.transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", to_email);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to_email, e);
                Err(Box::new(e))
            }
        }
    }
}

#[async_trait]
impl NotificationSender for EmailService {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), EngineError> {
        self.send_email(to, subject, body)
            .await
            .map_err(|e| EngineError::Notification(e.to_string()))
    }
}
