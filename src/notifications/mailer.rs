use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::MailConfig;
use crate::events::OrderConfirmation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport failed: {0}")]
    Transport(String),
    #[error("mail provider rejected message with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError>;
}

pub fn render_order_confirmation(confirmation: &OrderConfirmation) -> EmailMessage {
    let short_id = confirmation.order_id.simple().to_string();
    let short_id = &short_id[..8];
    EmailMessage {
        to: confirmation.recipient_email.clone(),
        subject: format!("Order #{short_id} confirmed"),
        body: format!(
            "Hi {},\n\nThanks for your order #{} placed on {}.\n{} item(s), total {}.\n\nWe will let you know when it ships.",
            confirmation.recipient_name,
            short_id,
            confirmation.placed_at.format("%d %b %Y"),
            confirmation.item_count,
            confirmation.grand_total,
        ),
    }
}

/// Writes mail to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        info!(to = %message.to, subject = %message.subject, "mail not configured, logging instead");
        Ok(())
    }
}

/// Posts mail to a transactional mail provider's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpMailer {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    from_address: String,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: Option<String>, from_address: String) -> Result<Self, MailError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| MailError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            from_address,
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        let mut request = self.client.post(&self.endpoint).json(&json!({
            "from": self.from_address,
            "to": message.to,
            "subject": message.subject,
            "text": message.body,
        }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(MailError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Picks the HTTP mailer when an endpoint is configured.
pub fn mailer_from_config(config: &MailConfig) -> Result<std::sync::Arc<dyn Mailer>, MailError> {
    Ok(match &config.endpoint {
        Some(endpoint) if !endpoint.is_empty() => std::sync::Arc::new(HttpMailer::new(
            endpoint.clone(),
            config.api_key.clone(),
            config.from_address.clone(),
        )?),
        _ => std::sync::Arc::new(LogMailer),
    })
}
