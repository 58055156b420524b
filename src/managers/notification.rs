//! Escalation notifiers
//!
//! Escalated audit entries are forwarded to an external notifier. Delivery
//! failures are reported to the caller as [`NotificationError`] but never
//! affect the operation that produced the entry.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::config::NotificationConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Failed to send notification: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// How the operation behind an escalated entry ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

/// Accepts a text message for out-of-band delivery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, outcome: Outcome) -> Result<(), NotificationError>;
}

/// Discord embed color codes (decimal)
#[derive(Debug, Clone, Copy)]
pub enum NotificationColor {
    /// Red - for failures
    Failure = 15158332,    // #E74C3C
    /// Blue - for info
    Info = 3447003,        // #3498DB
}

impl NotificationColor {
    fn as_decimal(&self) -> u32 {
        *self as u32
    }
}

/// Discord webhook payload
#[derive(Debug, Serialize)]
struct DiscordPayload {
    username: String,
    embeds: Vec<DiscordEmbed>,
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
    footer: DiscordFooter,
    timestamp: String,
}

#[derive(Debug, Serialize)]
struct DiscordFooter {
    text: String,
}

/// Discord webhook notifier
pub struct DiscordNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }

    /// Notifier for the configuration, or None when no webhook is set
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>, NotificationError> {
        if config.discord_webhook_url.is_empty() {
            return Ok(None);
        }
        Self::new(config.discord_webhook_url.clone()).map(Some)
    }

    /// Build Discord webhook payload
    fn build_payload(&self, message: &str, outcome: Outcome) -> DiscordPayload {
        let (color, emoji) = match outcome {
            Outcome::Failed => (NotificationColor::Failure, "\u{274C}"), // Red X
            Outcome::Succeeded => (NotificationColor::Info, "\u{2139}\u{FE0F}"), // Info
        };

        // Discord caps embed descriptions
        let description = if message.chars().count() > 2000 {
            let truncated: String = message.chars().take(1997).collect();
            format!("{}...", truncated)
        } else {
            message.to_string()
        };

        DiscordPayload {
            username: "PG Backup Manager".to_string(),
            embeds: vec![DiscordEmbed {
                title: format!("{} PG Backup Manager", emoji),
                description,
                color: color.as_decimal(),
                footer: DiscordFooter {
                    text: "pg-backup-manager".to_string(),
                },
                timestamp: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            }],
        }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(&self, message: &str, outcome: Outcome) -> Result<(), NotificationError> {
        let payload = self.build_payload(message, outcome);

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("Discord webhook sent successfully");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            error!("Discord webhook failed with status {}: {}", status, body);
            Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
