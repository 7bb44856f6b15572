//! Outbound grower notifications.

use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::info;

/// One alert as handed to a notifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Recipient group; resolving it to people happens outside this crate
    pub recipients: String,
    pub subject: String,
    pub body: String,
    pub link: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync + Debug {
    async fn notify(
        &self,
        recipients: &str,
        subject: &str,
        body: &str,
        link: Option<&str>,
    ) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        recipients: &str,
        subject: &str,
        body: &str,
        link: Option<&str>,
    ) -> Result<()> {
        info!(
            recipients = %recipients,
            subject = %subject,
            body = %body,
            link = link,
            "NOTIFICATION"
        );
        Ok(())
    }
}

/// Keeps every notification in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipients: &str,
        subject: &str,
        body: &str,
        link: Option<&str>,
    ) -> Result<()> {
        self.sent.lock().push(Notification {
            recipients: recipients.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            link: link.map(str::to_string),
        });
        Ok(())
    }
}
