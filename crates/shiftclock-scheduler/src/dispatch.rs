//! Notification dispatch — delivery with retry over a pluggable notifier.
//!
//! `Notifier` is the delivery seam. `Dispatcher` wraps any notifier with
//! one retry policy for every channel: bounded attempts, a per-attempt
//! timeout and exponential backoff. After the last attempt the event is
//! dropped and logged; state is never rolled back.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use shiftclock_core::config::NotifyConfig;
use thiserror::Error;

use crate::notify::{Delivery, Notification, NotifyChannel, NotifyPriority, NotifyRouter};

/// Why a delivery attempt failed.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Rejected(String),
}

/// Delivers one rendered notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notification: &Notification) -> Result<(), DispatchError>;
}

/// Posts Discord-webhook embeds, one URL per logical channel.
pub struct WebhookNotifier {
    client: reqwest::Client,
    urls: HashMap<NotifyChannel, String>,
}

impl WebhookNotifier {
    pub fn new(urls: HashMap<NotifyChannel, String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, urls }
    }

    /// `None` when no channel has a webhook configured.
    pub fn from_config(config: &NotifyConfig) -> Option<Self> {
        let urls: HashMap<NotifyChannel, String> = [
            (NotifyChannel::Milestones, &config.milestones_webhook),
            (NotifyChannel::Pauses, &config.pauses_webhook),
            (NotifyChannel::Cancellations, &config.cancellations_webhook),
        ]
        .into_iter()
        .filter_map(|(ch, url)| {
            url.as_ref()
                .filter(|u| !u.trim().is_empty())
                .map(|u| (ch, u.clone()))
        })
        .collect();
        if urls.is_empty() {
            return None;
        }
        Some(Self::new(urls, Duration::from_secs(config.attempt_timeout_secs.max(1))))
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        let Some(url) = self.urls.get(&notification.channel) else {
            tracing::info!(
                "📭 [{}] no webhook configured: {}",
                notification.channel,
                notification.title
            );
            return Ok(());
        };

        let color = match notification.priority {
            NotifyPriority::Urgent => 0xFF0000,
            NotifyPriority::High => 0xFF8800,
            NotifyPriority::Normal => 0x00AAFF,
            NotifyPriority::Low => 0x888888,
        };

        let resp = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "embeds": [{
                    "title": notification.title,
                    "description": notification.body,
                    "color": color,
                    "timestamp": notification.timestamp.to_rfc3339(),
                    "footer": {
                        "text": format!("Source: {}", notification.source)
                    }
                }]
            }))
            .send()
            .await?;

        if resp.status().is_success() {
            tracing::debug!("✅ Webhook notification sent [{}]: {}", notification.channel, notification.title);
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(DispatchError::Status { status, body })
        }
    }
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        tracing::info!(
            channel = %notification.channel,
            "📣 {} | {}",
            notification.title,
            notification.body.replace('\n', " | ")
        );
        Ok(())
    }
}

/// Keeps every notification in memory. Can be told to fail the next
/// `n` attempts.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failures: AtomicU32,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, attempts: u32) {
        self.failures.store(attempts, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_on(&self, channel: NotifyChannel) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.channel == channel).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> Result<(), DispatchError> {
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(DispatchError::Rejected("simulated failure".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        Ok(())
    }
}

/// Retry policy shared by every channel.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    /// Delay after the first failure; doubles each time.
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: Duration::from_secs(config.attempt_timeout_secs.max(1)),
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&NotifyConfig::default())
    }
}

/// Retrying delivery front-end.
pub struct Dispatcher {
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
    router: Mutex<NotifyRouter>,
}

impl Dispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self {
            notifier,
            policy,
            router: Mutex::new(NotifyRouter::new()),
        }
    }

    /// Webhook delivery when configured, log output otherwise.
    pub fn from_config(config: &NotifyConfig) -> Self {
        let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_config(config) {
            Some(webhook) => Arc::new(webhook),
            None => Arc::new(LogNotifier),
        };
        tracing::info!("📬 Notifications via {}", notifier.name());
        Self::new(notifier, RetryPolicy::from_config(config))
    }

    /// Deliver with retries. Returns whether it was delivered.
    pub async fn deliver(&self, notification: Notification) -> bool {
        let mut last_error = None;
        let mut attempts = 0;

        while attempts < self.policy.max_attempts {
            attempts += 1;
            let result = match tokio::time::timeout(
                self.policy.attempt_timeout,
                self.notifier.send(&notification),
            )
            .await
            {
                Ok(r) => r,
                Err(_) => Err(DispatchError::Timeout(self.policy.attempt_timeout)),
            };
            match result {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ [{}] delivery attempt {attempts}/{} failed: {e}",
                        notification.channel,
                        self.policy.max_attempts
                    );
                    last_error = Some(e.to_string());
                    if attempts < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay_after(attempts)).await;
                    }
                }
            }
        }

        let delivered = last_error.is_none();
        if !delivered {
            tracing::error!(
                "❌ [{}] dropping notification after {attempts} attempts: {}",
                notification.channel,
                notification.title
            );
        }
        self.router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(Delivery {
                notification,
                delivered,
                attempts,
                error: last_error,
            });
        delivered
    }

    /// Deliver several in order.
    pub async fn deliver_all(&self, notifications: Vec<Notification>) -> usize {
        let mut delivered = 0;
        for n in notifications {
            if self.deliver(n).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Recent delivery outcomes, oldest first.
    pub fn history(&self) -> Vec<Delivery> {
        self.router
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .history()
            .cloned()
            .collect()
    }
}
