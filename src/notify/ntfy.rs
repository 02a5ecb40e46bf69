//! ntfy HTTP transport.
//!
//! Publishes with ntfy's JSON API: `POST {server}/` with the topic in the
//! body. Credentials go in a basic `Authorization` header; access tokens are
//! sent as the password with an empty username, which ntfy accepts.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{Destination, Notification, Notifier};

/// Max response body bytes included in an error.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Serialize)]
struct PublishAction<'a> {
    action: &'static str,
    label: &'a str,
    url: &'a str,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    topic: &'a str,
    title: &'a str,
    message: &'a str,
    priority: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    click: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    actions: Vec<PublishAction<'a>>,
}

/// [`Notifier`] backed by an ntfy server.
///
/// Reuses one `reqwest::Client` across publishes for connection pooling.
#[derive(Debug, Clone)]
pub struct NtfyNotifier {
    client: reqwest::Client,
}

impl NtfyNotifier {
    /// Create a notifier whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn publish(&self, destination: &Destination, notification: &Notification) -> Result<()> {
        let url = format!("{}/", destination.server.trim_end_matches('/'));

        let body = PublishRequest {
            topic: &destination.topic,
            title: &notification.title,
            message: &notification.message,
            priority: destination.priority,
            tags: notification.tags.iter().map(String::as_str).collect(),
            click: notification.click_url.as_deref(),
            actions: notification
                .actions
                .iter()
                .map(|a| PublishAction {
                    action: "view",
                    label: &a.label,
                    url: &a.url,
                })
                .collect(),
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(auth) = &destination.authorization {
            request = request.basic_auth(&auth.username, Some(&auth.password));
        }

        let response = request.send().await.context("ntfy HTTP request failed")?;
        let status = response.status();

        if status.is_success() {
            log::debug!("[ntfy] Published to {} ({})", destination.topic, status.as_u16());
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > ERROR_BODY_LIMIT {
            let mut cut = ERROR_BODY_LIMIT;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        anyhow::bail!("ntfy publish failed (HTTP {}): {}", status.as_u16(), body.trim())
    }
}
