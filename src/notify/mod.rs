//! Outbound notification types and the transport trait.
//!
//! The engine produces a [`Notification`] and a [`Destination`] and hands
//! both to a [`Notifier`]. [`NtfyNotifier`] publishes to an ntfy server over
//! HTTP; tests substitute their own implementations.

pub mod ntfy;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::UserConfig;
pub use ntfy::NtfyNotifier;

/// A clickable action attached to a notification (ntfy "view" action).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationAction {
    /// Button label.
    pub label: String,
    /// URL opened when pressed.
    pub url: String,
}

/// Content of one push notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notification {
    /// Title line.
    pub title: String,
    /// Body text.
    pub message: String,
    /// URL opened when the notification itself is tapped.
    pub click_url: Option<String>,
    /// Action buttons.
    pub actions: Vec<NotificationAction>,
    /// ntfy tags (emoji shortcodes).
    pub tags: Vec<String>,
}

/// Credentials for the ntfy server.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    /// Username; empty when authenticating with an access token.
    pub username: String,
    /// Password or access token.
    pub password: String,
}

impl std::fmt::Debug for Authorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authorization")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where and how to publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    /// ntfy server base URL.
    pub server: String,
    /// Topic name.
    pub topic: String,
    /// Priority, 1 through 5.
    pub priority: i64,
    /// Credentials, if any are configured.
    pub authorization: Option<Authorization>,
}

impl Destination {
    /// Build the destination from a user's config.
    ///
    /// An access token wins over username/password.
    pub fn from_config(config: &UserConfig) -> Result<Self> {
        let notification = &config.notification;

        let Some(server) = notification.server.clone() else {
            bail!("No ntfy server configured (set notification.server)");
        };
        let Some(topic) = notification.topic.clone().filter(|t| !t.is_empty()) else {
            bail!("No ntfy topic configured (set notification.topic)");
        };

        let authorization = match (&notification.token, &notification.username, &notification.password) {
            (Some(token), _, _) if !token.is_empty() => Some(Authorization {
                username: String::new(),
                password: token.clone(),
            }),
            (_, Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Authorization {
                    username: username.clone(),
                    password: password.clone(),
                })
            }
            _ => None,
        };

        Ok(Self {
            server,
            topic,
            priority: config.priority(),
            authorization,
        })
    }
}

/// Delivers notifications. Best effort, no retries.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Publish one notification.
    async fn publish(&self, destination: &Destination, notification: &Notification) -> Result<()>;
}
