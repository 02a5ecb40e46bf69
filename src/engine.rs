//! Per-message notification decisions.
//!
//! For every incoming message the engine decides whether to notify and, if
//! so, builds and sends the notification:
//!
//! ```text
//! own message? ──yes──▶ drop
//!      │
//! muted channel? ──yes──▶ drop
//!      │
//! mentioned in a channel? ──yes──▶ notify
//!      │
//! private message? ──no──▶ drop
//!      │
//! config valid && notifyOnPrivateMessages[network]? ──▶ notify / drop
//! ```
//!
//! Configuration is read fresh for each message that needs it, so edits
//! apply to the next message without restarting listeners. Dispatch is
//! fire-and-forget: failures are logged and never reach the event source.

use std::sync::{Arc, LazyLock, Weak};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use crate::config::{get_network_setting, ConfigStore, LoadedConfig, NOTIFY_ON_PRIVATE_MESSAGES};
use crate::host::HostConfig;
use crate::network::{ChannelInfo, ChatNetwork, MessageEvent, MessageHandler, NetworkState};
use crate::notify::{Destination, Notification, NotificationAction, Notifier};

/// IRC formatting: bold, reset, reverse, italic, underline, and colour
/// codes with optional `fg[,bg]` digits.
static IRC_FORMATTING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\x02\x0F\x16\x1D\x1F]|\x03(?:\d{1,2}(?:,\d{1,2})?)?")
        .unwrap_or_else(|e| panic!("invalid formatting regex: {e}"))
});

/// Remove IRC style and colour codes from message text.
pub fn strip_formatting(message: &str) -> String {
    IRC_FORMATTING.replace_all(message, "").into_owned()
}

/// Why a message did not produce a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// We sent it.
    OwnMessage,
    /// The channel or query is muted.
    MutedChannel,
    /// Channel message without a highlight.
    NotMentioned,
    /// Private message, but the network's policy is off.
    PrivateMessagesDisabled,
    /// The user's config has validation errors.
    InvalidConfig,
    /// The user's config could not be read.
    ConfigUnavailable,
}

/// Outcome of evaluating one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Send a notification.
    Notify,
    /// Do nothing.
    Drop(DropReason),
}

impl Verdict {
    /// Whether this verdict sends a notification.
    pub fn is_notify(self) -> bool {
        self == Self::Notify
    }
}

/// Verdict plus the context needed to build the notification.
#[derive(Clone, Debug)]
pub struct Evaluation {
    /// The decision.
    pub verdict: Verdict,
    /// Whether the message was addressed to us directly.
    pub is_private: bool,
    /// Resolved channel or query, if open.
    pub channel: Option<ChannelInfo>,
    /// Config loaded while deciding, reused for dispatch.
    loaded: Option<LoadedConfig>,
}

impl Evaluation {
    fn drop(reason: DropReason, is_private: bool, channel: Option<ChannelInfo>) -> Self {
        Self {
            verdict: Verdict::Drop(reason),
            is_private,
            channel,
            loaded: None,
        }
    }
}

/// Test `text` against a network highlight pattern, ignoring case.
///
/// An invalid pattern never matches.
pub fn is_mentioned(pattern: &str, text: &str) -> bool {
    match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex.is_match(text),
        Err(e) => {
            log::warn!("[ntfy] Invalid highlight pattern, treating as no mention: {}", e);
            false
        }
    }
}

/// Decides and dispatches notifications for all users of one relay process.
pub struct NotificationEngine {
    store: Arc<ConfigStore>,
    notifier: Arc<dyn Notifier>,
    host: HostConfig,
}

impl std::fmt::Debug for NotificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationEngine")
            .field("store", &self.store)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl NotificationEngine {
    /// Create an engine.
    pub fn new(store: Arc<ConfigStore>, notifier: Arc<dyn Notifier>, host: HostConfig) -> Self {
        Self {
            store,
            notifier,
            host,
        }
    }

    /// The config store this engine reads.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Decide whether `event` on `network` should notify `user`.
    ///
    /// Only reads `user`'s config for private messages that were not
    /// already settled by an earlier rule.
    pub fn evaluate(&self, user: &str, network: &NetworkState, event: &MessageEvent) -> Evaluation {
        if event.nick == network.current_nick {
            return Evaluation::drop(DropReason::OwnMessage, false, None);
        }

        let is_private = event.target == network.current_nick;
        let channel = network.resolve_channel(event, is_private).cloned();

        if channel.as_ref().is_some_and(|c| c.muted) {
            return Evaluation::drop(DropReason::MutedChannel, is_private, channel);
        }

        let mentioned = is_mentioned(&network.highlight_pattern, &event.message);

        if mentioned && !is_private {
            return Evaluation {
                verdict: Verdict::Notify,
                is_private,
                channel,
                loaded: None,
            };
        }

        if !is_private {
            return Evaluation::drop(DropReason::NotMentioned, is_private, channel);
        }

        let loaded = match self.store.load(user) {
            Ok(loaded) => loaded,
            Err(e) => {
                log::error!("[ntfy] Failed to load config for {}: {}", user, e);
                return Evaluation::drop(DropReason::ConfigUnavailable, is_private, channel);
            }
        };

        if !loaded.is_valid() {
            return Evaluation::drop(DropReason::InvalidConfig, is_private, channel);
        }

        let verdict = if get_network_setting(&loaded.config, NOTIFY_ON_PRIVATE_MESSAGES, &network.id, false) {
            Verdict::Notify
        } else {
            Verdict::Drop(DropReason::PrivateMessagesDisabled)
        };

        Evaluation {
            verdict,
            is_private,
            channel,
            loaded: Some(loaded),
        }
    }

    /// Build the notification for a message that passed evaluation.
    pub fn build_notification(
        &self,
        network: &NetworkState,
        event: &MessageEvent,
        is_private: bool,
        channel: Option<&ChannelInfo>,
    ) -> Notification {
        let title = if is_private {
            format!("{}: {}", network.name, event.nick)
        } else {
            format!("{} {}: {}", network.name, event.target, event.nick)
        };

        let click_url = match (self.host.base_url.as_deref(), channel) {
            (Some(base_url), Some(channel)) => match channel_url(base_url, channel.id) {
                Ok(url) => Some(url),
                Err(e) => {
                    log::error!(
                        "[ntfy] Failed to construct channel URL for notification: {:#}",
                        e
                    );
                    None
                }
            },
            _ => None,
        };

        let actions = click_url
            .iter()
            .map(|url| NotificationAction {
                label: "Open".to_string(),
                url: url.clone(),
            })
            .collect();

        Notification {
            title,
            message: strip_formatting(&event.message),
            click_url,
            actions,
            tags: self.host.default_tags.clone(),
        }
    }

    /// Evaluate one message and send a notification if warranted.
    ///
    /// Never fails: every error is logged and the message is dropped.
    pub async fn handle_message(&self, user: &str, network: &NetworkState, event: &MessageEvent) {
        let evaluation = self.evaluate(user, network, event);

        if let Verdict::Drop(reason) = evaluation.verdict {
            log::debug!(
                "[ntfy] Not notifying {} for message on {}: {:?}",
                user,
                network.name,
                reason
            );
            return;
        }

        if let Err(e) = self.dispatch(user, network, event, evaluation).await {
            log::error!(
                "[ntfy] Failed to send notification for {} on {}: {:#}",
                user,
                network.name,
                e
            );
        }
    }

    async fn dispatch(
        &self,
        user: &str,
        network: &NetworkState,
        event: &MessageEvent,
        evaluation: Evaluation,
    ) -> Result<()> {
        let loaded = match evaluation.loaded {
            Some(loaded) => loaded,
            None => self
                .store
                .load(user)
                .with_context(|| format!("Failed to load config for {user}"))?,
        };

        if !loaded.is_valid() {
            log::debug!("[ntfy] Config for {} has errors, skipping notification", user);
            return Ok(());
        }

        let destination = Destination::from_config(&loaded.config)?;
        let notification =
            self.build_notification(network, event, evaluation.is_private, evaluation.channel.as_ref());

        self.notifier.publish(&destination, &notification).await
    }

    /// Send a test notification to `user`'s configured destination.
    ///
    /// Refused when the config has validation errors. Returns a short reason
    /// on failure.
    pub async fn send_test_notification(&self, user: &str) -> std::result::Result<(), String> {
        let loaded = self.store.load(user).map_err(|e| e.to_string())?;

        if !loaded.is_valid() {
            return Err(format!(
                "Configuration has {} error(s); fix them before sending a test notification",
                loaded.errors.len()
            ));
        }

        let destination = Destination::from_config(&loaded.config).map_err(|e| e.to_string())?;
        let notification = Notification {
            title: "Test notification".to_string(),
            message: "ntfy notifications are working".to_string(),
            tags: self.host.default_tags.clone(),
            ..Notification::default()
        };

        self.notifier
            .publish(&destination, &notification)
            .await
            .map_err(|e| format!("{e:#}"))
    }

    /// Create a handler that feeds `network`'s messages for `user` into this engine.
    ///
    /// The handler holds the network weakly so a subscription never keeps a
    /// disconnected network alive.
    pub fn bind(self: &Arc<Self>, user: &str, network: &Arc<dyn ChatNetwork>) -> Arc<dyn MessageHandler> {
        Arc::new(BoundHandler {
            engine: Arc::clone(self),
            user: user.to_string(),
            network: Arc::downgrade(network),
        })
    }
}

/// Web client link to a channel: `{base}/#/chan-{id}`.
fn channel_url(base_url: &str, channel_id: u64) -> Result<String> {
    let base = url::Url::parse(base_url).with_context(|| format!("Invalid base URL '{base_url}'"))?;
    let url = base
        .join(&format!("/#/chan-{channel_id}"))
        .context("Failed to join channel path")?;
    Ok(url.to_string())
}

struct BoundHandler {
    engine: Arc<NotificationEngine>,
    user: String,
    network: Weak<dyn ChatNetwork>,
}

#[async_trait]
impl MessageHandler for BoundHandler {
    async fn on_message(&self, event: MessageEvent) {
        let Some(network) = self.network.upgrade() else {
            return;
        };
        let state = network.state();
        self.engine.handle_message(&self.user, &state, &event).await;
    }
}
