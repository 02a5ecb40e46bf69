//! Chat network abstraction consumed by the notification engine.
//!
//! The relay owns the actual IRC connections. This module describes the
//! slice of a connection the engine needs: a snapshot of network state
//! (current nick, highlight pattern, channels) and a message subscription.
//!
//! # Architecture
//!
//! ```text
//! ChatNetwork (trait, implemented by the host)
//!     │ subscribe(handler) / unsubscribe(id)
//!     ▼
//! MessageHandler (trait)
//!     └── engine-bound handler, created by ListenerRegistry::start
//! ```
//!
//! [`LocalNetwork`] is an in-process implementation for hosts that push
//! messages themselves, and for tests.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

/// Handle returned by [`ChatNetwork::subscribe`].
pub type SubscriptionId = u64;

/// An incoming chat message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEvent {
    /// Sender's nick.
    pub nick: String,
    /// Channel name, or our own nick for a private message.
    pub target: String,
    /// Message text (empty when the event carried none).
    pub message: String,
}

impl MessageEvent {
    /// Convenience constructor.
    pub fn new(nick: impl Into<String>, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            target: target.into(),
            message: message.into(),
        }
    }
}

/// A channel or query window on a network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Relay-wide channel id (used in web client links).
    pub id: u64,
    /// Channel name, or the peer's nick for a query.
    pub name: String,
    /// Whether the user muted this channel.
    pub muted: bool,
}

/// Snapshot of a network's state at the time a message is handled.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkState {
    /// Stable network id (uuid).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Our nick on this network right now.
    pub current_nick: String,
    /// Highlight pattern built by the relay from the nick and user highlights.
    pub highlight_pattern: String,
    /// Open channels and queries.
    pub channels: Vec<ChannelInfo>,
}

impl NetworkState {
    /// Find the channel a message belongs to.
    ///
    /// Private messages resolve to the query named after the sender (exact
    /// match); channel messages resolve by name, ignoring case.
    pub fn resolve_channel(&self, event: &MessageEvent, is_private: bool) -> Option<&ChannelInfo> {
        if is_private {
            self.channels.iter().find(|c| c.name == event.nick)
        } else {
            self.channels
                .iter()
                .find(|c| c.name.to_lowercase() == event.target.to_lowercase())
        }
    }
}

/// Receives messages from one network.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message. Must not fail; errors are dealt with internally.
    async fn on_message(&self, event: MessageEvent);
}

/// A connected chat network as seen by the notification engine.
pub trait ChatNetwork: Send + Sync {
    /// Current state snapshot.
    fn state(&self) -> NetworkState;

    /// Register `handler` for incoming messages.
    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId;

    /// Remove a handler. Returns `false` if the id was unknown.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

#[derive(Default)]
struct Subscribers {
    handlers: Vec<(SubscriptionId, Arc<dyn MessageHandler>)>,
    next_id: SubscriptionId,
}

/// In-process [`ChatNetwork`]: the host updates state and pushes messages.
pub struct LocalNetwork {
    state: Mutex<NetworkState>,
    subscribers: Mutex<Subscribers>,
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalNetwork")
            .field("state", &*lock(&self.state))
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LocalNetwork {
    /// Create a network with the given initial state.
    pub fn new(state: NetworkState) -> Self {
        Self {
            state: Mutex::new(state),
            subscribers: Mutex::new(Subscribers::default()),
        }
    }

    /// Mutate the network state (nick change, channel muted, …).
    pub fn update<F: FnOnce(&mut NetworkState)>(&self, f: F) {
        f(&mut lock(&self.state));
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).handlers.len()
    }

    /// Deliver a message to every subscribed handler, in subscription order.
    pub async fn deliver(&self, event: MessageEvent) {
        // Snapshot so handlers can (un)subscribe while running
        let handlers: Vec<Arc<dyn MessageHandler>> = lock(&self.subscribers)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            handler.on_message(event.clone()).await;
        }
    }
}

impl ChatNetwork for LocalNetwork {
    fn state(&self) -> NetworkState {
        lock(&self.state).clone()
    }

    fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> SubscriptionId {
        let mut subscribers = lock(&self.subscribers);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.handlers.push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.handlers.len();
        subscribers.handlers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.handlers.len() != before
    }
}
