//! Active listener bindings per (user, network).
//!
//! The registry is owned by the host process and passed to whatever issues
//! start/stop commands. Bindings live only in memory: a restart drops all of
//! them and users must start their listeners again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::engine::NotificationEngine;
use crate::network::{ChatNetwork, MessageHandler, SubscriptionId};

/// Result of [`ListenerRegistry::start`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new binding was created.
    Started,
    /// The pair was already bound; nothing changed.
    AlreadyRunning,
    /// The user's configuration is unusable; nothing changed.
    Refused(String),
}

impl fmt::Display for StartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::AlreadyRunning => write!(f, "already running"),
            Self::Refused(reason) => write!(f, "{reason}"),
        }
    }
}

/// Result of [`ListenerRegistry::stop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The binding was removed.
    Stopped,
    /// The pair was not bound; nothing changed.
    NotRunning,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::NotRunning => write!(f, "not running"),
        }
    }
}

/// Counts from a bulk start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BulkOutcome {
    /// Networks whose binding was created.
    pub started: usize,
    /// Networks that were already bound.
    pub skipped: usize,
}

/// One row of [`ListenerRegistry::status_all`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerStatus {
    /// Network id.
    pub network_id: String,
    /// Network display name at the time the listener started.
    pub network_name: String,
    /// Whether a listener is bound.
    pub running: bool,
}

struct Binding {
    network: Arc<dyn ChatNetwork>,
    network_name: String,
    subscription: SubscriptionId,
    // Kept so the handler outlives any network that only holds it weakly
    _handler: Arc<dyn MessageHandler>,
}

impl Binding {
    fn release(&self) {
        if !self.network.unsubscribe(self.subscription) {
            log::warn!(
                "[Registry] Subscription {} on {} was already gone",
                self.subscription,
                self.network_name
            );
        }
    }
}

type BindingKey = (String, String);

/// Owns every active (user, network) binding.
pub struct ListenerRegistry {
    engine: Arc<NotificationEngine>,
    bindings: HashMap<BindingKey, Binding>,
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("bindings", &self.bindings.len())
            .finish_non_exhaustive()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new(engine: Arc<NotificationEngine>) -> Self {
        log::warn!(
            "[Registry] Listener bindings are not persisted; after a restart every user must start their listeners again"
        );
        Self {
            engine,
            bindings: HashMap::new(),
        }
    }

    fn key(user: &str, network_id: &str) -> BindingKey {
        (user.to_string(), network_id.to_string())
    }

    /// Reason `user` may not start listeners, if any.
    fn refusal(&self, user: &str) -> Option<String> {
        match self.engine.store().load(user) {
            Ok(loaded) if loaded.is_valid() => None,
            Ok(loaded) => Some(format!(
                "Configuration has {} error(s); run config print for details",
                loaded.errors.len()
            )),
            Err(e) => Some(e.to_string()),
        }
    }

    /// Bind `network` for `user`.
    ///
    /// Refused while `user`'s configuration has validation errors.
    pub fn start(&mut self, user: &str, network: &Arc<dyn ChatNetwork>) -> StartOutcome {
        let state = network.state();
        let key = Self::key(user, &state.id);

        if self.bindings.contains_key(&key) {
            return StartOutcome::AlreadyRunning;
        }

        if let Some(reason) = self.refusal(user) {
            log::warn!("[Registry] Not starting listener for {}: {}", user, reason);
            return StartOutcome::Refused(reason);
        }

        let handler = self.engine.bind(user, network);
        let subscription = network.subscribe(Arc::clone(&handler));

        log::info!("[Registry] Started listener for {} on {}", user, state.name);

        self.bindings.insert(
            key,
            Binding {
                network: Arc::clone(network),
                network_name: state.name,
                subscription,
                _handler: handler,
            },
        );
        StartOutcome::Started
    }

    /// Bind every network in `networks` that is not yet bound for `user`.
    ///
    /// Stops at the first refusal and returns its reason; bindings created
    /// before it are kept.
    pub fn start_all(
        &mut self,
        user: &str,
        networks: &[Arc<dyn ChatNetwork>],
    ) -> Result<BulkOutcome, String> {
        let mut outcome = BulkOutcome::default();
        for network in networks {
            match self.start(user, network) {
                StartOutcome::Started => outcome.started += 1,
                StartOutcome::AlreadyRunning => outcome.skipped += 1,
                StartOutcome::Refused(reason) => return Err(reason),
            }
        }
        Ok(outcome)
    }

    /// Remove `user`'s binding on `network_id`.
    pub fn stop(&mut self, user: &str, network_id: &str) -> StopOutcome {
        match self.bindings.remove(&Self::key(user, network_id)) {
            Some(binding) => {
                binding.release();
                log::info!(
                    "[Registry] Stopped listener for {} on {}",
                    user,
                    binding.network_name
                );
                StopOutcome::Stopped
            }
            None => StopOutcome::NotRunning,
        }
    }

    /// Remove all of `user`'s bindings. Returns how many were stopped.
    pub fn stop_all(&mut self, user: &str) -> usize {
        let network_ids: Vec<String> = self
            .bindings
            .keys()
            .filter(|(u, _)| u == user)
            .map(|(_, network_id)| network_id.clone())
            .collect();

        network_ids
            .iter()
            .filter(|network_id| self.stop(user, network_id) == StopOutcome::Stopped)
            .count()
    }

    /// Whether `user` has a listener on `network_id`.
    pub fn is_running(&self, user: &str, network_id: &str) -> bool {
        self.bindings.contains_key(&Self::key(user, network_id))
    }

    /// Status line for one network.
    pub fn status(&self, user: &str, network_id: &str) -> ListenerStatus {
        match self.bindings.get(&Self::key(user, network_id)) {
            Some(binding) => ListenerStatus {
                network_id: network_id.to_string(),
                network_name: binding.network_name.clone(),
                running: true,
            },
            None => ListenerStatus {
                network_id: network_id.to_string(),
                network_name: String::new(),
                running: false,
            },
        }
    }

    /// Every listener `user` has running, sorted by network name.
    pub fn status_all(&self, user: &str) -> Vec<ListenerStatus> {
        let mut statuses: Vec<ListenerStatus> = self
            .bindings
            .iter()
            .filter(|((u, _), _)| u == user)
            .map(|((_, network_id), binding)| ListenerStatus {
                network_id: network_id.clone(),
                network_name: binding.network_name.clone(),
                running: true,
            })
            .collect();
        statuses.sort_by(|a, b| {
            a.network_name
                .cmp(&b.network_name)
                .then_with(|| a.network_id.cmp(&b.network_id))
        });
        statuses
    }

    /// Number of bindings across all users.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no bindings exist.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Drop for ListenerRegistry {
    fn drop(&mut self) {
        if self.bindings.is_empty() {
            return;
        }
        log::warn!(
            "[Registry] Dropping {} active listener(s); they will not be restored",
            self.bindings.len()
        );
        for binding in self.bindings.values() {
            binding.release();
        }
    }
}
