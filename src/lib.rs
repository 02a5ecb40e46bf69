//! lounge-ntfy - push notifications for a multi-user IRC relay via ntfy.
//!
//! Watches incoming chat messages per connected network, decides whether a
//! push notification should fire, and manages the per-user configuration
//! (with encrypted credentials) behind that decision.
//!
//! # Architecture
//!
//! - **ListenerRegistry** - Owns the (user, network) bindings, start/stop/status
//! - **NotificationEngine** - Per-message verdict and notification payload
//! - **ConfigStore** - Per-user JSON documents, validation, settings
//! - **SecretCodec** - At-rest encryption of credentials
//!
//! # Modules
//!
//! - [`config`] - User configuration documents and settings
//! - [`crypto`] - Field encryption and key management
//! - [`engine`] - Notification decisions
//! - [`host`] - Process-wide settings
//! - [`network`] - Chat network abstraction
//! - [`notify`] - Notification payloads and the ntfy transport
//! - [`registry`] - Listener lifecycle

pub mod config;
pub mod crypto;
pub mod engine;
pub mod host;
pub mod network;
pub mod notify;
pub mod registry;

// Re-export commonly used types
pub use config::{ConfigStore, LoadedConfig, SetOutcome, UserConfig};
pub use crypto::SecretCodec;
pub use engine::{NotificationEngine, Verdict};
pub use host::HostConfig;
pub use network::{ChatNetwork, LocalNetwork, MessageEvent, NetworkState};
pub use notify::{Notifier, NtfyNotifier};
pub use registry::ListenerRegistry;
