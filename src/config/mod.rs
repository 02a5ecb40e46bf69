//! Per-user configuration: document model, persistence and settings.
//!
//! Each relay user has one JSON document at `{root}/config/{user}.json`:
//!
//! ```json
//! {
//!   "notification": {
//!     "server": "https://ntfy.sh",
//!     "topic": "my-alerts",
//!     "username": null,
//!     "password": "enc:…",
//!     "token": null,
//!     "priority": 3
//!   },
//!   "routing": {
//!     "notifyOnPrivateMessages": { "<network uuid>": true }
//!   }
//! }
//! ```
//!
//! `notification.password` and `notification.token` are encrypted at rest by
//! [`SecretCodec`]; [`ConfigStore::load`] hands them out decrypted.
//!
//! Loading never fails on schema violations. They come back as a list of
//! [`ValidationError`]s next to the (possibly invalid) document so callers can
//! decide whether to block or warn.
//!
//! Saves are whole-document read-modify-write without a lock; concurrent
//! writers for the same user race and the last one wins.

pub mod schema;
pub mod settings;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::crypto::{write_owner_only, CodecError, SecretCodec};
pub use schema::{validate, ValidationError};
pub use settings::{
    find_global, find_network, FromSettingValue, GlobalSetting, NetworkSetting, SettingKind,
    SettingValue, GLOBAL_SETTINGS, NETWORK_SETTINGS, NOTIFY_ON_PRIVATE_MESSAGES,
};

/// Default ntfy server.
pub const DEFAULT_SERVER: &str = "https://ntfy.sh";

/// Default message priority (ntfy "default").
pub const DEFAULT_PRIORITY: i64 = 3;

/// Placeholder shown instead of secret values.
const MASKED: &str = "********";

/// Errors from loading or saving user config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The stored document is not valid JSON.
    #[error("Invalid JSON in user config for {user}: {source}")]
    Parse {
        /// User whose document failed to parse.
        user: String,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// Reading or writing the document failed.
    #[error("Failed to access user config at {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The username cannot be used as a file name.
    #[error("Invalid username '{user}': {reason}")]
    InvalidUsername {
        /// Rejected username.
        user: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Encrypting a sensitive field failed.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Serializing the document failed.
    #[error("Failed to serialize user config: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// The `notification` section.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotificationConfig {
    /// ntfy server base URL.
    pub server: Option<String>,
    /// Topic to publish to. Must be set before anything can be sent.
    pub topic: Option<String>,
    /// Basic-auth username (paired with `password`).
    pub username: Option<String>,
    /// Basic-auth password (paired with `username`).
    pub password: Option<String>,
    /// Access token; takes precedence over username/password.
    pub token: Option<String>,
    /// Message priority, 1 through 5.
    pub priority: Option<i64>,
    /// Keys not known to this version, kept for inspection.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            server: Some(DEFAULT_SERVER.to_string()),
            topic: None,
            username: None,
            password: None,
            token: None,
            priority: Some(DEFAULT_PRIORITY),
            extra: Map::new(),
        }
    }
}

/// The `routing` section: per-network overrides.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RoutingConfig {
    /// Network id → whether private messages notify.
    #[serde(rename = "notifyOnPrivateMessages")]
    pub notify_on_private_messages: BTreeMap<String, bool>,
    /// Keys not known to this version, kept for inspection.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One user's configuration document.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserConfig {
    /// Destination and credentials.
    pub notification: NotificationConfig,
    /// Per-network overrides.
    pub routing: RoutingConfig,
    /// Top-level keys not known to this version, kept for inspection.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn take_str(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

impl UserConfig {
    /// Build the typed view of a raw document.
    ///
    /// Known fields with the wrong type read as unset (schema validation
    /// reports them). Unknown keys are carried in `extra`.
    pub fn from_document(document: &Value) -> Self {
        let mut root = document.as_object().cloned().unwrap_or_default();

        let notification = match root.remove("notification") {
            Some(Value::Object(mut n)) => NotificationConfig {
                server: take_str(&mut n, "server"),
                topic: take_str(&mut n, "topic"),
                username: take_str(&mut n, "username"),
                password: take_str(&mut n, "password"),
                token: take_str(&mut n, "token"),
                priority: n.remove("priority").and_then(|p| p.as_i64()),
                extra: n,
            },
            _ => NotificationConfig {
                server: None,
                priority: None,
                ..NotificationConfig::default()
            },
        };

        let routing = match root.remove("routing") {
            Some(Value::Object(mut r)) => {
                let notify_on_private_messages = match r.remove("notifyOnPrivateMessages") {
                    Some(Value::Object(per_network)) => per_network
                        .into_iter()
                        .filter_map(|(id, v)| v.as_bool().map(|b| (id, b)))
                        .collect(),
                    _ => BTreeMap::new(),
                };
                RoutingConfig {
                    notify_on_private_messages,
                    extra: r,
                }
            }
            _ => RoutingConfig::default(),
        };

        Self {
            notification,
            routing,
            extra: root,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_document(&self) -> Result<Value, ConfigError> {
        serde_json::to_value(self).map_err(ConfigError::Serialize)
    }

    /// Effective priority (falls back to the default when unset).
    pub fn priority(&self) -> i64 {
        self.notification.priority.unwrap_or(DEFAULT_PRIORITY)
    }

}

fn flatten_into(value: &Value, prefix: &str, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let full_key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, &full_key, lines);
            }
        }
        Value::String(s) if settings::is_sensitive(prefix) && !s.is_empty() => {
            lines.push(format!("{prefix}={MASKED}"));
        }
        Value::String(s) => lines.push(format!("{prefix}={s}")),
        Value::Null => lines.push(format!("{prefix}=null")),
        _ if settings::is_sensitive(prefix) => lines.push(format!("{prefix}={MASKED}")),
        other => lines.push(format!("{prefix}={other}")),
    }
}

/// Look up a per-network setting, falling back to `default`.
///
/// Returns `default` when `key` is not a per-network setting, when the
/// network has no entry, or when the stored value has a different kind.
pub fn get_network_setting<T: FromSettingValue>(
    config: &UserConfig,
    key: &str,
    network_id: &str,
    default: T,
) -> T {
    find_network(key)
        .and_then(|setting| setting.get(&config.routing, network_id))
        .and_then(T::from_setting)
        .unwrap_or(default)
}

/// A loaded document together with its validation result.
#[derive(Clone, Debug)]
pub struct LoadedConfig {
    /// Typed view of the document, decrypted.
    pub config: UserConfig,
    /// Schema violations; empty when valid.
    pub errors: Vec<ValidationError>,
    /// The document as stored (secrets decrypted), including values the
    /// typed view cannot represent.
    pub document: Value,
}

impl LoadedConfig {
    /// Whether the document passed validation.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Flatten the stored document into `dotted.key=value` lines, masking secrets.
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        flatten_into(&self.document, "", &mut lines);
        lines
    }
}

/// Result of a settings change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// The change was persisted.
    Applied,
    /// The change was refused; the stored document is untouched.
    Rejected(String),
}

impl std::fmt::Display for SetOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Applied => write!(f, "Success"),
            Self::Rejected(reason) => write!(f, "{reason}"),
        }
    }
}

/// Names of the two fields encrypted at rest.
const SENSITIVE_FIELDS: [&str; 2] = ["password", "token"];

/// Reject usernames that cannot safely become a file name.
fn check_username(user: &str) -> Result<(), ConfigError> {
    let reason = if user.is_empty() {
        Some("cannot be empty")
    } else if user.starts_with('.') {
        Some("cannot start with '.'")
    } else if user.contains(['/', '\\']) {
        Some("cannot contain path separators")
    } else if user.chars().any(char::is_control) {
        Some("cannot contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(ConfigError::InvalidUsername {
            user: user.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Reads and writes user config documents under one storage root.
#[derive(Debug)]
pub struct ConfigStore {
    root: PathBuf,
    codec: SecretCodec,
}

impl ConfigStore {
    /// Open the store at `root`, loading or creating its encryption key.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let root = root.into();
        let codec = SecretCodec::open(&root)?;
        log::info!("[Config] Using config directory: {}", root.display());
        Ok(Self { root, codec })
    }

    /// Create a store with an explicit codec.
    pub fn with_codec(root: impl Into<PathBuf>, codec: SecretCodec) -> Self {
        Self {
            root: root.into(),
            codec,
        }
    }

    /// Path of `user`'s document.
    pub fn config_path(&self, user: &str) -> Result<PathBuf, ConfigError> {
        check_username(user)?;
        Ok(self.root.join("config").join(format!("{user}.json")))
    }

    /// Load `user`'s configuration.
    ///
    /// A missing document yields the defaults. Malformed JSON is an error.
    /// Sensitive fields that fail to decrypt are left as stored, with a
    /// warning.
    pub fn load(&self, user: &str) -> Result<LoadedConfig, ConfigError> {
        let path = self.config_path(user)?;

        if !path.exists() {
            let config = UserConfig::default();
            let document = config.to_document()?;
            let errors = validate(&document);
            return Ok(LoadedConfig {
                config,
                errors,
                document,
            });
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut document: Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
                user: user.to_string(),
                source,
            })?;

        self.decrypt_fields(user, &mut document);

        let errors = validate(&document);
        if !errors.is_empty() {
            log::debug!(
                "[Config] {} validation error(s) in config for {}",
                errors.len(),
                user
            );
        }

        Ok(LoadedConfig {
            config: UserConfig::from_document(&document),
            errors,
            document,
        })
    }

    fn encrypt_fields(&self, document: &mut Value) -> Result<(), ConfigError> {
        let Some(notification) = document
            .get_mut("notification")
            .and_then(Value::as_object_mut)
        else {
            return Ok(());
        };

        for field in SENSITIVE_FIELDS {
            if let Some(Value::String(plain)) = notification.get_mut(field) {
                *plain = self.codec.encrypt(plain)?;
            }
        }
        Ok(())
    }

    fn decrypt_fields(&self, user: &str, document: &mut Value) {
        let Some(notification) = document
            .get_mut("notification")
            .and_then(Value::as_object_mut)
        else {
            return;
        };

        for field in SENSITIVE_FIELDS {
            if let Some(Value::String(stored)) = notification.get_mut(field) {
                match self.codec.decrypt(stored) {
                    Ok(plain) => *stored = plain,
                    Err(e) => log::warn!(
                        "[Config] Could not decrypt notification.{} for {}: {}",
                        field,
                        user,
                        e
                    ),
                }
            }
        }
    }

    /// Apply `mutate` to `user`'s document and persist it.
    ///
    /// `target` is the key path `mutate` writes; its value is always stored,
    /// even when the typed view could not represent the old one. Other values
    /// are written only if `mutate` changed them, so values of the wrong type
    /// survive unrelated saves. If `mutate` rejects, nothing is written and the
    /// reason comes back as [`SetOutcome::Rejected`].
    pub fn save<F>(
        &self,
        user: &str,
        target: &[&str],
        mutate: F,
    ) -> Result<SetOutcome, ConfigError>
    where
        F: FnOnce(&mut UserConfig) -> Result<(), String>,
    {
        let path = self.config_path(user)?;
        let loaded = self.load(user)?;
        let before = loaded.config.to_document()?;
        let mut config = loaded.config;

        if let Err(reason) = mutate(&mut config) {
            return Ok(SetOutcome::Rejected(reason));
        }

        let after = config.to_document()?;
        let mut document = loaded.document;
        merge_changes(&mut document, &before, &after);
        write_at(&mut document, target, lookup(&after, target));
        self.encrypt_fields(&mut document)?;

        let content = serde_json::to_string_pretty(&document).map_err(ConfigError::Serialize)?;
        write_atomic(&path, &content)?;

        log::debug!("[Config] Saved config for {}", user);
        Ok(SetOutcome::Applied)
    }

    /// Set or clear (`value = None`) a global setting.
    pub fn set_global(
        &self,
        user: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<SetOutcome, ConfigError> {
        let Some(setting) = find_global(key) else {
            return Ok(SetOutcome::Rejected(settings::unknown_key_message(
                key,
                GLOBAL_SETTINGS.iter().map(|s| s.key),
            )));
        };

        let target: Vec<&str> = setting.key.split('.').collect();
        self.save(user, &target, |config| {
            setting.apply(&mut config.notification, value)
        })
    }

    /// Set or remove (`value = None`) a per-network setting for `network_id`.
    pub fn set_per_network(
        &self,
        user: &str,
        key: &str,
        network_id: &str,
        value: Option<&str>,
    ) -> Result<SetOutcome, ConfigError> {
        let Some(setting) = find_network(key) else {
            return Ok(SetOutcome::Rejected(settings::unknown_key_message(
                key,
                NETWORK_SETTINGS.iter().map(|s| s.key),
            )));
        };

        let mut target: Vec<&str> = setting.key.split('.').collect();
        target.push(network_id);
        self.save(user, &target, |config| {
            setting.apply(&mut config.routing, network_id, value)
        })
    }
}

/// Carry the differences between `before` and `after` into `document`.
///
/// Keys equal on both sides are left untouched in `document`, so values the
/// typed view dropped survive a save that did not change them.
fn merge_changes(document: &mut Value, before: &Value, after: &Value) {
    if !(document.is_object() && before.is_object() && after.is_object()) {
        if before != after {
            *document = after.clone();
        }
        return;
    }
    let (Some(target), Some(before), Some(after)) = (
        document.as_object_mut(),
        before.as_object(),
        after.as_object(),
    ) else {
        return;
    };

    let keys: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
    for key in keys {
        match (before.get(key), after.get(key)) {
            (old, new) if old == new => {}
            (_, None) => {
                target.remove(key);
            }
            (old, Some(new)) => match target.get_mut(key) {
                Some(existing) => merge_changes(existing, old.unwrap_or(&Value::Null), new),
                None => {
                    target.insert(key.clone(), new.clone());
                }
            },
        }
    }
}

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |node, key| node.get(*key))
}

/// Store `value` at `path`, creating objects along the way; `None` removes it.
fn write_at(document: &mut Value, path: &[&str], value: Option<&Value>) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };

    let mut node = document;
    for key in parents {
        let Some(object) = node.as_object_mut() else {
            return;
        };
        node = object
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if let Some(object) = node.as_object_mut() {
        match value {
            Some(value) => {
                object.insert(last.to_string(), value.clone());
            }
            None => {
                object.remove(*last);
            }
        }
    }
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
fn write_atomic(path: &Path, content: &str) -> Result<(), ConfigError> {
    let io_err = |source: io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp_path = path.with_extension("json.tmp");
    write_owner_only(&temp_path, content.as_bytes()).map_err(io_err)?;
    fs::rename(&temp_path, path).map_err(io_err)
}
