//! Table of user-settable configuration keys.
//!
//! Every key a user can `set` or `remove` has a static entry here with its
//! value kind, a getter, a setter and a validator. Lookups go through the
//! table; there is no dotted-path walking over the JSON document, so an
//! unknown key can never silently write somewhere unexpected.

use super::schema::{check_priority, check_server, check_token, check_topic};
use super::{NotificationConfig, RoutingConfig};

/// Declared type of a setting's value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKind {
    /// Free-form string.
    Text,
    /// Signed integer.
    Integer,
    /// `true` / `false` (case-insensitive on input).
    Boolean,
}

/// A coerced setting value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingValue {
    /// String value.
    Text(String),
    /// Integer value.
    Integer(i64),
    /// Boolean value.
    Boolean(bool),
}

impl SettingValue {
    fn into_text(self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn into_integer(self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(n),
            _ => None,
        }
    }

    fn into_boolean(self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

impl std::fmt::Display for SettingValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

impl SettingKind {
    /// Coerce raw user input to this kind.
    ///
    /// Returns a user-facing message on failure.
    pub fn coerce(self, key: &str, raw: &str) -> Result<SettingValue, String> {
        match self {
            Self::Text => Ok(SettingValue::Text(raw.to_string())),
            Self::Integer => raw.trim().parse::<i64>().map(SettingValue::Integer).map_err(|e| {
                format!("Invalid value for {key}: expected an integer, got '{raw}' ({e})")
            }),
            Self::Boolean => {
                let raw_trimmed = raw.trim();
                if raw_trimmed.eq_ignore_ascii_case("true") {
                    Ok(SettingValue::Boolean(true))
                } else if raw_trimmed.eq_ignore_ascii_case("false") {
                    Ok(SettingValue::Boolean(false))
                } else {
                    Err(format!(
                        "Invalid value for {key}: expected true or false, got '{raw}'"
                    ))
                }
            }
        }
    }
}

/// A key with one value per user.
pub struct GlobalSetting {
    /// Dotted key as typed by users.
    pub key: &'static str,
    /// Declared value kind.
    pub kind: SettingKind,
    /// Encrypted at rest and masked on display.
    pub sensitive: bool,
    write: fn(&mut NotificationConfig, Option<SettingValue>),
    check: fn(&SettingValue) -> Result<(), String>,
}

impl std::fmt::Debug for GlobalSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalSetting")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("sensitive", &self.sensitive)
            .finish_non_exhaustive()
    }
}

impl GlobalSetting {
    /// Coerce and validate `raw`, or clear the field when `raw` is `None`.
    ///
    /// Leaves `config` untouched on rejection.
    pub fn apply(&self, config: &mut NotificationConfig, raw: Option<&str>) -> Result<(), String> {
        let value = match raw {
            Some(raw) => {
                let value = self.kind.coerce(self.key, raw)?;
                (self.check)(&value).map_err(|reason| format!("Invalid value for {}: {reason}", self.key))?;
                Some(value)
            }
            None => None,
        };
        (self.write)(config, value);
        Ok(())
    }
}

fn accept(_: &SettingValue) -> Result<(), String> {
    Ok(())
}

fn text_check(check: fn(&str) -> Result<(), String>, value: &SettingValue) -> Result<(), String> {
    match value {
        SettingValue::Text(s) => check(s),
        other => Err(format!("expected text, got {other}")),
    }
}

/// All global settings.
pub static GLOBAL_SETTINGS: &[GlobalSetting] = &[
    GlobalSetting {
        key: "notification.server",
        kind: SettingKind::Text,
        sensitive: false,
        write: |c, v| c.server = v.and_then(SettingValue::into_text),
        check: |v| text_check(check_server, v),
    },
    GlobalSetting {
        key: "notification.topic",
        kind: SettingKind::Text,
        sensitive: false,
        write: |c, v| c.topic = v.and_then(SettingValue::into_text),
        check: |v| text_check(check_topic, v),
    },
    GlobalSetting {
        key: "notification.username",
        kind: SettingKind::Text,
        sensitive: false,
        write: |c, v| c.username = v.and_then(SettingValue::into_text),
        check: accept,
    },
    GlobalSetting {
        key: "notification.password",
        kind: SettingKind::Text,
        sensitive: true,
        write: |c, v| c.password = v.and_then(SettingValue::into_text),
        check: accept,
    },
    GlobalSetting {
        key: "notification.token",
        kind: SettingKind::Text,
        sensitive: true,
        write: |c, v| c.token = v.and_then(SettingValue::into_text),
        check: |v| text_check(check_token, v),
    },
    GlobalSetting {
        key: "notification.priority",
        kind: SettingKind::Integer,
        sensitive: false,
        write: |c, v| c.priority = v.and_then(SettingValue::into_integer),
        check: |v| match v {
            SettingValue::Integer(n) => check_priority(*n),
            other => Err(format!("expected an integer, got {other}")),
        },
    },
];

/// A key holding one value per network.
pub struct NetworkSetting {
    /// Dotted key as typed by users.
    pub key: &'static str,
    /// Declared value kind.
    pub kind: SettingKind,
    read: fn(&RoutingConfig, &str) -> Option<SettingValue>,
    write: fn(&mut RoutingConfig, &str, Option<SettingValue>),
}

impl std::fmt::Debug for NetworkSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkSetting")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl NetworkSetting {
    /// Value for `network_id`, if one is stored.
    pub fn get(&self, config: &RoutingConfig, network_id: &str) -> Option<SettingValue> {
        (self.read)(config, network_id)
    }

    /// Coerce and store `raw` for `network_id`, or remove the entry when `None`.
    pub fn apply(
        &self,
        config: &mut RoutingConfig,
        network_id: &str,
        raw: Option<&str>,
    ) -> Result<(), String> {
        let value = raw.map(|raw| self.kind.coerce(self.key, raw)).transpose()?;
        (self.write)(config, network_id, value);
        Ok(())
    }
}

/// Key for the per-network private message policy.
pub const NOTIFY_ON_PRIVATE_MESSAGES: &str = "routing.notifyOnPrivateMessages";

/// All per-network settings.
pub static NETWORK_SETTINGS: &[NetworkSetting] = &[NetworkSetting {
    key: NOTIFY_ON_PRIVATE_MESSAGES,
    kind: SettingKind::Boolean,
    read: |c, id| {
        c.notify_on_private_messages
            .get(id)
            .copied()
            .map(SettingValue::Boolean)
    },
    write: |c, id, v| match v.and_then(SettingValue::into_boolean) {
        Some(enabled) => {
            c.notify_on_private_messages.insert(id.to_string(), enabled);
        }
        None => {
            c.notify_on_private_messages.remove(id);
        }
    },
}];

/// Look up a global setting by key.
pub fn find_global(key: &str) -> Option<&'static GlobalSetting> {
    GLOBAL_SETTINGS.iter().find(|s| s.key == key)
}

/// Look up a per-network setting by key.
pub fn find_network(key: &str) -> Option<&'static NetworkSetting> {
    NETWORK_SETTINGS.iter().find(|s| s.key == key)
}

/// Whether `key` names a sensitive global setting.
pub fn is_sensitive(key: &str) -> bool {
    find_global(key).is_some_and(|s| s.sensitive)
}

/// Rejection message listing the allowed keys.
pub(crate) fn unknown_key_message(key: &str, settings: impl Iterator<Item = &'static str>) -> String {
    let allowed: Vec<&str> = settings.collect();
    format!(
        "Invalid setting {key}, allowed settings are: {}",
        allowed.join(", ")
    )
}

/// Conversion from a stored setting value, used by typed reads.
pub trait FromSettingValue: Sized {
    /// Convert, or `None` on a kind mismatch.
    fn from_setting(value: SettingValue) -> Option<Self>;
}

impl FromSettingValue for bool {
    fn from_setting(value: SettingValue) -> Option<Self> {
        value.into_boolean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_coercion_is_case_insensitive() {
        let kind = SettingKind::Boolean;
        assert_eq!(kind.coerce("k", "TRUE"), Ok(SettingValue::Boolean(true)));
        assert_eq!(kind.coerce("k", "False"), Ok(SettingValue::Boolean(false)));
        assert!(kind.coerce("k", "yes").is_err());
    }

    #[test]
    fn test_integer_coercion() {
        assert_eq!(
            SettingKind::Integer.coerce("k", " 4 "),
            Ok(SettingValue::Integer(4))
        );
        let err = SettingKind::Integer.coerce("notification.priority", "high").unwrap_err();
        assert!(err.contains("notification.priority"));
    }

    #[test]
    fn test_priority_range_checked_on_apply() {
        let setting = find_global("notification.priority").unwrap();
        let mut config = NotificationConfig::default();

        assert!(setting.apply(&mut config, Some("9")).is_err());
        assert_eq!(config.priority, Some(3));

        setting.apply(&mut config, Some("5")).unwrap();
        assert_eq!(config.priority, Some(5));

        setting.apply(&mut config, None).unwrap();
        assert_eq!(config.priority, None);
    }

    #[test]
    fn test_server_must_be_uri() {
        let setting = find_global("notification.server").unwrap();
        let mut config = NotificationConfig::default();
        assert!(setting.apply(&mut config, Some("ntfy")).is_err());
        setting
            .apply(&mut config, Some("https://ntfy.example.com"))
            .unwrap();
        assert_eq!(config.server.as_deref(), Some("https://ntfy.example.com"));
    }

    #[test]
    fn test_network_setting_insert_and_remove() {
        let setting = find_network(NOTIFY_ON_PRIVATE_MESSAGES).unwrap();
        let mut routing = RoutingConfig::default();

        setting.apply(&mut routing, "net-1", Some("true")).unwrap();
        assert_eq!(
            setting.get(&routing, "net-1"),
            Some(SettingValue::Boolean(true))
        );

        setting.apply(&mut routing, "net-1", None).unwrap();
        assert_eq!(setting.get(&routing, "net-1"), None);
    }

    #[test]
    fn test_sensitive_keys() {
        assert!(is_sensitive("notification.password"));
        assert!(is_sensitive("notification.token"));
        assert!(!is_sensitive("notification.username"));
    }
}
