//! Structural validation of user config documents.
//!
//! Validation walks the raw JSON document and collects every violation as a
//! [`ValidationError`]; it never stops at the first one. The result is data,
//! not an error: callers decide whether a non-empty list blocks an action
//! (`start`, `test`) or only produces warnings (`config print`).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// One schema violation, addressed by JSON pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// JSON pointer to the offending value (e.g. `/notification/server`).
    pub path: String,
    /// Human-readable description.
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.path, self.message)
    }
}

const NOTIFICATION_KEYS: &[&str] = &["server", "topic", "username", "password", "token", "priority"];
const ROUTING_KEYS: &[&str] = &["notifyOnPrivateMessages"];
const ROOT_KEYS: &[&str] = &["notification", "routing"];

/// ntfy access tokens: `tk_` followed by 29 alphanumerics.
static TOKEN_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^tk_[A-Za-z0-9]{29}$").unwrap_or_else(|e| panic!("invalid token regex: {e}"))
});

pub(crate) fn check_server(value: &str) -> Result<(), String> {
    match url::Url::parse(value) {
        Ok(url) if url.has_host() => Ok(()),
        _ => Err("Invalid server URL".to_string()),
    }
}

pub(crate) fn check_topic(value: &str) -> Result<(), String> {
    if value.is_empty() {
        Err("Topic cannot be empty".to_string())
    } else {
        Ok(())
    }
}

pub(crate) fn check_token(value: &str) -> Result<(), String> {
    if TOKEN_FORMAT.is_match(value) {
        Ok(())
    } else {
        Err("Invalid access token format (expected tk_ followed by 29 letters or digits)".to_string())
    }
}

pub(crate) fn check_priority(value: i64) -> Result<(), String> {
    if (1..=5).contains(&value) {
        Ok(())
    } else {
        Err("Priority must be between 1 and 5".to_string())
    }
}

/// Escape a key for use as a JSON pointer segment.
fn pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Validate a user config document, returning every violation found.
pub fn validate(document: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let Some(root) = document.as_object() else {
        errors.push(ValidationError::new("", "must be an object"));
        return errors;
    };

    reject_unknown_keys(root, ROOT_KEYS, "", &mut errors);

    match root.get("notification") {
        None => errors.push(ValidationError::new("/notification", "is required")),
        Some(Value::Object(notification)) => validate_notification(notification, &mut errors),
        Some(_) => errors.push(ValidationError::new("/notification", "must be an object")),
    }

    match root.get("routing") {
        None => {}
        Some(Value::Object(routing)) => validate_routing(routing, &mut errors),
        Some(_) => errors.push(ValidationError::new("/routing", "must be an object")),
    }

    errors
}

fn reject_unknown_keys(
    object: &Map<String, Value>,
    allowed: &[&str],
    parent: &str,
    errors: &mut Vec<ValidationError>,
) {
    for key in object.keys() {
        if !allowed.contains(&key.as_str()) {
            errors.push(ValidationError::new(
                format!("{parent}/{}", pointer_segment(key)),
                "is not an allowed property",
            ));
        }
    }
}

/// Fetch an optional string field. `null` and absent both mean "unset".
fn optional_str<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<&'a str> {
    match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            errors.push(ValidationError::new(
                format!("/notification/{key}"),
                "must be a string",
            ));
            None
        }
    }
}

fn validate_notification(notification: &Map<String, Value>, errors: &mut Vec<ValidationError>) {
    reject_unknown_keys(notification, NOTIFICATION_KEYS, "/notification", errors);

    match notification.get("server") {
        None | Some(Value::Null) => {
            errors.push(ValidationError::new("/notification/server", "is required"));
        }
        Some(Value::String(server)) => {
            if let Err(message) = check_server(server) {
                errors.push(ValidationError::new("/notification/server", message));
            }
        }
        Some(_) => errors.push(ValidationError::new("/notification/server", "must be a string")),
    }

    if let Some(topic) = optional_str(notification, "topic", errors) {
        if let Err(message) = check_topic(topic) {
            errors.push(ValidationError::new("/notification/topic", message));
        }
    }

    if let Some(token) = optional_str(notification, "token", errors) {
        if let Err(message) = check_token(token) {
            errors.push(ValidationError::new("/notification/token", message));
        }
    }

    match notification.get("priority") {
        None | Some(Value::Null) => {}
        Some(Value::Number(n)) if n.as_i64().is_some() => {
            if let Some(Err(message)) = n.as_i64().map(check_priority) {
                errors.push(ValidationError::new("/notification/priority", message));
            }
        }
        Some(_) => errors.push(ValidationError::new(
            "/notification/priority",
            "must be an integer",
        )),
    }

    let username = optional_str(notification, "username", errors).is_some();
    let password = optional_str(notification, "password", errors).is_some();

    // Two implications plus the dependency rule; all three are reported.
    if username && !password {
        errors.push(ValidationError::new(
            "/notification/password",
            "is required when notification.username is set",
        ));
    }
    if password && !username {
        errors.push(ValidationError::new(
            "/notification/username",
            "is required when notification.password is set",
        ));
    }
    if username != password {
        let (present, missing) = if username {
            ("username", "password")
        } else {
            ("password", "username")
        };
        errors.push(ValidationError::new(
            "/notification",
            format!("must have property '{missing}' when property '{present}' is present"),
        ));
    }
}

fn validate_routing(routing: &Map<String, Value>, errors: &mut Vec<ValidationError>) {
    reject_unknown_keys(routing, ROUTING_KEYS, "/routing", errors);

    match routing.get("notifyOnPrivateMessages") {
        None => {}
        Some(Value::Object(per_network)) => {
            for (network_id, value) in per_network {
                if !value.is_boolean() {
                    errors.push(ValidationError::new(
                        format!(
                            "/routing/notifyOnPrivateMessages/{}",
                            pointer_segment(network_id)
                        ),
                        "must be a boolean",
                    ));
                }
            }
        }
        Some(_) => errors.push(ValidationError::new(
            "/routing/notifyOnPrivateMessages",
            "must be an object",
        )),
    }
}
