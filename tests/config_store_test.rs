//! Config store behaviour against a real storage root.

use std::fs;

use lounge_ntfy::config::{get_network_setting, NOTIFY_ON_PRIVATE_MESSAGES};
use lounge_ntfy::crypto::{is_encrypted, KEY_FILE_NAME};
use lounge_ntfy::{ConfigStore, SetOutcome};
use serde_json::Value;
use tempfile::TempDir;

fn read_document(dir: &TempDir, user: &str) -> Value {
    let path = dir.path().join("config").join(format!("{user}.json"));
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_defaults_validate_cleanly() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    let loaded = store.load("alice").unwrap();
    assert!(loaded.is_valid(), "{:?}", loaded.errors);
    assert_eq!(
        loaded.config.notification.server.as_deref(),
        Some("https://ntfy.sh")
    );
    assert_eq!(loaded.config.priority(), 3);
    assert!(dir.path().join(KEY_FILE_NAME).exists());
}

#[test]
fn test_secrets_encrypted_on_disk() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    assert_eq!(
        store
            .set_global("alice", "notification.username", Some("alice"))
            .unwrap(),
        SetOutcome::Applied
    );
    store
        .set_global("alice", "notification.password", Some("hunter2"))
        .unwrap();

    let document = read_document(&dir, "alice");
    let stored = document["notification"]["password"].as_str().unwrap();
    assert!(is_encrypted(stored));
    assert!(!stored.contains("hunter2"));
    assert_eq!(document["notification"]["username"], "alice");

    let loaded = store.load("alice").unwrap();
    assert_eq!(loaded.config.notification.password.as_deref(), Some("hunter2"));
    assert!(loaded.is_valid(), "{:?}", loaded.errors);
}

#[test]
fn test_secrets_readable_after_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = ConfigStore::open(dir.path()).unwrap();
        store
            .set_global("alice", "notification.token", Some("tk_abcdefghijklmnopqrstuvwxyz123"))
            .unwrap();
    }

    let store = ConfigStore::open(dir.path()).unwrap();
    let loaded = store.load("alice").unwrap();
    assert_eq!(
        loaded.config.notification.token.as_deref(),
        Some("tk_abcdefghijklmnopqrstuvwxyz123")
    );
}

#[test]
fn test_unknown_key_rejected_and_document_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    store
        .set_global("alice", "notification.topic", Some("alerts"))
        .unwrap();
    let before = read_document(&dir, "alice");

    let outcome = store
        .set_global("alice", "notification.colour", Some("red"))
        .unwrap();
    match outcome {
        SetOutcome::Rejected(reason) => {
            assert!(reason.starts_with("Invalid setting notification.colour"));
            assert!(reason.contains("notification.topic"));
        }
        SetOutcome::Applied => panic!("unknown key was applied"),
    }

    let outcome = store
        .set_per_network("alice", "routing.colour", "net-1", Some("true"))
        .unwrap();
    assert!(matches!(outcome, SetOutcome::Rejected(_)));

    assert_eq!(read_document(&dir, "alice"), before);
}

#[test]
fn test_bad_coercion_rejected() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    let outcome = store
        .set_global("alice", "notification.priority", Some("loud"))
        .unwrap();
    assert!(matches!(outcome, SetOutcome::Rejected(_)));

    let outcome = store
        .set_per_network("alice", NOTIFY_ON_PRIVATE_MESSAGES, "net-1", Some("maybe"))
        .unwrap();
    assert!(matches!(outcome, SetOutcome::Rejected(_)));

    assert!(!dir.path().join("config").join("alice.json").exists());
}

#[test]
fn test_unknown_top_level_key_reported_with_document() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(
        dir.path().join("config").join("alice.json"),
        r#"{
            "notification": { "server": "https://ntfy.sh", "topic": "alerts" },
            "colour": "red"
        }"#,
    )
    .unwrap();

    let loaded = store.load("alice").unwrap();
    assert!(!loaded.is_valid());
    assert!(loaded.errors.iter().any(|e| e.path == "/colour"));
    assert_eq!(loaded.config.notification.topic.as_deref(), Some("alerts"));
    assert_eq!(loaded.config.extra["colour"], "red");
}

#[test]
fn test_username_without_password() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    store
        .set_global("alice", "notification.username", Some("alice"))
        .unwrap();

    let loaded = store.load("alice").unwrap();
    assert!(!loaded.is_valid());
    assert!(loaded
        .errors
        .iter()
        .any(|e| e.to_string().contains("password")));
}

#[test]
fn test_malformed_document_is_error() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(dir.path().join("config").join("alice.json"), "{ not json").unwrap();

    let err = store.load("alice").unwrap_err();
    assert!(err.to_string().contains("alice"));
}

#[test]
fn test_per_network_set_and_remove() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    store
        .set_per_network("alice", NOTIFY_ON_PRIVATE_MESSAGES, "net-1", Some("TRUE"))
        .unwrap();
    store
        .set_per_network("alice", NOTIFY_ON_PRIVATE_MESSAGES, "net-2", Some("false"))
        .unwrap();

    let config = store.load("alice").unwrap().config;
    assert!(get_network_setting(&config, NOTIFY_ON_PRIVATE_MESSAGES, "net-1", false));
    assert!(!get_network_setting(&config, NOTIFY_ON_PRIVATE_MESSAGES, "net-2", true));
    assert!(get_network_setting(&config, NOTIFY_ON_PRIVATE_MESSAGES, "net-3", true));

    store
        .set_per_network("alice", NOTIFY_ON_PRIVATE_MESSAGES, "net-1", None)
        .unwrap();
    let document = read_document(&dir, "alice");
    assert!(document["routing"]["notifyOnPrivateMessages"]
        .get("net-1")
        .is_none());
    assert_eq!(document["routing"]["notifyOnPrivateMessages"]["net-2"], false);
}

#[test]
fn test_remove_clears_field() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    store
        .set_global("alice", "notification.topic", Some("alerts"))
        .unwrap();
    store.set_global("alice", "notification.topic", None).unwrap();

    let document = read_document(&dir, "alice");
    assert!(document["notification"]["topic"].is_null());
}

#[test]
fn test_print_masks_secrets() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    store
        .set_global("alice", "notification.token", Some("tk_abcdefghijklmnopqrstuvwxyz123"))
        .unwrap();

    let lines = store.load("alice").unwrap().display_lines();
    assert!(lines.contains(&"notification.token=********".to_string()));
    assert!(lines.contains(&"notification.server=https://ntfy.sh".to_string()));
    assert!(!lines.iter().any(|l| l.contains("tk_abc")));
}

#[test]
fn test_users_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();

    store
        .set_global("alice", "notification.topic", Some("alice-alerts"))
        .unwrap();

    assert_eq!(store.load("carol").unwrap().config.notification.topic, None);
    assert!(store.load("../alice").is_err());
}

fn write_raw(dir: &TempDir, user: &str, content: &str) {
    fs::create_dir_all(dir.path().join("config")).unwrap();
    fs::write(dir.path().join("config").join(format!("{user}.json")), content).unwrap();
}

#[test]
fn test_wrong_typed_values_survive_unrelated_save() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    write_raw(
        &dir,
        "alice",
        r#"{
            "notification": { "server": "https://ntfy.sh", "priority": "5" },
            "routing": { "notifyOnPrivateMessages": { "net-1": "yes", "net-2": true } }
        }"#,
    );

    let loaded = store.load("alice").unwrap();
    assert_eq!(loaded.errors.len(), 2, "{:?}", loaded.errors);
    let lines = loaded.display_lines();
    assert!(lines.contains(&"notification.priority=5".to_string()), "{lines:?}");
    assert!(
        lines.contains(&"routing.notifyOnPrivateMessages.net-1=yes".to_string()),
        "{lines:?}"
    );

    store
        .set_global("alice", "notification.topic", Some("alerts"))
        .unwrap();

    let document = read_document(&dir, "alice");
    assert_eq!(document["notification"]["topic"], "alerts");
    assert_eq!(document["notification"]["priority"], "5");
    assert_eq!(document["routing"]["notifyOnPrivateMessages"]["net-1"], "yes");
    assert_eq!(document["routing"]["notifyOnPrivateMessages"]["net-2"], true);
    assert_eq!(store.load("alice").unwrap().errors.len(), 2);
}

#[test]
fn test_setting_replaces_wrong_typed_value() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    write_raw(
        &dir,
        "alice",
        r#"{
            "notification": { "topic": "alerts", "priority": "5" },
            "routing": { "notifyOnPrivateMessages": { "net-1": "yes" } }
        }"#,
    );

    store
        .set_global("alice", "notification.priority", None)
        .unwrap();
    store
        .set_per_network("alice", NOTIFY_ON_PRIVATE_MESSAGES, "net-1", Some("true"))
        .unwrap();

    let document = read_document(&dir, "alice");
    assert_eq!(document["notification"]["priority"], Value::Null);
    assert_eq!(document["routing"]["notifyOnPrivateMessages"]["net-1"], true);
    assert!(store.load("alice").unwrap().is_valid());
}

#[test]
fn test_undecryptable_secret_kept_verbatim() {
    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    let tampered = format!("enc:{}:{}:abcd", "0".repeat(32), "0".repeat(32));
    write_raw(
        &dir,
        "alice",
        &format!(
            r#"{{ "notification": {{ "topic": "alerts", "username": "alice", "password": "{tampered}" }} }}"#
        ),
    );

    let loaded = store.load("alice").unwrap();
    assert_eq!(
        loaded.config.notification.password.as_deref(),
        Some(tampered.as_str())
    );

    store
        .set_global("alice", "notification.server", Some("https://ntfy.example.com"))
        .unwrap();

    let document = read_document(&dir, "alice");
    assert_eq!(document["notification"]["password"], tampered.as_str());
    assert_eq!(document["notification"]["server"], "https://ntfy.example.com");
}

#[cfg(unix)]
#[test]
fn test_saved_document_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store = ConfigStore::open(dir.path()).unwrap();
    store
        .set_global("alice", "notification.topic", Some("alerts"))
        .unwrap();

    let path = dir.path().join("config").join("alice.json");
    let mode = fs::metadata(path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    assert!(!dir.path().join("config").join("alice.json.tmp").exists());
}
