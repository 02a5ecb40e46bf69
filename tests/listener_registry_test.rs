//! Listener lifecycle through the public registry API.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use lounge_ntfy::network::ChannelInfo;
use lounge_ntfy::notify::{Destination, Notification, Notifier};
use lounge_ntfy::registry::{BulkOutcome, StartOutcome, StopOutcome};
use lounge_ntfy::{
    ChatNetwork, ConfigStore, HostConfig, ListenerRegistry, LocalNetwork, MessageEvent,
    NetworkState, NotificationEngine, SecretCodec,
};
use tempfile::TempDir;

#[derive(Default)]
struct CountingNotifier {
    titles: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn publish(&self, _destination: &Destination, notification: &Notification) -> Result<()> {
        self.titles.lock().unwrap().push(notification.title.clone());
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    registry: ListenerRegistry,
    notifier: Arc<CountingNotifier>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(ConfigStore::with_codec(
        dir.path(),
        SecretCodec::with_key([9u8; 32]),
    ));
    store
        .set_global("alice", "notification.topic", Some("alerts"))
        .unwrap();

    let notifier = Arc::new(CountingNotifier::default());
    let engine = Arc::new(NotificationEngine::new(
        store,
        notifier.clone(),
        HostConfig::default(),
    ));

    Fixture {
        _dir: dir,
        registry: ListenerRegistry::new(engine),
        notifier,
    }
}

fn network(id: &str, name: &str) -> Arc<LocalNetwork> {
    Arc::new(LocalNetwork::new(NetworkState {
        id: id.to_string(),
        name: name.to_string(),
        current_nick: "bob".to_string(),
        highlight_pattern: "bob".to_string(),
        channels: vec![ChannelInfo {
            id: 1,
            name: "#rust".to_string(),
            muted: false,
        }],
    }))
}

#[test]
fn test_start_twice_keeps_one_binding() {
    let mut fixture = fixture();
    let local = network("net-1", "Libera");
    let net: Arc<dyn ChatNetwork> = local.clone();

    assert_eq!(fixture.registry.start("alice", &net), StartOutcome::Started);
    let second = fixture.registry.start("alice", &net);
    assert_eq!(second, StartOutcome::AlreadyRunning);
    assert_eq!(second.to_string(), "already running");

    assert_eq!(fixture.registry.len(), 1);
    assert_eq!(local.subscriber_count(), 1);
}

#[test]
fn test_stop_when_not_running() {
    let mut fixture = fixture();
    let outcome = fixture.registry.stop("alice", "net-1");
    assert_eq!(outcome, StopOutcome::NotRunning);
    assert_eq!(outcome.to_string(), "not running");
}

#[test]
fn test_bulk_start_and_stop() {
    let mut fixture = fixture();
    let networks: Vec<Arc<dyn ChatNetwork>> = vec![
        network("net-1", "Libera"),
        network("net-2", "OFTC"),
        network("net-3", "EFnet"),
    ];

    fixture.registry.start("alice", &networks[1]);

    let outcome = fixture.registry.start_all("alice", &networks).unwrap();
    assert_eq!(
        outcome,
        BulkOutcome {
            started: 2,
            skipped: 1
        }
    );

    let statuses = fixture.registry.status_all("alice");
    let names: Vec<&str> = statuses.iter().map(|s| s.network_name.as_str()).collect();
    assert_eq!(names, vec!["EFnet", "Libera", "OFTC"]);
    assert!(statuses.iter().all(|s| s.running));

    assert_eq!(fixture.registry.stop_all("alice"), 3);
    assert!(fixture.registry.status_all("alice").is_empty());
    assert_eq!(fixture.registry.stop_all("alice"), 0);
}

#[test]
fn test_status_reads_do_not_mutate() {
    let mut fixture = fixture();
    let net: Arc<dyn ChatNetwork> = network("net-1", "Libera");
    fixture.registry.start("alice", &net);

    let status = fixture.registry.status("alice", "net-1");
    assert!(status.running);
    assert_eq!(status.network_name, "Libera");
    assert!(!fixture.registry.status("alice", "net-2").running);
    assert!(!fixture.registry.status("carol", "net-1").running);
    assert_eq!(fixture.registry.len(), 1);
}

#[tokio::test]
async fn test_bound_listener_delivers_notifications() {
    let mut fixture = fixture();
    let local = network("net-1", "Libera");
    let net: Arc<dyn ChatNetwork> = local.clone();

    fixture.registry.start("alice", &net);
    local
        .deliver(MessageEvent::new("carol", "#rust", "bob: lunch?"))
        .await;
    local
        .deliver(MessageEvent::new("carol", "#rust", "anyone?"))
        .await;

    assert_eq!(
        *fixture.notifier.titles.lock().unwrap(),
        vec!["Libera #rust: carol".to_string()]
    );

    fixture.registry.stop("alice", "net-1");
    local
        .deliver(MessageEvent::new("carol", "#rust", "bob, still there?"))
        .await;
    assert_eq!(fixture.notifier.titles.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_listener_sees_nick_changes() {
    let mut fixture = fixture();
    let local = network("net-1", "Libera");
    let net: Arc<dyn ChatNetwork> = local.clone();
    fixture.registry.start("alice", &net);

    local.update(|state| state.current_nick = "bob_".to_string());
    local
        .deliver(MessageEvent::new("bob_", "#rust", "bob is my old nick"))
        .await;

    assert!(fixture.notifier.titles.lock().unwrap().is_empty());
}
