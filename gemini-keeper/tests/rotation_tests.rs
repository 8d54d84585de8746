//! End-to-end tests for the rotation monitor and session lifecycle, run
//! against scripted sessions and counting sinks at the trait seams.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gemini_keeper::{
    ConversationSession, CookieJar, CredentialSink, EnvStore, KeeperError, MonitorConfig, Result,
    SessionKeeper,
};

fn jar(pairs: &[(&str, &str)]) -> CookieJar {
    let mut j = CookieJar::new();
    for (name, value) in pairs {
        j.insert(*name, *value);
    }
    j
}

fn partner_jar(value: &str) -> CookieJar {
    jar(&[("__Secure-1PSIDTS", value), ("NID", "noise")])
}

/// A session whose live jar replays a scripted sequence of snapshots, then
/// keeps returning the last one. `Err` entries simulate a jar that is
/// momentarily unreadable.
struct ScriptedSession {
    snapshots: Mutex<VecDeque<Result<CookieJar>>>,
    last: Mutex<Option<CookieJar>>,
    closed: AtomicBool,
}

impl ScriptedSession {
    fn new(snapshots: Vec<Result<CookieJar>>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots.into()),
            last: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationSession for ScriptedSession {
    async fn send(&self, _prompt: &str) -> Result<String> {
        assert!(!self.closed(), "send on a closed session");
        Ok("scripted reply".to_string())
    }

    fn live_cookies(&self) -> Result<CookieJar> {
        assert!(!self.closed(), "monitor read cookies after close");
        match self.snapshots.lock().unwrap().pop_front() {
            Some(Ok(snapshot)) => {
                *self.last.lock().unwrap() = Some(snapshot.clone());
                Ok(snapshot)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| KeeperError::Session("no snapshot scripted".into())),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Records persisted values; can fail a configured number of leading
/// attempts and/or stall each write.
#[derive(Default)]
struct CountingSink {
    values: Mutex<Vec<String>>,
    attempts: AtomicUsize,
    fail_first: AtomicUsize,
    write_delay: Option<Duration>,
}

impl CountingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing_first(n: usize) -> Arc<Self> {
        Arc::new(Self {
            fail_first: AtomicUsize::new(n),
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            write_delay: Some(delay),
            ..Self::default()
        })
    }

    fn values(&self) -> Vec<String> {
        self.values.lock().unwrap().clone()
    }
}

impl CredentialSink for CountingSink {
    fn persist_partner(&self, value: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(KeeperError::Session("scripted write failure".into()));
        }
        self.values.lock().unwrap().push(value.to_string());
        Ok(())
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(10),
        heartbeat: false,
        ..MonitorConfig::default()
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn rotation_sequence_persists_each_new_value_exactly_once() {
    // A A A B B C: updates fire at the first B and the first C only.
    let session = ScriptedSession::new(
        ["A", "A", "A", "B", "B", "C"]
            .iter()
            .map(|v| Ok(partner_jar(v)))
            .collect(),
    );
    let sink = CountingSink::new();
    let keeper = SessionKeeper::start(
        session.clone(),
        sink.clone(),
        Some("A".to_string()),
        fast_config(),
    );

    wait_until(|| sink.values() == ["B", "C"]).await;

    // Further identical snapshots must not add writes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.values(), ["B", "C"]);
    assert_eq!(
        keeper.partner_watch().borrow().as_deref(),
        Some("C"),
        "watch channel should carry the freshest value"
    );

    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();
    assert!(session.closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn identical_snapshots_never_trigger_a_write() {
    let session = ScriptedSession::new(vec![Ok(partner_jar("A"))]);
    let sink = CountingSink::new();
    let keeper = SessionKeeper::start(
        session.clone(),
        sink.clone(),
        Some("A".to_string()),
        fast_config(),
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(sink.values().is_empty());
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 0);

    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn absent_partner_cookie_is_unchanged_not_an_update() {
    let session = ScriptedSession::new(vec![Ok(jar(&[("NID", "noise")]))]);
    let sink = CountingSink::new();
    let keeper = SessionKeeper::start(session, sink.clone(), Some("A".to_string()), fast_config());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(sink.values().is_empty());

    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_jar_failures_do_not_kill_the_monitor() {
    let mut script: Vec<Result<CookieJar>> = (0..3)
        .map(|_| Err(KeeperError::Session("session not ready".into())))
        .collect();
    script.push(Ok(partner_jar("B")));
    let session = ScriptedSession::new(script);
    let sink = CountingSink::new();
    let keeper = SessionKeeper::start(
        session.clone(),
        sink.clone(),
        Some("A".to_string()),
        fast_config(),
    );

    wait_until(|| sink.values() == ["B"]).await;

    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();
    assert!(session.closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_store_write_is_retried_on_a_later_tick() {
    let session = ScriptedSession::new(vec![Ok(partner_jar("B"))]);
    let sink = CountingSink::failing_first(1);
    let keeper = SessionKeeper::start(
        session.clone(),
        sink.clone(),
        Some("A".to_string()),
        fast_config(),
    );

    // First attempt fails; the in-memory value is already ahead of the file
    // and a later tick reconciles them.
    wait_until(|| sink.values() == ["B"]).await;
    assert!(sink.attempts.load(Ordering::SeqCst) >= 2);
    // The watch channel advanced on the first (failed) attempt already.
    assert_eq!(keeper.partner_watch().borrow().as_deref(), Some("B"));

    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_never_loses_an_in_flight_persist() {
    let session = ScriptedSession::new(vec![Ok(partner_jar("B"))]);
    let sink = CountingSink::slow(Duration::from_millis(150));
    let keeper = SessionKeeper::start(
        session.clone(),
        sink.clone(),
        Some("A".to_string()),
        fast_config(),
    );

    // Let the update tick start its (slow) store write, then stop.
    wait_until(|| sink.attempts.load(Ordering::SeqCst) >= 1).await;
    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();

    assert_eq!(sink.values(), ["B"], "in-flight write must complete");
    assert!(session.closed(), "session closes only after the monitor");
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_is_idempotent_and_prompt() {
    let session = ScriptedSession::new(vec![Ok(partner_jar("A"))]);
    let keeper = SessionKeeper::start(
        session.clone(),
        CountingSink::new(),
        Some("A".to_string()),
        fast_config(),
    );

    keeper.request_stop();
    keeper.request_stop();
    tokio::time::timeout(Duration::from_secs(1), keeper.await_shutdown())
        .await
        .expect("shutdown should complete within one interval")
        .unwrap();
    assert!(session.closed());
}

#[tokio::test(flavor = "multi_thread")]
async fn rotation_rewrites_only_the_partner_line_in_the_store() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join(".env");
    std::fs::write(&path, "SECURE_1PSID=abc\nSECURE_1PSIDTS=old\nOTHER=keepme\n").unwrap();
    let store = Arc::new(EnvStore::new(&path));
    let initial = store.load().unwrap().partner;
    assert_eq!(initial.as_deref(), Some("old"));

    let session = ScriptedSession::new(vec![Ok(partner_jar("new123"))]);
    let keeper = SessionKeeper::start(session.clone(), store, initial, fast_config());

    wait_until(|| {
        std::fs::read_to_string(&path).unwrap()
            == "SECURE_1PSID=abc\nSECURE_1PSIDTS=new123\nOTHER=keepme\n"
    })
    .await;
    assert_eq!(keeper.partner_watch().borrow().as_deref(), Some("new123"));

    keeper.request_stop();
    keeper.await_shutdown().await.unwrap();
    assert!(session.closed());
}
