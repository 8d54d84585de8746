//! The conversational-session seam and the lifecycle coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cookies::CookieJar;
use crate::errors::Result;
use crate::monitor::{self, MonitorConfig};
use crate::store::CredentialSink;

/// An open conversational session with a readable live cookie jar.
///
/// The keeper only depends on this seam; the concrete Gemini web session
/// lives in [`crate::gemini`], and tests substitute mocks.
#[async_trait]
pub trait ConversationSession: Send + Sync {
    /// Sends one prompt and returns the reply text.
    async fn send(&self, prompt: &str) -> Result<String>;

    /// A point-in-time snapshot of the session's cookie jar. May fail
    /// transiently while the session is still settling.
    fn live_cookies(&self) -> Result<CookieJar>;

    /// Tears the session down. Called exactly once, after the rotation
    /// monitor has fully stopped.
    async fn close(&self) -> Result<()>;
}

/// Owns the running session plus its rotation monitor.
///
/// Startup order: credentials are loaded and the session opened by the
/// caller; `start` then spawns the monitor. Shutdown order: `request_stop`
/// signals the monitor, `await_shutdown` joins it and only then closes the
/// session, so the monitor never observes a closed session mid-check.
pub struct SessionKeeper {
    session: Arc<dyn ConversationSession>,
    monitor_task: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
    value_rx: watch::Receiver<Option<String>>,
}

impl SessionKeeper {
    /// Spawns the rotation monitor over an already-open session.
    /// `initial_partner` seeds the last-known value so an unchanged jar does
    /// not trigger a spurious first write.
    pub fn start(
        session: Arc<dyn ConversationSession>,
        sink: Arc<dyn CredentialSink>,
        initial_partner: Option<String>,
        config: MonitorConfig,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (value_tx, value_rx) = watch::channel(initial_partner);
        let monitor_task = tokio::spawn(monitor::run(
            session.clone(),
            sink,
            config,
            value_tx,
            stop_rx,
        ));
        Self {
            session,
            monitor_task,
            stop_tx,
            value_rx,
        }
    }

    /// Issues a foreground request through the session while the monitor
    /// keeps running.
    pub async fn send(&self, prompt: &str) -> Result<String> {
        self.session.send(prompt).await
    }

    /// Receiver for the freshest known partner value. Single writer (the
    /// monitor); readers see an at-most-one-tick-stale snapshot.
    pub fn partner_watch(&self) -> watch::Receiver<Option<String>> {
        self.value_rx.clone()
    }

    /// Signals the monitor to stop at its next waiting boundary. Idempotent
    /// and non-blocking.
    pub fn request_stop(&self) {
        debug!("stop requested");
        let _ = self.stop_tx.send(true);
    }

    /// Blocks until the monitor has observed the stop signal and exited,
    /// then closes the session. Any store write already in flight completes
    /// before this returns.
    pub async fn await_shutdown(self) -> Result<()> {
        // Harmless after request_stop; keeps a lone await_shutdown from
        // waiting on a monitor nobody told to stop.
        let _ = self.stop_tx.send(true);
        let _ = self.monitor_task.await;
        info!("monitor joined, closing session");
        self.session.close().await
    }
}
