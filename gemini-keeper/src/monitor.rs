//! Background rotation monitor.
//!
//! Google rotates the partner token (`__Secure-1PSIDTS`/`-1PSIDCC`) silently
//! while a session is open. The monitor polls the session's live cookie jar,
//! publishes any fresh value through a watch channel, and persists it so the
//! next process start does not need an interactive login.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cookies::PARTNER_COOKIE_NAMES;
use crate::session::ConversationSession;
use crate::store::CredentialSink;

/// Logged/printed secret values are truncated to this many characters.
pub const SECRET_PREVIEW_LEN: usize = 32;

/// Tuning for the rotation monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Pause between cookie-jar checks.
    pub interval: Duration,
    /// Number of heartbeat dots per output line. `1` yields one line per
    /// tick; higher values batch them.
    pub heartbeat_line_wrap: usize,
    /// Whether to emit heartbeat dots at all.
    pub heartbeat: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            heartbeat_line_wrap: 50,
            heartbeat: true,
        }
    }
}

/// Truncated prefix of a secret, safe to print.
pub fn secret_preview(value: &str) -> String {
    value.chars().take(SECRET_PREVIEW_LEN).collect()
}

/// Operator-facing progress output: dots while idle, one line per rotation.
struct Heartbeat {
    enabled: bool,
    line_wrap: usize,
    dots: usize,
}

impl Heartbeat {
    fn new(config: &MonitorConfig) -> Self {
        Self {
            enabled: config.heartbeat,
            line_wrap: config.heartbeat_line_wrap.max(1),
            dots: 0,
        }
    }

    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        let mut out = std::io::stdout();
        let _ = write!(out, ".");
        self.dots += 1;
        if self.dots >= self.line_wrap {
            let _ = writeln!(out);
            self.dots = 0;
        }
        let _ = out.flush();
    }

    fn rotation(&mut self, value: &str) {
        if self.enabled {
            let mut out = std::io::stdout();
            let _ = writeln!(
                out,
                "\n[auto-save] partner token rotated: {}…",
                secret_preview(value)
            );
            let _ = out.flush();
        }
        self.dots = 0;
    }
}

/// The polling loop. Runs until the stop signal fires; a tick that is
/// mid-check finishes (including its store write) before the task exits.
pub(crate) async fn run(
    session: Arc<dyn ConversationSession>,
    sink: Arc<dyn CredentialSink>,
    config: MonitorConfig,
    value_tx: watch::Sender<Option<String>>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut last: Option<String> = value_tx.borrow().clone();
    // A value whose store write failed; retried on subsequent ticks until a
    // write lands or a newer value supersedes it.
    let mut pending_persist: Option<String> = None;
    let mut heartbeat = Heartbeat::new(&config);

    info!(interval = ?config.interval, "rotation monitor started");

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A send of `true` or a dropped sender both mean stop.
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = tokio::time::sleep(config.interval) => {}
        }

        let jar = match session.live_cookies() {
            Ok(jar) => jar,
            Err(e) => {
                // Session not ready or jar momentarily unreadable: treat as
                // "no change this tick", never as fatal.
                debug!(error = %e, "live cookie jar unavailable this tick");
                heartbeat.tick();
                continue;
            }
        };

        match jar.select(PARTNER_COOKIE_NAMES) {
            Some(current) if last.as_deref() != Some(current) => {
                let fresh = current.to_string();
                // Order matters: advance in-process state and publish to
                // readers before touching the store, so a failed write only
                // delays persistence, never freshness.
                last = Some(fresh.clone());
                let _ = value_tx.send(Some(fresh.clone()));
                pending_persist = Some(fresh.clone());
                flush_pending(&mut pending_persist, sink.as_ref());
                info!(preview = %secret_preview(&fresh), "partner token rotated");
                heartbeat.rotation(&fresh);
            }
            _ => {
                flush_pending(&mut pending_persist, sink.as_ref());
                heartbeat.tick();
            }
        }
    }

    info!("rotation monitor stopped");
}

fn flush_pending(pending: &mut Option<String>, sink: &dyn CredentialSink) {
    if let Some(value) = pending.as_deref() {
        match sink.persist_partner(value) {
            Ok(()) => *pending = None,
            Err(e) => {
                warn!(error = %e, "failed to persist rotated token; will retry next tick");
            }
        }
    }
}
