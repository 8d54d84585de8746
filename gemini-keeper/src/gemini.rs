//! Reqwest-backed session against the Gemini web app.
//!
//! The web app authenticates purely through the `__Secure-1PSID` cookie pair.
//! Responses carry `Set-Cookie` rotations which land in the shared jar, and
//! an optional keep-alive task pings Google's rotation endpoint so the
//! partner token stays fresh even while the conversation is idle. The
//! rotation monitor observes all of this through [`ConversationSession::live_cookies`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cookies::CookieJar;
use crate::errors::{KeeperError, Result};
use crate::session::ConversationSession;

const GEMINI_APP_URL: &str = "https://gemini.google.com/app";
const STREAM_GENERATE_URL: &str =
    "https://gemini.google.com/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate";
const ROTATE_COOKIES_URL: &str = "https://accounts.google.com/RotateCookies";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Connection options for [`GeminiSession::initialize`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Proxy endpoint (e.g. `http://127.0.0.1:15665`); direct when unset.
    pub proxy: Option<String>,
    /// Connection-establishment timeout.
    pub connect_timeout: Duration,
    /// Interval for the background keep-alive/rotation ping; `None` disables it.
    pub keep_alive: Option<Duration>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(30),
            keep_alive: Some(Duration::from_secs(540)),
        }
    }
}

/// An authenticated session with the Gemini web app.
pub struct GeminiSession {
    http: reqwest::Client,
    jar: Arc<Jar>,
    access_token: String,
    keep_alive_task: Mutex<Option<JoinHandle<()>>>,
}

impl GeminiSession {
    /// Opens a session from the identity/partner cookie pair. Fails when the
    /// app page does not yield an access token, which means the cookies no
    /// longer authenticate. A missing partner token is allowed but degraded:
    /// some backend calls may be rejected until one is acquired.
    pub async fn initialize(
        identity: &str,
        partner: Option<&str>,
        config: GeminiConfig,
    ) -> Result<Self> {
        if identity.is_empty() {
            return Err(KeeperError::Config(
                "identity cookie (SECURE_1PSID) is empty".into(),
            ));
        }
        if partner.is_none() {
            warn!("no partner token supplied; continuing with degraded credentials");
        }

        let origin = Url::parse("https://gemini.google.com/")
            .map_err(|e| KeeperError::Session(e.to_string()))?;
        let jar = Arc::new(Jar::default());
        jar.add_cookie_str(
            &format!("__Secure-1PSID={identity}; Domain=.google.com; Secure"),
            &origin,
        );
        if let Some(partner) = partner {
            jar.add_cookie_str(
                &format!("__Secure-1PSIDTS={partner}; Domain=.google.com; Secure"),
                &origin,
            );
        }

        let mut builder = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .connect_timeout(config.connect_timeout)
            .user_agent(USER_AGENT);
        if let Some(proxy) = &config.proxy {
            builder = builder
                .proxy(reqwest::Proxy::all(proxy).map_err(|e| KeeperError::Session(e.to_string()))?);
        }
        let http = builder
            .build()
            .map_err(|e| KeeperError::Session(e.to_string()))?;

        let body = http
            .get(GEMINI_APP_URL)
            .send()
            .await
            .map_err(|e| KeeperError::Session(format!("app page request failed: {e}")))?
            .text()
            .await
            .map_err(|e| KeeperError::Session(format!("app page unreadable: {e}")))?;

        let access_token = scrape_access_token(&body).ok_or_else(|| {
            KeeperError::Session(
                "no access token in app page; cookies are likely expired or invalid".into(),
            )
        })?;
        info!("Gemini session initialized");

        let session = Self {
            http,
            jar,
            access_token,
            keep_alive_task: Mutex::new(None),
        };
        if let Some(interval) = config.keep_alive {
            session.spawn_keep_alive(interval);
        }
        Ok(session)
    }

    /// Periodically asks Google to rotate the partner token. Failures are
    /// transient by definition; the next tick retries.
    fn spawn_keep_alive(&self, interval: Duration) {
        let http = self.http.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let result = http
                    .post(ROTATE_COOKIES_URL)
                    .json(&serde_json::json!([0, "-0000000000000000000"]))
                    .send()
                    .await;
                match result {
                    Ok(resp) => debug!(status = %resp.status(), "keep-alive rotation ping"),
                    Err(e) => debug!(error = %e, "keep-alive rotation ping failed"),
                }
            }
        });
        *self.keep_alive_task.lock().unwrap() = Some(task);
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        let inner = serde_json::to_string(&serde_json::json!([[prompt], null, null]))
            .map_err(|e| KeeperError::Session(e.to_string()))?;
        let f_req = serde_json::to_string(&serde_json::json!([null, inner]))
            .map_err(|e| KeeperError::Session(e.to_string()))?;

        let response = self
            .http
            .post(STREAM_GENERATE_URL)
            .query(&[("rt", "c")])
            .form(&[("at", self.access_token.as_str()), ("f.req", f_req.as_str())])
            .send()
            .await
            .map_err(|e| KeeperError::Session(format!("generate request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeeperError::Session(format!(
                "generate request rejected with status {status}"
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| KeeperError::Session(e.to_string()))?;
        parse_reply(&body)
            .ok_or_else(|| KeeperError::Session("no candidate text in response envelope".into()))
    }

    fn jar_snapshot(&self) -> Result<CookieJar> {
        let mut snapshot = CookieJar::new();
        for url in ["https://gemini.google.com/", "https://accounts.google.com/"] {
            let url = Url::parse(url).map_err(|e| KeeperError::Session(e.to_string()))?;
            if let Some(header) = self.jar.cookies(&url) {
                let header = header
                    .to_str()
                    .map_err(|e| KeeperError::Session(e.to_string()))?
                    .to_string();
                for pair in header.split("; ") {
                    if let Some((name, value)) = pair.split_once('=') {
                        snapshot.insert(name, value);
                    }
                }
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl ConversationSession for GeminiSession {
    async fn send(&self, prompt: &str) -> Result<String> {
        self.generate(prompt).await
    }

    fn live_cookies(&self) -> Result<CookieJar> {
        self.jar_snapshot()
    }

    async fn close(&self) -> Result<()> {
        if let Some(task) = self.keep_alive_task.lock().unwrap().take() {
            task.abort();
        }
        info!("Gemini session closed");
        Ok(())
    }
}

/// Pulls the `SNlM0e` access token out of the app page markup.
fn scrape_access_token(page: &str) -> Option<String> {
    let marker = "\"SNlM0e\":\"";
    let start = page.find(marker)? + marker.len();
    let end = page[start..].find('"')?;
    let token = &page[start..start + end];
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Digs the first candidate's text out of the batchexecute envelope: a
/// `)]}'`-prefixed stream of length-delimited JSON chunks, where chunk
/// `[0][2]` is itself a JSON document holding candidates at index 4.
fn parse_reply(body: &str) -> Option<String> {
    for line in body.lines() {
        let Ok(chunk) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        let Some(payload) = chunk.get(0).and_then(|c| c.get(2)).and_then(|p| p.as_str()) else {
            continue;
        };
        let Ok(inner) = serde_json::from_str::<serde_json::Value>(payload) else {
            continue;
        };
        if let Some(text) = inner
            .get(4)
            .and_then(|candidates| candidates.get(0))
            .and_then(|candidate| candidate.get(1))
            .and_then(|texts| texts.get(0))
            .and_then(|t| t.as_str())
        {
            return Some(text.to_string());
        }
    }
    None
}
