//! Interactive credential harvester.
//!
//! Drives a real (headful) browser to the Gemini login page, waits for the
//! operator to finish logging in, then pulls the identity and partner
//! cookies out of the browser's jar and persists them. The browser itself
//! sits behind the [`LoginBrowser`] seam so tests can substitute a canned
//! cookie jar.

use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{info, warn};

use crate::cookies::{CookieJar, CookieRecord, IDENTITY_COOKIE_NAMES, PARTNER_COOKIE_NAMES};
use crate::errors::{KeeperError, Result};
use crate::store::{EnvStore, UpsertOutcome, UpsertPolicy, IDENTITY_KEY, PARTNER_KEY};

/// Page the operator logs in on.
pub const LOGIN_URL: &str = "https://gemini.google.com/";

/// The browser-automation seam consumed by the harvester.
pub trait LoginBrowser {
    fn navigate(&self, url: &str) -> Result<()>;
    fn read_cookies(&self) -> Result<Vec<CookieRecord>>;
    fn close(self: Box<Self>) -> Result<()>;
}

/// Chromium driven over the DevTools protocol. Synchronous; callers inside
/// a runtime should wrap harvesting in `spawn_blocking`.
pub struct ChromeBrowser {
    browser: Browser,
    tab: Arc<Tab>,
}

impl ChromeBrowser {
    /// Launches a visible browser window, optionally through a proxy.
    pub fn launch(proxy: Option<&str>) -> Result<Self> {
        let options = LaunchOptions::default_builder()
            .headless(false)
            .proxy_server(proxy)
            // Human logins are slow; don't let the idle watchdog kill the
            // browser while the operator is still typing a password.
            .idle_browser_timeout(Duration::from_secs(3600))
            .build()
            .map_err(|e| KeeperError::Browser(e.to_string()))?;
        let browser = Browser::new(options).map_err(|e| KeeperError::Browser(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| KeeperError::Browser(e.to_string()))?;
        Ok(Self { browser, tab })
    }
}

impl LoginBrowser for ChromeBrowser {
    fn navigate(&self, url: &str) -> Result<()> {
        self.tab
            .navigate_to(url)
            .map_err(|e| KeeperError::Browser(e.to_string()))?;
        Ok(())
    }

    fn read_cookies(&self) -> Result<Vec<CookieRecord>> {
        let cookies = self
            .tab
            .get_cookies()
            .map_err(|e| KeeperError::Browser(e.to_string()))?;
        Ok(cookies
            .into_iter()
            .map(|c| CookieRecord {
                name: c.name,
                value: c.value,
                domain: c.domain,
            })
            .collect())
    }

    fn close(self: Box<Self>) -> Result<()> {
        drop(self.tab);
        drop(self.browser);
        Ok(())
    }
}

/// What the harvest found and wrote.
#[derive(Debug)]
pub enum HarvestOutcome {
    /// Identity (and possibly partner) cookies were selected and persisted.
    Saved {
        identity: String,
        partner: Option<String>,
    },
    /// No identity cookie in the jar; nothing was written.
    NoIdentity,
}

/// One harvest run over an already-launched browser.
pub struct Harvester {
    store: EnvStore,
    policy: UpsertPolicy,
}

impl Harvester {
    pub fn new(store: EnvStore, policy: UpsertPolicy) -> Self {
        Self { store, policy }
    }

    /// Navigates to the login page, blocks on `wait_for_login` (the
    /// operator's confirmation), then selects and persists credentials.
    /// Returns the outcome plus every cookie name seen, for diagnostics.
    pub fn run(
        &self,
        browser: Box<dyn LoginBrowser>,
        wait_for_login: impl FnOnce(),
    ) -> Result<(HarvestOutcome, Vec<String>)> {
        browser.navigate(LOGIN_URL)?;
        wait_for_login();

        let records = browser.read_cookies()?;
        let jar = CookieJar::from(records.as_slice());
        let names: Vec<String> = jar.sorted_names().iter().map(|n| n.to_string()).collect();
        info!(cookie_count = jar.len(), "read cookies from browser");
        browser.close()?;

        let Some(identity) = jar.select(IDENTITY_COOKIE_NAMES).map(str::to_string) else {
            warn!("no identity cookie found; is the login complete?");
            return Ok((HarvestOutcome::NoIdentity, names));
        };
        let partner = jar.select(PARTNER_COOKIE_NAMES).map(str::to_string);

        let outcome = self.store.upsert(IDENTITY_KEY, &identity, self.policy)?;
        if outcome == UpsertOutcome::Skipped {
            warn!(key = IDENTITY_KEY, "store policy skipped the identity key");
        }
        match &partner {
            Some(partner) => {
                let outcome = self.store.upsert(PARTNER_KEY, partner, self.policy)?;
                if outcome == UpsertOutcome::Skipped {
                    warn!(key = PARTNER_KEY, "store policy skipped the partner key");
                }
            }
            None => {
                // Degraded: the session can open on the identity cookie
                // alone, but some backend calls will fail until the operator
                // supplies the partner token by hand.
                warn!(
                    "identity cookie found but no PSIDTS/PSIDCC partner; \
                     copy it from DevTools > Application > Cookies if needed"
                );
            }
        }

        info!(path = %self.store.path().display(), "credentials persisted");
        Ok((HarvestOutcome::Saved { identity, partner }, names))
    }
}
