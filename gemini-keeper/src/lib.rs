//! Session-cookie lifecycle for the Gemini web client.
//!
//! Two cooperating pieces share one persisted `.env`-style store: a
//! credential harvester that drives a real browser through the Google login
//! flow and extracts the `__Secure-1PSID` cookie pair, and a session keeper
//! that holds those cookies, watches for the server silently rotating the
//! short-lived partner token, and writes each rotation back so the next run
//! never needs an interactive login.

pub mod cookies;
pub mod errors;
pub mod gemini;
pub mod harvester;
pub mod monitor;
pub mod session;
pub mod store;

pub use cookies::{CookieJar, CookieRecord, IDENTITY_COOKIE_NAMES, PARTNER_COOKIE_NAMES};
pub use errors::{KeeperError, Result};
pub use gemini::{GeminiConfig, GeminiSession};
pub use harvester::{ChromeBrowser, HarvestOutcome, Harvester, LoginBrowser, LOGIN_URL};
pub use monitor::{secret_preview, MonitorConfig, SECRET_PREVIEW_LEN};
pub use session::{ConversationSession, SessionKeeper};
pub use store::{
    CredentialSink, EnvStore, StoredCredentials, UpsertOutcome, UpsertPolicy, IDENTITY_KEY,
    PARTNER_KEY,
};
