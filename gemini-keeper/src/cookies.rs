//! Cookie jar snapshots and credential-name precedence.
//!
//! Google has migrated the companion token's cookie name over time (legacy
//! `-1PSIDTS` vs. current `-1PSIDCC`, each with a prefixed and an unprefixed
//! spelling). Callers pass an ordered candidate list so the precedence can
//! evolve without touching lookup sites.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Acceptable names for the long-lived identity cookie, in precedence order.
pub const IDENTITY_COOKIE_NAMES: &[&str] = &["__Secure-1PSID", "Secure_1PSID"];

/// Acceptable names for the short-lived partner token, in precedence order.
/// Legacy TS spellings are checked before the newer CC spellings.
pub const PARTNER_COOKIE_NAMES: &[&str] = &[
    "__Secure-1PSIDTS",
    "Secure_1PSIDTS",
    "__Secure-1PSIDCC",
    "Secure_1PSIDCC",
];

/// One cookie as reported by the login browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
}

/// A read-only snapshot of cookie name/value pairs.
///
/// Insertion order is irrelevant; lookups go by name only. Snapshots are
/// taken on demand from the live browser or session jar, never held across
/// ticks.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Returns the value bound to the first candidate name present, checking
    /// strictly in the caller-supplied order. Absence is a normal outcome.
    pub fn select(&self, candidates: &[&str]) -> Option<&str> {
        candidates.iter().find_map(|name| self.get(name))
    }

    /// All cookie names in the snapshot, sorted for stable display.
    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.cookies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl FromIterator<(String, String)> for CookieJar {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            cookies: iter.into_iter().collect(),
        }
    }
}

impl From<&[CookieRecord]> for CookieJar {
    fn from(records: &[CookieRecord]) -> Self {
        records
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }
}
