//! The persisted credential store: a flat, line-oriented `KEY=VALUE` file.
//!
//! The store is shared between the harvester (writes after login) and the
//! session keeper (reads at startup, writes on rotation). Writes are
//! read-modify-write over the whole file: the target key's line is replaced
//! in place and every other line passes through untouched, so operator
//! edits and unrecognized keys survive every rotation.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::Result;

/// Store key for the long-lived identity cookie.
pub const IDENTITY_KEY: &str = "SECURE_1PSID";

/// Store key for the rotating partner token. The key name is kept even when
/// the underlying cookie is the newer `-1PSIDCC` variant, so downstream
/// consumers only ever look in one place.
pub const PARTNER_KEY: &str = "SECURE_1PSIDTS";

/// What to do when the target key has no existing line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertPolicy {
    /// Append a `key=value` line when the key is absent.
    #[default]
    CreateIfAbsent,
    /// Leave an existing file untouched when the key is absent; only
    /// replace lines that are already there. A fresh (nonexistent) file is
    /// still created.
    RequireExisting,
}

/// How an upsert resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// An existing `key=` line was rewritten.
    Replaced,
    /// No line existed; a new one was appended.
    Appended,
    /// `RequireExisting` found no line to replace; nothing was written.
    Skipped,
}

/// Credentials read back from the store at startup.
#[derive(Debug, Clone, Default)]
pub struct StoredCredentials {
    pub identity: Option<String>,
    pub partner: Option<String>,
}

/// Anything the rotation monitor can persist a fresh partner value into.
///
/// The monitor only needs this one operation; keeping it behind a trait lets
/// tests count persist calls without touching the filesystem.
pub trait CredentialSink: Send + Sync {
    fn persist_partner(&self, value: &str) -> Result<()>;
}

/// The on-disk `.env`-style store.
#[derive(Debug, Clone)]
pub struct EnvStore {
    path: PathBuf,
}

impl EnvStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the recognized credential pair out of the store. A missing file
    /// yields empty credentials rather than an error; startup decides
    /// whether that is fatal.
    pub fn load(&self) -> Result<StoredCredentials> {
        let mut creds = StoredCredentials::default();
        if !self.path.exists() {
            return Ok(creds);
        }
        let content = fs::read_to_string(&self.path)?;
        for line in content.lines() {
            if let Some(value) = line.strip_prefix(&format!("{IDENTITY_KEY}=")) {
                creds.identity = Some(value.to_string());
            } else if let Some(value) = line.strip_prefix(&format!("{PARTNER_KEY}=")) {
                creds.partner = Some(value.to_string());
            }
        }
        Ok(creds)
    }

    /// Idempotently sets `key=value`, preserving all other lines and their
    /// order. The file is rewritten in full and swapped into place with a
    /// rename, so a crash mid-write never leaves a torn line.
    pub fn upsert(&self, key: &str, value: &str, policy: UpsertPolicy) -> Result<UpsertOutcome> {
        let prefix = format!("{key}=");
        let replacement = format!("{key}={value}");

        let mut lines: Vec<String> = Vec::new();
        let mut replaced = false;
        if self.path.exists() {
            for line in fs::read_to_string(&self.path)?.lines() {
                if line.starts_with(&prefix) {
                    // First match is rewritten in place; any duplicates are
                    // dropped so the key appears exactly once afterwards.
                    if !replaced {
                        lines.push(replacement.clone());
                        replaced = true;
                    }
                } else {
                    lines.push(line.to_string());
                }
            }
        }

        let outcome = if replaced {
            UpsertOutcome::Replaced
        } else if policy == UpsertPolicy::RequireExisting && self.path.exists() {
            debug!(key, path = %self.path.display(), "key absent, policy forbids creating it");
            return Ok(UpsertOutcome::Skipped);
        } else {
            lines.push(replacement);
            UpsertOutcome::Appended
        };

        self.write_lines(&lines)?;
        debug!(key, outcome = ?outcome, path = %self.path.display(), "store upsert");
        Ok(outcome)
    }

    fn write_lines(&self, lines: &[String]) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            for line in lines {
                writeln!(f, "{line}")?;
            }
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialSink for EnvStore {
    fn persist_partner(&self, value: &str) -> Result<()> {
        // The poller must be able to add the rotation key on a fresh store,
        // so its writes are always permissive.
        self.upsert(PARTNER_KEY, value, UpsertPolicy::CreateIfAbsent)?;
        Ok(())
    }
}
