//!
//! regdesk storage module
//! ----------------------
//! Document collections for accounts and registrations. Each collection is held
//! in memory behind a `parking_lot::RwLock` and, when opened on a data folder,
//! mirrored to a JSON snapshot file (`accounts.json`, `registrations.json`).
//!
//! Key responsibilities:
//! - Uniqueness constraints (account email, external identity key, registration
//!   number) checked inside the same write-lock critical section as the write,
//!   so concurrent conflicting writers cannot both succeed.
//! - All-or-nothing mutations: if the snapshot cannot be written, the in-memory
//!   change is rolled back and the caller sees an internal error.
//!
//! The service layer only sees the `AccountStore` and `RegistrationStore`
//! traits; `LocalAccountStore` / `LocalRegistrationStore` are the shipped
//! implementations.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

mod accounts;
mod registrations;

pub use accounts::{Account, AccountStore, LocalAccountStore, NewAccount, normalize_email};
pub use registrations::{LocalRegistrationStore, Registration, RegistrationStore};

/// Optional on-disk mirror of one collection.
#[derive(Debug, Clone, Default)]
pub(crate) struct Snapshot {
    path: Option<PathBuf>,
}

impl Snapshot {
    pub(crate) fn memory() -> Self { Self { path: None } }

    pub(crate) fn file<P: AsRef<Path>>(dir: P, name: &str) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("creating data folder {}", dir.display()))?;
        Ok(Self { path: Some(dir.join(name)) })
    }

    pub(crate) fn load<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        let Some(path) = &self.path else { return Ok(Vec::new()); };
        if !path.exists() { return Ok(Vec::new()); }
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        if text.trim().is_empty() { return Ok(Vec::new()); }
        let rows: Vec<T> = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        debug!(target: "regdesk::storage", "loaded {} rows from {}", rows.len(), path.display());
        Ok(rows)
    }

    /// Replace the snapshot with `rows` via temp file + rename.
    pub(crate) fn save<T: Serialize>(&self, rows: &[T]) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()); };
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(rows)?;
        fs::write(&tmp, body).with_context(|| format!("writing {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        debug!(target: "regdesk::storage", "saved {} rows to {}", rows.len(), path.display());
        Ok(())
    }
}
