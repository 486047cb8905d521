use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::Role;
use crate::security;

use super::Snapshot;

/// A login identity. Holds a credential hash, an external identity key, or both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub credential_hash: Option<String>,
    #[serde(default)]
    pub external_key: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub email: String,
    pub credential_hash: Option<String>,
    pub external_key: Option<String>,
    pub role: Role,
}

pub fn normalize_email(email: &str) -> String { email.trim().to_lowercase() }

pub trait AccountStore: Send + Sync {
    fn find_by_id(&self, id: &str) -> AppResult<Option<Account>>;
    fn find_by_email(&self, email: &str) -> AppResult<Option<Account>>;
    fn find_by_external_key(&self, key: &str) -> AppResult<Option<Account>>;
    /// Fails with `DuplicateEmail` when the (normalized) email is taken.
    fn create(&self, new: NewAccount) -> AppResult<Account>;
    /// Attach `key` to the account. Re-attaching the same key is a no-op.
    fn link_external_key(&self, id: &str, key: &str) -> AppResult<Account>;

    /// Account for `email` only when it has a credential hash matching `plaintext`.
    fn verify_credential(&self, email: &str, plaintext: &str) -> AppResult<Option<Account>> {
        let found = self.find_by_email(email)?;
        match found.as_ref().and_then(|a| a.credential_hash.as_deref()) {
            Some(hash) => Ok(found.clone().filter(|_| security::verify_password(hash, plaintext))),
            None => {
                security::verify_against_dummy(plaintext);
                Ok(None)
            }
        }
    }
}

#[derive(Default)]
struct AccountTable {
    rows: HashMap<String, Account>,
    by_email: HashMap<String, String>,
    by_external: HashMap<String, String>,
}

impl AccountTable {
    fn index(&mut self, a: &Account) {
        self.by_email.insert(normalize_email(&a.email), a.id.clone());
        if let Some(k) = &a.external_key { self.by_external.insert(k.clone(), a.id.clone()); }
    }

    fn sorted_rows(&self) -> Vec<Account> {
        let mut v: Vec<Account> = self.rows.values().cloned().collect();
        v.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        v
    }
}

pub struct LocalAccountStore {
    table: RwLock<AccountTable>,
    snapshot: Snapshot,
}

impl LocalAccountStore {
    pub fn in_memory() -> Self {
        Self { table: RwLock::new(AccountTable::default()), snapshot: Snapshot::memory() }
    }

    /// Open (or create) `accounts.json` under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let snapshot = Snapshot::file(dir, "accounts.json")?;
        let mut table = AccountTable::default();
        for a in snapshot.load::<Account>()? {
            let email = normalize_email(&a.email);
            if table.by_email.contains_key(&email) {
                anyhow::bail!("accounts.json holds duplicate email '{}'", email);
            }
            if let Some(k) = &a.external_key {
                if table.by_external.contains_key(k) { anyhow::bail!("accounts.json holds duplicate external key"); }
            }
            table.index(&a);
            table.rows.insert(a.id.clone(), a);
        }
        info!(target: "regdesk::storage", "account store opened with {} accounts", table.rows.len());
        Ok(Self { table: RwLock::new(table), snapshot })
    }

    pub fn len(&self) -> usize { self.table.read().rows.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn persist(&self, table: &AccountTable) -> AppResult<()> {
        self.snapshot.save(&table.sorted_rows()).map_err(AppError::from)
    }
}

impl AccountStore for LocalAccountStore {
    fn find_by_id(&self, id: &str) -> AppResult<Option<Account>> {
        Ok(self.table.read().rows.get(id).cloned())
    }

    fn find_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        let t = self.table.read();
        Ok(t.by_email.get(&normalize_email(email)).and_then(|id| t.rows.get(id)).cloned())
    }

    fn find_by_external_key(&self, key: &str) -> AppResult<Option<Account>> {
        let t = self.table.read();
        Ok(t.by_external.get(key).and_then(|id| t.rows.get(id)).cloned())
    }

    fn create(&self, new: NewAccount) -> AppResult<Account> {
        if new.credential_hash.is_none() && new.external_key.is_none() {
            return Err(AppError::internal("account needs a credential hash or an external identity key"));
        }
        let email = normalize_email(&new.email);
        let mut t = self.table.write();
        if t.by_email.contains_key(&email) {
            return Err(AppError::DuplicateEmail(email));
        }
        if let Some(k) = &new.external_key {
            if t.by_external.contains_key(k) {
                return Err(AppError::external("external identity is already linked to another account"));
            }
        }
        let account = Account {
            id: uuid::Uuid::new_v4().to_string(),
            name: new.name.trim().to_string(),
            email,
            credential_hash: new.credential_hash,
            external_key: new.external_key,
            role: new.role,
            created_at: Utc::now(),
        };
        t.index(&account);
        t.rows.insert(account.id.clone(), account.clone());
        if let Err(e) = self.persist(&t) {
            t.rows.remove(&account.id);
            t.by_email.remove(&account.email);
            if let Some(k) = &account.external_key { t.by_external.remove(k); }
            return Err(e);
        }
        Ok(account)
    }

    fn link_external_key(&self, id: &str, key: &str) -> AppResult<Account> {
        let mut t = self.table.write();
        let Some(current) = t.rows.get(id).cloned() else {
            return Err(AppError::not_found(format!("account '{}' not found", id)));
        };
        match current.external_key.as_deref() {
            Some(k) if k == key => return Ok(current),
            Some(_) => return Err(AppError::external("account is already linked to a different external identity")),
            None => {}
        }
        if t.by_external.get(key).is_some_and(|owner| owner != id) {
            return Err(AppError::external("external identity is already linked to another account"));
        }
        let mut updated = current.clone();
        updated.external_key = Some(key.to_string());
        t.by_external.insert(key.to_string(), id.to_string());
        t.rows.insert(id.to_string(), updated.clone());
        if let Err(e) = self.persist(&t) {
            t.by_external.remove(key);
            t.rows.insert(id.to_string(), current);
            return Err(e);
        }
        Ok(updated)
    }
}
