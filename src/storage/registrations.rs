use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::registration::RegistrationFields;

use super::Snapshot;

/// A stored registration. `owner` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub owner: String,
    #[serde(flatten)]
    pub fields: RegistrationFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub trait RegistrationStore: Send + Sync {
    /// Validate and insert. Fails with `DuplicateRegistrationNumber` on a taken number.
    fn create(&self, owner: &str, fields: RegistrationFields) -> AppResult<Registration>;
    fn find_by_id(&self, id: &str) -> AppResult<Option<Registration>>;
    /// Newest first.
    fn find_by_owner(&self, owner: &str) -> AppResult<Vec<Registration>>;
    /// Newest first.
    fn find_all(&self) -> AppResult<Vec<Registration>>;
    /// Replace every field of `id`; owner and creation time are kept. When
    /// `expected_number` is given, the stored number must still equal it at
    /// write time and `fields` must keep it, else `ImmutableField("regNumber")`.
    fn update(&self, id: &str, expected_number: Option<&str>, fields: RegistrationFields) -> AppResult<Registration>;
    fn delete(&self, id: &str) -> AppResult<()>;
}

struct Row {
    seq: u64,
    reg: Registration,
}

#[derive(Default)]
struct RegistrationTable {
    rows: HashMap<String, Row>,
    by_number: HashMap<String, String>,
    next_seq: u64,
}

impl RegistrationTable {
    fn push(&mut self, reg: Registration) {
        self.by_number.insert(reg.fields.registration_number.clone(), reg.id.clone());
        let seq = self.next_seq;
        self.next_seq += 1;
        self.rows.insert(reg.id.clone(), Row { seq, reg });
    }

    fn newest_first<'a>(&'a self, keep: impl Fn(&Registration) -> bool) -> Vec<Registration> {
        let mut v: Vec<&'a Row> = self.rows.values().filter(|r| keep(&r.reg)).collect();
        v.sort_by(|a, b| b.reg.created_at.cmp(&a.reg.created_at).then_with(|| b.seq.cmp(&a.seq)));
        v.into_iter().map(|r| r.reg.clone()).collect()
    }

    fn insertion_order(&self) -> Vec<Registration> {
        let mut v: Vec<&Row> = self.rows.values().collect();
        v.sort_by_key(|r| r.seq);
        v.into_iter().map(|r| r.reg.clone()).collect()
    }
}

pub struct LocalRegistrationStore {
    table: RwLock<RegistrationTable>,
    snapshot: Snapshot,
}

impl LocalRegistrationStore {
    pub fn in_memory() -> Self {
        Self { table: RwLock::new(RegistrationTable::default()), snapshot: Snapshot::memory() }
    }

    /// Open (or create) `registrations.json` under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> anyhow::Result<Self> {
        let snapshot = Snapshot::file(dir, "registrations.json")?;
        let mut table = RegistrationTable::default();
        for r in snapshot.load::<Registration>()? {
            if table.by_number.contains_key(&r.fields.registration_number) {
                anyhow::bail!("registrations.json holds duplicate regNumber '{}'", r.fields.registration_number);
            }
            table.push(r);
        }
        info!(target: "regdesk::storage", "registration store opened with {} registrations", table.rows.len());
        Ok(Self { table: RwLock::new(table), snapshot })
    }

    pub fn len(&self) -> usize { self.table.read().rows.len() }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    fn persist(&self, table: &RegistrationTable) -> AppResult<()> {
        self.snapshot.save(&table.insertion_order()).map_err(AppError::from)
    }
}

impl RegistrationStore for LocalRegistrationStore {
    fn create(&self, owner: &str, fields: RegistrationFields) -> AppResult<Registration> {
        let now = Utc::now();
        fields.validate(now)?;
        let mut t = self.table.write();
        if t.by_number.contains_key(&fields.registration_number) {
            return Err(AppError::DuplicateRegistrationNumber(fields.registration_number));
        }
        let reg = Registration {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.to_string(),
            fields,
            created_at: now,
            updated_at: now,
        };
        t.push(reg.clone());
        if let Err(e) = self.persist(&t) {
            t.rows.remove(&reg.id);
            t.by_number.remove(&reg.fields.registration_number);
            return Err(e);
        }
        Ok(reg)
    }

    fn find_by_id(&self, id: &str) -> AppResult<Option<Registration>> {
        Ok(self.table.read().rows.get(id).map(|r| r.reg.clone()))
    }

    fn find_by_owner(&self, owner: &str) -> AppResult<Vec<Registration>> {
        Ok(self.table.read().newest_first(|r| r.owner == owner))
    }

    fn find_all(&self) -> AppResult<Vec<Registration>> {
        Ok(self.table.read().newest_first(|_| true))
    }

    fn update(&self, id: &str, expected_number: Option<&str>, fields: RegistrationFields) -> AppResult<Registration> {
        let now = Utc::now();
        fields.validate(now)?;
        let mut t = self.table.write();
        let Some(previous) = t.rows.get(id).map(|r| r.reg.clone()) else {
            return Err(AppError::not_found("Registration not found"));
        };
        if let Some(expected) = expected_number {
            let current = previous.fields.registration_number.as_str();
            if current != expected || fields.registration_number != current {
                return Err(AppError::ImmutableField("regNumber".into()));
            }
        }
        let new_number = fields.registration_number.clone();
        if t.by_number.get(&new_number).is_some_and(|holder| holder != id) {
            return Err(AppError::DuplicateRegistrationNumber(new_number));
        }
        let updated = Registration { fields, updated_at: now, ..previous.clone() };
        let number_changed = new_number != previous.fields.registration_number;
        if number_changed {
            t.by_number.remove(&previous.fields.registration_number);
            t.by_number.insert(new_number.clone(), id.to_string());
        }
        if let Some(row) = t.rows.get_mut(id) { row.reg = updated.clone(); }
        if let Err(e) = self.persist(&t) {
            if number_changed {
                t.by_number.remove(&new_number);
                t.by_number.insert(previous.fields.registration_number.clone(), id.to_string());
            }
            if let Some(row) = t.rows.get_mut(id) { row.reg = previous; }
            return Err(e);
        }
        Ok(updated)
    }

    fn delete(&self, id: &str) -> AppResult<()> {
        let mut t = self.table.write();
        let Some(row) = t.rows.remove(id) else {
            return Err(AppError::not_found("Registration not found"));
        };
        t.by_number.remove(&row.reg.fields.registration_number);
        if let Err(e) = self.persist(&t) {
            t.by_number.insert(row.reg.fields.registration_number.clone(), id.to_string());
            t.rows.insert(id.to_string(), row);
            return Err(e);
        }
        Ok(())
    }
}
