//! Registration operations. Each one resolves its target, asks the
//! authorization engine, applies the mutation guards and only then touches the store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::identity::{authorize, guard_update, Decision, Operation, Principal, Target};
use crate::storage::{AccountStore, Registration, RegistrationStore};

use super::fields::RegistrationInput;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerSummary {
    pub id: String,
    pub name: String,
    pub email: String,
}

/// A registration as returned by listings; admins also see who owns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedRegistration {
    #[serde(flatten)]
    pub registration: Registration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_account: Option<OwnerSummary>,
}

pub struct RegistrationService {
    registrations: Arc<dyn RegistrationStore>,
    accounts: Arc<dyn AccountStore>,
}

impl RegistrationService {
    pub fn new(registrations: Arc<dyn RegistrationStore>, accounts: Arc<dyn AccountStore>) -> Self {
        Self { registrations, accounts }
    }

    fn load<'a>(&self, id: &str, slot: &'a mut Option<Registration>) -> AppResult<Target<'a>> {
        *slot = self.registrations.find_by_id(id)?;
        Ok(match slot.as_ref() {
            Some(r) => Target::Record(r),
            None => Target::Missing,
        })
    }

    pub fn create(&self, principal: &Principal, input: RegistrationInput) -> AppResult<Registration> {
        authorize(principal, Operation::Create, Target::Collection)?;
        let fields = input.into_fields(None, Utc::now())?;
        let reg = self.registrations.create(&principal.id, fields)?;
        info!(target: "regdesk::registrations", id = %reg.id, owner = %reg.owner, "registration created");
        Ok(reg)
    }

    /// Everything for admins; a user's own records otherwise.
    pub fn list(&self, principal: &Principal) -> AppResult<Vec<ListedRegistration>> {
        match authorize(principal, Operation::ReadAll, Target::Collection)? {
            Decision::Allow => {
                let all = self.registrations.find_all()?;
                self.with_owners(all)
            }
            Decision::Substitute(_) => self.list_own(principal),
        }
    }

    pub fn list_own(&self, principal: &Principal) -> AppResult<Vec<ListedRegistration>> {
        authorize(principal, Operation::ReadOwn, Target::Collection)?;
        Ok(self
            .registrations
            .find_by_owner(&principal.id)?
            .into_iter()
            .map(|registration| ListedRegistration { registration, owner_account: None })
            .collect())
    }

    pub fn get(&self, principal: &Principal, id: &str) -> AppResult<Registration> {
        let mut slot = None;
        let target = self.load(id, &mut slot)?;
        authorize(principal, Operation::ReadOne, target)?;
        slot.ok_or_else(|| AppError::not_found("Registration not found"))
    }

    pub fn update(&self, principal: &Principal, id: &str, input: RegistrationInput) -> AppResult<Registration> {
        let mut slot = None;
        let target = self.load(id, &mut slot)?;
        authorize(principal, Operation::Update, target)?;
        let Some(stored) = slot else { return Err(AppError::not_found("Registration not found")); };
        guard_update(principal, &stored, input.owner.as_deref(), input.submitted_number())?;
        let fields = input.into_fields(Some(&stored.fields.registration_number), Utc::now())?;
        // Non-admins may not renumber; re-checked under the store's write lock.
        let pinned = (!principal.is_admin()).then_some(stored.fields.registration_number.as_str());
        let reg = self.registrations.update(id, pinned, fields)?;
        info!(target: "regdesk::registrations", id = %reg.id, by = %principal.id, "registration updated");
        Ok(reg)
    }

    pub fn delete(&self, principal: &Principal, id: &str) -> AppResult<()> {
        let mut slot = None;
        let target = self.load(id, &mut slot)?;
        authorize(principal, Operation::Delete, target)?;
        self.registrations.delete(id)?;
        info!(target: "regdesk::registrations", id = %id, by = %principal.id, "registration deleted");
        Ok(())
    }

    fn with_owners(&self, regs: Vec<Registration>) -> AppResult<Vec<ListedRegistration>> {
        let mut owners: HashMap<String, Option<OwnerSummary>> = HashMap::new();
        let mut out = Vec::with_capacity(regs.len());
        for registration in regs {
            if !owners.contains_key(&registration.owner) {
                let summary = self.accounts.find_by_id(&registration.owner)?.map(|a| OwnerSummary {
                    id: a.id,
                    name: a.name,
                    email: a.email,
                });
                owners.insert(registration.owner.clone(), summary);
            }
            let owner_account = owners.get(&registration.owner).cloned().flatten();
            out.push(ListedRegistration { registration, owner_account });
        }
        Ok(out)
    }
}
