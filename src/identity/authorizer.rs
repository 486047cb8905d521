//! Authorization decisions for registration records.
//!
//! Every route consults `authorize` (and `guard_update` for writes); no caller
//! re-derives role rules on its own. Both functions are pure.

use crate::error::{AppError, AppResult};
use crate::storage::Registration;

use super::principal::{Principal, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    ReadAll,
    ReadOwn,
    ReadOne,
    Update,
    Delete,
}

impl Operation {
    pub fn needs_target(&self) -> bool {
        matches!(self, Operation::ReadOne | Operation::Update | Operation::Delete)
    }

    fn verb(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::ReadAll | Operation::ReadOwn | Operation::ReadOne => "view",
            Operation::Update => "edit",
            Operation::Delete => "delete",
        }
    }
}

/// What the operation is aimed at, as resolved by the caller.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    /// Collection-level operation (create, list).
    Collection,
    /// A record id was given but the store has no such record.
    Missing,
    Record(&'a Registration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Allowed, but only as the narrower operation.
    Substitute(Operation),
}

pub fn authorize(principal: &Principal, op: Operation, target: Target<'_>) -> AppResult<Decision> {
    if op.needs_target() {
        let record = match target {
            Target::Missing => return Err(AppError::not_found("Registration not found")),
            Target::Collection => return Err(AppError::internal(format!("{:?} requires a target record", op))),
            Target::Record(r) => r,
        };
        return match principal.role {
            Role::Admin => Ok(Decision::Allow),
            Role::User if record.owner == principal.id => Ok(Decision::Allow),
            Role::User => Err(AppError::forbidden(format!("Not authorized to {} this registration", op.verb()))),
        };
    }
    match (principal.role, op) {
        (Role::Admin, Operation::ReadAll) => Ok(Decision::Allow),
        (Role::User, Operation::ReadAll) => Ok(Decision::Substitute(Operation::ReadOwn)),
        (_, Operation::Create) | (_, Operation::ReadOwn) => Ok(Decision::Allow),
        (_, other) => Err(AppError::internal(format!("unhandled operation {:?}", other))),
    }
}

/// Field-level guard for an update that `authorize` already allowed.
///
/// `owner` can never be reassigned. Non-admins may not change the registration
/// number, whether or not the new number would be unique.
pub fn guard_update(
    principal: &Principal,
    stored: &Registration,
    submitted_owner: Option<&str>,
    submitted_number: Option<&str>,
) -> AppResult<()> {
    if submitted_owner.is_some_and(|o| o.trim() != stored.owner) {
        return Err(AppError::ImmutableField("owner".into()));
    }
    if !principal.is_admin() && submitted_number.is_some_and(|n| n.trim() != stored.fields.registration_number) {
        return Err(AppError::ImmutableField("regNumber".into()));
    }
    Ok(())
}
