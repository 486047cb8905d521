use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{AppError, AppResult, FieldViolation};
use crate::security;
use crate::storage::{Account, AccountStore, NewAccount};

use super::principal::{Principal, Role};
use super::session::{SessionIssuer, SessionToken};

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S+@\S+\.\S+$").expect("email pattern"));

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub session: SessionToken,
    pub account: Account,
}

/// Public account shape. Never carries the credential hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub google_linked: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        Self {
            id: a.id.clone(),
            name: a.name.clone(),
            email: a.email.clone(),
            role: a.role,
            google_linked: a.external_key.is_some(),
            created_at: a.created_at,
        }
    }
}

pub trait AuthProvider: Send + Sync {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse>;
}

pub struct LocalAuthProvider {
    accounts: Arc<dyn AccountStore>,
    sm: Arc<SessionIssuer>,
    allow_admin_signup: bool,
}

impl LocalAuthProvider {
    pub fn new(accounts: Arc<dyn AccountStore>, sm: Arc<SessionIssuer>) -> Self {
        Self { accounts, sm, allow_admin_signup: true }
    }

    pub fn with_admin_signup(mut self, allow: bool) -> Self {
        self.allow_admin_signup = allow;
        self
    }

    /// Create a credential account and sign it in.
    ///
    /// The role is chosen by the caller. Self-service `admin` signups are
    /// accepted unless disabled, and always logged.
    pub fn register(&self, req: &RegisterRequest) -> AppResult<LoginResponse> {
        let mut v = Vec::new();
        if req.name.trim().is_empty() { v.push(FieldViolation::new("name", "is required")); }
        if !EMAIL_RE.is_match(req.email.trim()) { v.push(FieldViolation::new("email", "must be a valid email address")); }
        if req.password.is_empty() { v.push(FieldViolation::new("password", "is required")); }
        let role = match req.role.parse::<Role>() {
            Ok(r) => Some(r),
            Err(_) => { v.push(FieldViolation::new("role", "Invalid role specified")); None }
        };
        let Some(role) = role.filter(|_| v.is_empty()) else {
            return Err(AppError::Validation(v));
        };
        if role.is_admin() && !self.allow_admin_signup {
            return Err(AppError::forbidden("admin accounts cannot be self-registered"));
        }
        // Fast path; the store re-checks atomically on insert.
        if self.accounts.find_by_email(&req.email)?.is_some() {
            return Err(AppError::DuplicateEmail(crate::storage::normalize_email(&req.email)));
        }
        let hash = security::hash_password(&req.password)?;
        let account = self.accounts.create(NewAccount {
            name: req.name.clone(),
            email: req.email.clone(),
            credential_hash: Some(hash),
            external_key: None,
            role,
        })?;
        if role.is_admin() {
            warn!(target: "regdesk::auth", account = %account.id, "self-registered admin account created");
        } else {
            info!(target: "regdesk::auth", account = %account.id, "account registered");
        }
        let session = self.sm.issue(&account)?;
        Ok(LoginResponse { session, account })
    }

    /// The account behind a principal.
    pub fn current(&self, principal: &Principal) -> AppResult<Account> {
        self.accounts
            .find_by_id(&principal.id)?
            .ok_or_else(|| AppError::unauthenticated("account no longer exists"))
    }

    /// Ensure an admin credential account exists for `email`. Returns true when one was created.
    pub fn seed_admin(&self, name: &str, email: &str, password: &str) -> AppResult<bool> {
        if let Some(existing) = self.accounts.find_by_email(email)? {
            if !existing.role.is_admin() {
                warn!(target: "startup", account = %existing.id, "bootstrap admin email belongs to a non-admin account");
            }
            return Ok(false);
        }
        let account = self.accounts.create(NewAccount {
            name: name.to_string(),
            email: email.to_string(),
            credential_hash: Some(security::hash_password(password)?),
            external_key: None,
            role: Role::Admin,
        })?;
        info!(target: "startup", account = %account.id, "bootstrap admin account created");
        Ok(true)
    }
}

impl AuthProvider for LocalAuthProvider {
    fn login(&self, req: &LoginRequest) -> AppResult<LoginResponse> {
        let Some(account) = self.accounts.verify_credential(&req.email, &req.password)? else {
            info!(target: "regdesk::auth", "login rejected");
            return Err(AppError::InvalidCredentials);
        };
        let session = self.sm.issue(&account)?;
        info!(target: "regdesk::auth", account = %account.id, role = %account.role, "login ok");
        Ok(LoginResponse { session, account })
    }
}
