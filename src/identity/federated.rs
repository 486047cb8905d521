//! Federated sign-in: an external identity assertion (a Google ID token) is
//! verified, mapped to a local account, and exchanged for a regular session token.
//!
//! Resolution order is external key, then email (linking the key), then a new
//! `user` account. Federated signup never creates an admin.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult};
use crate::storage::{Account, AccountStore, NewAccount};

use super::principal::Role;
use super::provider::LoginResponse;
use super::session::SessionIssuer;

/// Identity asserted by a verified external token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: String,
    pub subject: String,
    pub name: String,
    pub email: String,
}

impl ExternalIdentity {
    /// Key stored on the account, namespaced by provider.
    pub fn key(&self) -> String { format!("{}|{}", self.provider, self.subject) }
}

#[async_trait]
pub trait ExternalIdentityVerifier: Send + Sync {
    /// Check signature, audience and expiry. Any failure is `InvalidExternalToken`.
    async fn verify(&self, token: &str) -> AppResult<ExternalIdentity>;
}

pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];
const KEYS_MAX_AGE: Duration = Duration::from_secs(60 * 60);
const KEYS_MIN_REFRESH: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    name: Option<String>,
}

struct CachedKeys {
    set: JwkSet,
    fetched_at: Instant,
}

/// Verifies Google-issued ID tokens against Google's published signing keys.
pub struct GoogleIdTokenVerifier {
    client_id: String,
    jwks_url: String,
    http: reqwest::Client,
    keys: RwLock<Option<CachedKeys>>,
}

impl GoogleIdTokenVerifier {
    pub fn new<S: Into<String>>(client_id: S) -> Self {
        Self::with_jwks_url(client_id, GOOGLE_JWKS_URL)
    }

    pub fn with_jwks_url<S: Into<String>, U: Into<String>>(client_id: S, jwks_url: U) -> Self {
        Self {
            client_id: client_id.into(),
            jwks_url: jwks_url.into(),
            http: reqwest::Client::new(),
            keys: RwLock::new(None),
        }
    }

    fn cached_key(&self, kid: &str) -> Option<(DecodingKey, bool)> {
        let guard = self.keys.read();
        let cached = guard.as_ref()?;
        let fresh = cached.fetched_at.elapsed() < KEYS_MAX_AGE;
        let jwk = cached.set.find(kid)?;
        DecodingKey::from_jwk(jwk).ok().map(|k| (k, fresh))
    }

    fn may_refresh(&self) -> bool {
        match self.keys.read().as_ref() {
            None => true,
            Some(c) => c.fetched_at.elapsed() >= KEYS_MIN_REFRESH,
        }
    }

    async fn refresh_keys(&self) -> AppResult<()> {
        let set: JwkSet = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::internal(format!("fetching Google signing keys: {}", e)))?
            .json()
            .await
            .map_err(|e| AppError::internal(format!("decoding Google signing keys: {}", e)))?;
        debug!(target: "regdesk::auth", keys = set.keys.len(), "refreshed Google signing keys");
        *self.keys.write() = Some(CachedKeys { set, fetched_at: Instant::now() });
        Ok(())
    }

    async fn key_for(&self, kid: &str) -> AppResult<DecodingKey> {
        match self.cached_key(kid) {
            Some((key, true)) => return Ok(key),
            Some((key, false)) if !self.may_refresh() => return Ok(key),
            None if !self.may_refresh() => return Err(AppError::external("Google authentication failed: unknown signing key")),
            _ => {}
        }
        self.refresh_keys().await?;
        self.cached_key(kid)
            .map(|(k, _)| k)
            .ok_or_else(|| AppError::external("Google authentication failed: unknown signing key"))
    }
}

#[async_trait]
impl ExternalIdentityVerifier for GoogleIdTokenVerifier {
    async fn verify(&self, token: &str) -> AppResult<ExternalIdentity> {
        let header = decode_header(token).map_err(|_| AppError::external("Google authentication failed: malformed token"))?;
        if header.alg != Algorithm::RS256 {
            return Err(AppError::external("Google authentication failed: unexpected signing algorithm"));
        }
        let kid = header.kid.ok_or_else(|| AppError::external("Google authentication failed: token has no key id"))?;
        let key = self.key_for(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.client_id.as_str()]);
        validation.set_issuer(&GOOGLE_ISSUERS[..]);
        let claims = decode::<GoogleClaims>(token, &key, &validation)
            .map_err(|e| {
                debug!(target: "regdesk::auth", reason = %e, "Google ID token rejected");
                AppError::external("Google authentication failed: token is not valid")
            })?
            .claims;

        if claims.email_verified == Some(false) {
            return Err(AppError::external("Google authentication failed: email is not verified"));
        }
        let email = claims
            .email
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| AppError::external("Google authentication failed: token carries no email"))?;
        let name = claims.name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| email.clone());
        Ok(ExternalIdentity { provider: "google".into(), subject: claims.sub, name, email })
    }
}

pub struct FederatedLogin {
    accounts: Arc<dyn AccountStore>,
    sm: Arc<SessionIssuer>,
    verifier: Option<Arc<dyn ExternalIdentityVerifier>>,
}

impl FederatedLogin {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        sm: Arc<SessionIssuer>,
        verifier: Option<Arc<dyn ExternalIdentityVerifier>>,
    ) -> Self {
        Self { accounts, sm, verifier }
    }

    pub fn is_enabled(&self) -> bool { self.verifier.is_some() }

    pub async fn authenticate(&self, external_token: &str) -> AppResult<LoginResponse> {
        let Some(verifier) = &self.verifier else {
            return Err(AppError::external("Google sign-in is not configured"));
        };
        let identity = verifier.verify(external_token).await?;
        let account = self.resolve(&identity)?;
        let session = self.sm.issue(&account)?;
        info!(target: "regdesk::auth", account = %account.id, provider = %identity.provider, "federated login ok");
        Ok(LoginResponse { session, account })
    }

    /// Find or create the local account for a verified identity.
    pub fn resolve(&self, identity: &ExternalIdentity) -> AppResult<Account> {
        let key = identity.key();
        if let Some(a) = self.accounts.find_by_external_key(&key)? {
            return Ok(a);
        }
        if let Some(a) = self.accounts.find_by_email(&identity.email)? {
            info!(target: "regdesk::auth", account = %a.id, provider = %identity.provider, "linking external identity to existing account");
            return self.accounts.link_external_key(&a.id, &key);
        }
        let created = self.accounts.create(NewAccount {
            name: identity.name.clone(),
            email: identity.email.clone(),
            credential_hash: None,
            external_key: Some(key.clone()),
            role: Role::User,
        });
        match created {
            Ok(a) => Ok(a),
            // Lost a race with a concurrent first login for the same person.
            Err(AppError::DuplicateEmail(_)) | Err(AppError::InvalidExternalToken(_)) => {
                warn!(target: "regdesk::auth", provider = %identity.provider, "concurrent federated signup, re-resolving");
                if let Some(a) = self.accounts.find_by_external_key(&key)? {
                    return Ok(a);
                }
                match self.accounts.find_by_email(&identity.email)? {
                    Some(a) => self.accounts.link_external_key(&a.id, &key),
                    None => Err(AppError::internal("federated account vanished during signup")),
                }
            }
            Err(e) => Err(e),
        }
    }
}
