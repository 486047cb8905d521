//! Stateless session tokens: HS256 JWTs carrying `{ user: { id, role } }`.
//! Nothing is stored server-side, so a token stays valid until it expires.

use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::storage::Account;
use crate::tprintln;

use super::principal::Principal;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user: Principal,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct SessionToken {
    pub token: String,
    pub principal: Principal,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Tampered, malformed and expired tokens all collapse into this one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("token is not valid")]
pub struct InvalidToken;

impl From<InvalidToken> for AppError {
    fn from(e: InvalidToken) -> Self { AppError::unauthenticated(e.to_string()) }
}

pub struct SessionIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl SessionIssuer {
    pub const DEFAULT_TTL_SECS: i64 = 60 * 60;

    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration { self.ttl }

    pub fn issue(&self, account: &Account) -> AppResult<SessionToken> {
        self.issue_at(Principal::new(account.id.clone(), account.role), Utc::now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(&self, principal: Principal, now: DateTime<Utc>) -> AppResult<SessionToken> {
        let issued_at = truncate_to_secs(now);
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| AppError::internal(format!("token expiry out of range for ttl {}s", self.ttl.num_seconds())))?;
        let claims = Claims { user: principal.clone(), iat: issued_at.timestamp(), exp: expires_at.timestamp() };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AppError::internal(format!("token signing failed: {}", e)))?;
        tprintln!("session.issue user={} role={} ttl_secs={}", principal.id, principal.role, self.ttl.num_seconds());
        Ok(SessionToken { token, principal, issued_at, expires_at })
    }

    pub fn verify(&self, token: &str) -> Result<Principal, InvalidToken> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(data.claims.user),
            Err(e) => {
                tracing::debug!(target: "regdesk::auth", reason = %e, "session token rejected");
                Err(InvalidToken)
            }
        }
    }
}

fn truncate_to_secs(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(t.timestamp(), 0).single().unwrap_or(t)
}
