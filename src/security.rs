//! Credential hashing. Argon2id PHC strings with a fresh 16-byte salt per hash.

use anyhow::{Result, anyhow};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use once_cell::sync::Lazy;
use password_hash::{SaltString, PasswordHash};

// Verified against when an email has no credential so that the unknown-account
// path costs the same as a wrong password.
static DUMMY_HASH: Lazy<Option<String>> = Lazy::new(|| hash_password("regdesk-timing-equalizer").ok());

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2.hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?.to_string();
    Ok(phc)
}

/// Constant-time check of `password` against a stored PHC string.
pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

/// Burn one verification so callers without a stored hash take as long as callers with one.
pub fn verify_against_dummy(password: &str) {
    if let Some(h) = DUMMY_HASH.as_deref() {
        let _ = verify_password(h, password);
    }
}

/// 32 random bytes, base64url without padding.
pub fn random_secret() -> Result<String> {
    use base64::Engine;
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}
