//! Authentication gate: turns the bearer token on a request into a `Principal`.
//!
//! Header transports (`x-auth-token`, then `Authorization: Bearer`) win over the
//! `token` cookie whenever a header is present, even if the cookie would verify.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::{AppError, AppResult};

use super::principal::Principal;
use super::session::SessionIssuer;

pub const TOKEN_HEADER: &str = "x-auth-token";
pub const TOKEN_COOKIE: &str = "token";

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all("cookie") {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k.trim() == name && !v.is_empty() { return Some(v.trim().to_string()); }
            }
        }
    }
    None
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    if let Some(v) = headers.get(TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(v.trim().to_string());
    }
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok())?;
    // auth-scheme is case-insensitive (RFC 9110 11.1)
    let (scheme, rest) = auth.trim().split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| rest.trim().to_string())
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    header_token(headers).or_else(|| parse_cookie(headers, TOKEN_COOKIE)).filter(|t| !t.is_empty())
}

pub fn authenticate(headers: &HeaderMap, issuer: &SessionIssuer) -> AppResult<Principal> {
    let Some(token) = extract_token(headers) else {
        return Err(AppError::unauthenticated("No token, authorization denied"));
    };
    Ok(issuer.verify(&token)?)
}

/// Per-request view of the authenticated caller. Used as an axum extractor; a
/// request without a valid token is rejected with 401 before the handler runs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    pub request_id: String,
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
    Arc<SessionIssuer>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let issuer = Arc::<SessionIssuer>::from_ref(state);
        let principal = authenticate(&parts.headers, &issuer)?;
        Ok(Self { principal, request_id: uuid::Uuid::new_v4().to_string() })
    }
}
