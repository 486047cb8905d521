//! HTTP integration tests: the full auth + registration surface driven over a
//! real listener with reqwest.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use regdesk::config::AppConfig;
use regdesk::error::{AppError, AppResult};
use regdesk::identity::{ExternalIdentity, ExternalIdentityVerifier};
use regdesk::server::{serve, AppState};

const SECRET: &[u8] = b"integration-secret-0123456789abcdef";

/// Accepts `google:<sub>:<email>` as an already verified assertion.
struct StubVerifier;

#[async_trait]
impl ExternalIdentityVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> AppResult<ExternalIdentity> {
        let mut parts = token.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("google"), Some(sub), Some(email)) => Ok(ExternalIdentity {
                provider: "google".into(),
                subject: sub.into(),
                name: "Google Person".into(),
                email: email.into(),
            }),
            _ => Err(AppError::external("Google authentication failed: token is not valid")),
        }
    }
}

async fn spawn(config: AppConfig) -> Result<String> {
    let state = AppState::with_verifier(config, Some(Arc::new(StubVerifier)))?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = serve(listener, state).await;
    });
    Ok(format!("http://{}", addr))
}

async fn spawn_default() -> Result<String> {
    spawn(AppConfig::in_memory(SECRET)).await
}

async fn signup(c: &Client, base: &str, name: &str, role: &str) -> Result<(String, String)> {
    let res = c
        .post(format!("{base}/api/auth/register"))
        .json(&json!({ "name": name, "email": format!("{}@example.com", name.to_lowercase()), "password": "pw-123456", "role": role }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    Ok((body["token"].as_str().unwrap_or_default().to_string(), body["user"]["id"].as_str().unwrap_or_default().to_string()))
}

fn registration(number: &str) -> Value {
    json!({
        "name": "Asha Rao",
        "dept": "CSE",
        "regNumber": number,
        "email": "asha@example.com",
        "cgpa": 8.5,
        "dob": "2000-01-01",
        "mobile": "9876543210",
        "gender": "Female",
        "skills": "React, Node.js",
        "institute": "NIT Trichy"
    })
}

#[tokio::test]
async fn register_login_me_round_trip() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();

    let res = c
        .post(format!("{base}/api/auth/register"))
        .json(&json!({ "name": "Alice", "email": "alice@example.com", "password": "pw-123456", "role": "user" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res.headers().get("set-cookie").and_then(|v| v.to_str().ok()).unwrap_or_default().to_string();
    assert!(cookie.starts_with("token="));
    assert!(cookie.contains("HttpOnly"));
    let created: Value = res.json().await?;
    assert_eq!(created["user"]["role"], "user");

    let again = c
        .post(format!("{base}/api/auth/register"))
        .json(&json!({ "name": "Alice", "email": "ALICE@example.com", "password": "x", "role": "user" }))
        .send()
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);
    assert_eq!(again.json::<Value>().await?["error"], "duplicate_email");

    let login: Value = c
        .post(format!("{base}/api/auth/login"))
        .json(&json!({ "email": "alice@example.com", "password": "pw-123456" }))
        .send()
        .await?
        .json()
        .await?;
    let token = login["token"].as_str().unwrap_or_default();

    let me: Value = c.get(format!("{base}/api/auth/me")).header("x-auth-token", token).send().await?.json().await?;
    assert_eq!(me["id"], created["user"]["id"]);
    assert_eq!(me["role"], "user");
    assert!(me.get("credentialHash").is_none());
    Ok(())
}

#[tokio::test]
async fn bad_credentials_and_missing_tokens() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();
    signup(&c, &base, "Bob", "user").await?;

    let wrong = c
        .post(format!("{base}/api/auth/login"))
        .json(&json!({ "email": "bob@example.com", "password": "nope" }))
        .send()
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.json::<Value>().await?["error"], "invalid_credentials");

    let anon = c.get(format!("{base}/api/registrations")).send().await?;
    assert_eq!(anon.status(), StatusCode::UNAUTHORIZED);
    let junk = c.get(format!("{base}/api/auth/me")).bearer_auth("not-a-token").send().await?;
    assert_eq!(junk.status(), StatusCode::UNAUTHORIZED);

    let role = c
        .post(format!("{base}/api/auth/register"))
        .json(&json!({ "name": "Eve", "email": "eve@example.com", "password": "pw", "role": "root" }))
        .send()
        .await?;
    assert_eq!(role.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn ownership_rules_over_http() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();
    let (alice, alice_id) = signup(&c, &base, "Alice", "user").await?;
    let (bob, _) = signup(&c, &base, "Bob", "user").await?;
    let (admin, _) = signup(&c, &base, "Admin", "admin").await?;

    let created: Value = c
        .post(format!("{base}/api/registrations"))
        .bearer_auth(&alice)
        .json(&registration("21CSE001"))
        .send()
        .await?
        .json()
        .await?;
    let id = created["id"].as_str().unwrap_or_default().to_string();
    assert_eq!(created["owner"], alice_id.as_str());
    assert_eq!(created["cgpa"], 8.5);
    assert_eq!(created["dob"], "2000-01-01");
    assert_eq!(created["skills"], json!(["React", "Node.js"]));

    let dup = c.post(format!("{base}/api/registrations")).bearer_auth(&bob).json(&registration("21CSE001")).send().await?;
    assert_eq!(dup.status(), StatusCode::CONFLICT);

    let foreign = c.get(format!("{base}/api/registrations/{id}")).bearer_auth(&bob).send().await?;
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);
    let missing = c.get(format!("{base}/api/registrations/does-not-exist")).bearer_auth(&bob).send().await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let bobs: Value = c.get(format!("{base}/api/registrations")).bearer_auth(&bob).send().await?.json().await?;
    assert_eq!(bobs, json!([]));
    let all: Value = c.get(format!("{base}/api/registrations")).bearer_auth(&admin).send().await?.json().await?;
    assert_eq!(all[0]["ownerAccount"]["name"], "Alice");
    let mine: Value = c
        .get(format!("{base}/api/registrations/my-registrations"))
        .bearer_auth(&alice)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(mine[0]["id"], id.as_str());

    let renumber = c
        .put(format!("{base}/api/registrations/{id}"))
        .bearer_auth(&alice)
        .json(&registration("21CSE999"))
        .send()
        .await?;
    assert_eq!(renumber.status(), StatusCode::BAD_REQUEST);
    assert_eq!(renumber.json::<Value>().await?["error"], "immutable_field_violation");

    let by_admin = c
        .put(format!("{base}/api/registrations/{id}"))
        .bearer_auth(&admin)
        .json(&registration("21CSE999"))
        .send()
        .await?;
    assert_eq!(by_admin.status(), StatusCode::OK);
    assert_eq!(by_admin.json::<Value>().await?["regNumber"], "21CSE999");

    let del = c.delete(format!("{base}/api/registrations/{id}")).bearer_auth(&bob).send().await?;
    assert_eq!(del.status(), StatusCode::FORBIDDEN);
    let del = c.delete(format!("{base}/api/registrations/{id}")).bearer_auth(&alice).send().await?;
    assert_eq!(del.status(), StatusCode::OK);
    let gone = c.get(format!("{base}/api/registrations/{id}")).bearer_auth(&admin).send().await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn validation_errors_list_every_field() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();
    let (alice, _) = signup(&c, &base, "Alice", "user").await?;

    let mut bad = registration("21CSE002");
    bad["cgpa"] = json!(11);
    bad["dob"] = json!("2999-01-01");
    let res = c.post(format!("{base}/api/registrations")).bearer_auth(&alice).json(&bad).send().await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "validation_error");
    let fields: Vec<&str> = body["violations"]
        .as_array()
        .map(|v| v.iter().filter_map(|x| x["field"].as_str()).collect())
        .unwrap_or_default();
    assert!(fields.contains(&"cgpa"));
    assert!(fields.contains(&"dob"));

    let malformed = c
        .post(format!("{base}/api/registrations"))
        .bearer_auth(&alice)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn cookie_transport_and_logout() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::builder().cookie_store(true).build()?;
    signup(&c, &base, "Carol", "user").await?;

    let me = c.get(format!("{base}/api/auth/me")).send().await?;
    assert_eq!(me.status(), StatusCode::OK);

    let out = c.post(format!("{base}/api/auth/logout")).send().await?;
    assert_eq!(out.status(), StatusCode::OK);
    assert_eq!(out.json::<Value>().await?["msg"], "Logged out successfully");

    let after = c.get(format!("{base}/api/auth/me")).send().await?;
    assert_eq!(after.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn google_login_links_existing_email() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();
    let (_, dana_id) = signup(&c, &base, "Dana", "admin").await?;

    let first: Value = c
        .post(format!("{base}/api/auth/google"))
        .json(&json!({ "token": "google:sub-77:dana@example.com" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(first["user"]["id"], dana_id.as_str());
    assert_eq!(first["user"]["role"], "admin");

    let second: Value = c
        .post(format!("{base}/api/auth/google"))
        .json(&json!({ "token": "google:sub-77:dana@example.com" }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(second["user"]["id"], dana_id.as_str());

    let forged = c.post(format!("{base}/api/auth/google")).json(&json!({ "token": "forged" })).send().await?;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
    let empty = c.post(format!("{base}/api/auth/google")).json(&json!({})).send().await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn admin_signup_can_be_disabled() -> Result<()> {
    let mut cfg = AppConfig::in_memory(SECRET);
    cfg.allow_admin_signup = false;
    let base = spawn(cfg).await?;
    let res = Client::new()
        .post(format!("{base}/api/auth/register"))
        .json(&json!({ "name": "Mallory", "email": "m@example.com", "password": "pw", "role": "admin" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn data_survives_restart() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut cfg = AppConfig::in_memory(SECRET);
    cfg.data_dir = Some(tmp.path().to_path_buf());

    let c = Client::new();
    let base = spawn(cfg.clone()).await?;
    let (token, _) = signup(&c, &base, "Erin", "user").await?;
    let created = c.post(format!("{base}/api/registrations")).bearer_auth(&token).json(&registration("R-1")).send().await?;
    assert_eq!(created.status(), StatusCode::OK);

    // same secret, same folder: old token and data are both still valid
    let base2 = spawn(cfg).await?;
    let mine: Value = c.get(format!("{base2}/api/registrations")).bearer_auth(&token).send().await?.json().await?;
    assert_eq!(mine.as_array().map(Vec::len), Some(1));
    assert_eq!(mine[0]["regNumber"], "R-1");
    Ok(())
}

#[tokio::test]
async fn browser_origin_gets_credentialed_cors() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();

    let preflight = c
        .request(reqwest::Method::OPTIONS, format!("{base}/api/registrations"))
        .header("origin", "http://localhost:3000")
        .header("access-control-request-method", "POST")
        .header("access-control-request-headers", "content-type,x-auth-token")
        .send()
        .await?;
    assert_eq!(preflight.status(), StatusCode::OK);
    let h = preflight.headers();
    assert_eq!(h.get("access-control-allow-origin").and_then(|v| v.to_str().ok()), Some("http://localhost:3000"));
    assert_eq!(h.get("access-control-allow-credentials").and_then(|v| v.to_str().ok()), Some("true"));
    let allowed = h.get("access-control-allow-headers").and_then(|v| v.to_str().ok()).unwrap_or_default().to_lowercase();
    assert!(allowed.contains("x-auth-token"));

    let simple = c.get(format!("{base}/health")).header("origin", "http://localhost:3000").send().await?;
    let exposed = simple.headers().get("access-control-expose-headers").and_then(|v| v.to_str().ok()).unwrap_or_default();
    assert!(exposed.contains("x-auth-token"));

    let stranger = c
        .request(reqwest::Method::OPTIONS, format!("{base}/api/registrations"))
        .header("origin", "https://evil.example")
        .header("access-control-request-method", "POST")
        .send()
        .await?;
    assert!(stranger.headers().get("access-control-allow-origin").is_none());
    Ok(())
}

#[tokio::test]
async fn lowercase_bearer_scheme_is_accepted() -> Result<()> {
    let base = spawn_default().await?;
    let c = Client::new();
    let (token, id) = signup(&c, &base, "Frank", "user").await?;
    let me: Value = c
        .get(format!("{base}/api/auth/me"))
        .header("authorization", format!("bearer {token}"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(me["id"], id.as_str());
    Ok(())
}
