//!
//! regdesk HTTP server
//! -------------------
//! Axum-based JSON API over the identity and registration services.
//!
//! Responsibilities:
//! - Wiring: `AppState` holds the stores, the session issuer and the services,
//!   built once from `AppConfig`.
//! - Auth endpoints (`/api/auth/*`) returning `{ token, user }` and setting an
//!   HttpOnly `token` cookie; logout clears it.
//! - Registration endpoints (`/api/registrations*`) behind the `RequestContext`
//!   extractor, delegating every decision to `RegistrationService`.
//! - Startup logging and optional bootstrap admin seeding.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRef, FromRequest, Path, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::{AppConfig, MAX_TOKEN_TTL_SECS};
use crate::error::{AppError, AppResult};
use crate::identity::{
    AccountView, AuthProvider, ExternalIdentityVerifier, FederatedLogin, GoogleIdTokenVerifier, LocalAuthProvider,
    LoginRequest, LoginResponse, RegisterRequest, RequestContext, Role, SessionIssuer, TOKEN_COOKIE, TOKEN_HEADER,
};
use crate::registration::{ListedRegistration, RegistrationInput, RegistrationService};
use crate::storage::{AccountStore, LocalAccountStore, LocalRegistrationStore, Registration, RegistrationStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<SessionIssuer>,
    pub auth: Arc<LocalAuthProvider>,
    pub federated: Arc<FederatedLogin>,
    pub registrations: Arc<RegistrationService>,
}

impl FromRef<AppState> for Arc<SessionIssuer> {
    fn from_ref(state: &AppState) -> Self { state.sessions.clone() }
}

impl AppState {
    /// Open the stores named by `config` and build every service on top of them.
    /// A Google verifier is attached when a client id is configured.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let verifier: Option<Arc<dyn ExternalIdentityVerifier>> = config
            .google_client_id
            .as_ref()
            .map(|id| Arc::new(GoogleIdTokenVerifier::new(id.clone())) as Arc<dyn ExternalIdentityVerifier>);
        Self::with_verifier(config, verifier)
    }

    pub fn with_verifier(config: AppConfig, verifier: Option<Arc<dyn ExternalIdentityVerifier>>) -> anyhow::Result<Self> {
        let accounts: Arc<dyn AccountStore>;
        let registrations: Arc<dyn RegistrationStore>;
        match &config.data_dir {
            Some(dir) => {
                accounts = Arc::new(
                    LocalAccountStore::open(dir).with_context(|| format!("opening account store in {}", dir.display()))?,
                );
                registrations = Arc::new(
                    LocalRegistrationStore::open(dir)
                        .with_context(|| format!("opening registration store in {}", dir.display()))?,
                );
            }
            None => {
                accounts = Arc::new(LocalAccountStore::in_memory());
                registrations = Arc::new(LocalRegistrationStore::in_memory());
            }
        }
        let ttl = chrono::Duration::try_seconds(config.token_ttl_secs)
            .filter(|_| (1..=MAX_TOKEN_TTL_SECS).contains(&config.token_ttl_secs))
            .with_context(|| format!("token ttl {}s is out of range", config.token_ttl_secs))?;
        let sessions = Arc::new(SessionIssuer::new(&config.jwt_secret, ttl));
        let auth = LocalAuthProvider::new(accounts.clone(), sessions.clone()).with_admin_signup(config.allow_admin_signup);
        if let Some(admin) = &config.bootstrap_admin {
            auth.seed_admin(&admin.name, &admin.email, &admin.password)
                .context("seeding bootstrap admin")?;
        }
        let federated = FederatedLogin::new(accounts.clone(), sessions.clone(), verifier);
        Ok(Self {
            config: Arc::new(config),
            sessions,
            auth: Arc::new(auth),
            federated: Arc::new(federated),
            registrations: Arc::new(RegistrationService::new(registrations, accounts)),
        })
    }
}

/// Credentialed CORS for the configured browser origins. Both token transports
/// must work cross-origin: the `token` cookie and the `x-auth-token` header.
fn build_cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config.cors_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(TOKEN_HEADER),
            HeaderName::from_static("x-requested-with"),
        ])
        .expose_headers([HeaderName::from_static(TOKEN_HEADER)])
        .max_age(std::time::Duration::from_secs(3600))
}

pub fn router(state: AppState) -> Router {
    let cors = (!state.config.cors_origins.is_empty()).then(|| build_cors_layer(&state.config));
    let app = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/google", post(google_login))
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
        .route("/api/registrations", post(create_registration).get(list_registrations))
        .route("/api/registrations/my-registrations", get(my_registrations))
        .route(
            "/api/registrations/{id}",
            get(get_registration).put(update_registration).delete(delete_registration),
        )
        .with_state(state);
    match cors {
        Some(layer) => app.layer(layer),
        None => app,
    }
}

fn log_startup(config: &AppConfig) {
    let cwd = std::env::current_dir().ok();
    info!(
        target: "startup",
        "regdesk starting. cwd={:?}, data_dir={:?}, token_ttl_secs={}, google_login={}, admin_signup={}",
        cwd,
        config.data_dir,
        config.token_ttl_secs,
        config.google_client_id.is_some(),
        config.allow_admin_signup
    );
    config.warn_if_ephemeral();
    if config.allow_admin_signup {
        info!(target: "startup", "self-service admin signup is enabled; disable with --no-admin-signup");
    }
}

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    log_startup(&config);
    let addr = SocketAddr::new(config.bind, config.http_port);
    let state = AppState::from_config(config)?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("binding {}", addr))?;
    info!(target: "startup", "Starting server on {}", addr);
    serve(listener, state).await
}

/// Serve on an already bound listener until ctrl-c.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target: "startup", "shutdown requested");
        })
        .await?;
    Ok(())
}

/// JSON body extractor whose rejection is a regular validation error.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(v)) => Ok(Self(v)),
            Err(rej) => Err(AppError::invalid("body", &rej.body_text())),
        }
    }
}

fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> AppResult<HeaderValue> {
    let mut c = format!("{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}", TOKEN_COOKIE, token, max_age_secs);
    if secure { c.push_str("; Secure"); }
    HeaderValue::from_str(&c).map_err(|e| AppError::internal(format!("building session cookie: {}", e)))
}

fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("token=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0; Secure")
    } else {
        HeaderValue::from_static("token=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
    }
}

/// Run password hashing and snapshot-writing store mutations off the async workers.
async fn blocking<T, F>(f: F) -> AppResult<T>
where
    F: FnOnce() -> AppResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::internal(format!("blocking task failed: {}", e)))?
}

#[derive(Debug, Serialize)]
struct AuthUser {
    id: String,
    name: String,
    email: String,
    role: Role,
}

#[derive(Debug, Serialize)]
struct AuthBody {
    token: String,
    user: AuthUser,
}

fn auth_response(state: &AppState, res: LoginResponse) -> AppResult<impl IntoResponse> {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Set-Cookie",
        session_cookie(&res.session.token, state.sessions.ttl().num_seconds(), state.config.secure_cookies)?,
    );
    let body = AuthBody {
        token: res.session.token,
        user: AuthUser { id: res.account.id, name: res.account.name, email: res.account.email, role: res.account.role },
    };
    Ok((StatusCode::OK, headers, Json(body)))
}

#[derive(Debug, Default, Deserialize)]
struct RegisterPayload {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    role: String,
}

#[derive(Debug, Default, Deserialize)]
struct LoginPayload {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Default, Deserialize)]
struct GooglePayload {
    #[serde(default)]
    token: String,
}

async fn register(State(state): State<AppState>, JsonBody(p): JsonBody<RegisterPayload>) -> AppResult<impl IntoResponse> {
    let auth = state.auth.clone();
    let req = RegisterRequest { name: p.name, email: p.email, password: p.password, role: p.role };
    let res = blocking(move || auth.register(&req)).await?;
    auth_response(&state, res)
}

async fn login(State(state): State<AppState>, JsonBody(p): JsonBody<LoginPayload>) -> AppResult<impl IntoResponse> {
    let auth = state.auth.clone();
    let req = LoginRequest { email: p.email, password: p.password };
    let res = blocking(move || auth.login(&req)).await?;
    auth_response(&state, res)
}

async fn google_login(State(state): State<AppState>, JsonBody(p): JsonBody<GooglePayload>) -> AppResult<impl IntoResponse> {
    if p.token.trim().is_empty() {
        return Err(AppError::invalid("token", "Google token is required"));
    }
    let res = state.federated.authenticate(p.token.trim()).await?;
    auth_response(&state, res)
}

async fn me(State(state): State<AppState>, ctx: RequestContext) -> AppResult<Json<AccountView>> {
    let account = state.auth.current(&ctx.principal)?;
    Ok(Json(AccountView::from(&account)))
}

async fn logout(State(state): State<AppState>, ctx: RequestContext) -> impl IntoResponse {
    info!(target: "regdesk::auth", account = %ctx.principal.id, request = %ctx.request_id, "logout");
    let mut h = HeaderMap::new();
    h.insert("Set-Cookie", clear_session_cookie(state.config.secure_cookies));
    (StatusCode::OK, h, Json(json!({ "msg": "Logged out successfully" })))
}

async fn create_registration(
    State(state): State<AppState>,
    ctx: RequestContext,
    JsonBody(input): JsonBody<RegistrationInput>,
) -> AppResult<Json<Registration>> {
    let svc = state.registrations.clone();
    let reg = blocking(move || svc.create(&ctx.principal, input)).await?;
    Ok(Json(reg))
}

async fn list_registrations(State(state): State<AppState>, ctx: RequestContext) -> AppResult<Json<Vec<ListedRegistration>>> {
    Ok(Json(state.registrations.list(&ctx.principal)?))
}

async fn my_registrations(State(state): State<AppState>, ctx: RequestContext) -> AppResult<Json<Vec<ListedRegistration>>> {
    Ok(Json(state.registrations.list_own(&ctx.principal)?))
}

async fn get_registration(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> AppResult<Json<Registration>> {
    Ok(Json(state.registrations.get(&ctx.principal, &id)?))
}

async fn update_registration(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    JsonBody(input): JsonBody<RegistrationInput>,
) -> AppResult<Json<Registration>> {
    let svc = state.registrations.clone();
    let reg = blocking(move || svc.update(&ctx.principal, &id, input)).await?;
    Ok(Json(reg))
}

async fn delete_registration(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let svc = state.registrations.clone();
    blocking(move || svc.delete(&ctx.principal, &id)).await?;
    Ok(Json(json!({ "msg": "Registration removed successfully" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_carries_ttl_and_flags() {
        let c = session_cookie("abc", 3600, false).unwrap();
        let s = c.to_str().unwrap();
        assert!(s.starts_with("token=abc;"));
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("Max-Age=3600"));
        assert!(!s.contains("Secure"));
        assert!(session_cookie("abc", 60, true).unwrap().to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn cleared_cookie_expires_immediately() {
        assert!(clear_session_cookie(false).to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn out_of_range_ttl_is_refused_at_startup() {
        let mut cfg = AppConfig::in_memory(b"0123456789abcdef0123456789abcdef");
        cfg.token_ttl_secs = i64::MAX;
        assert!(AppState::from_config(cfg).is_err());
    }

    #[test]
    fn state_seeds_bootstrap_admin_once() {
        let mut cfg = AppConfig::in_memory(b"0123456789abcdef0123456789abcdef");
        cfg.bootstrap_admin = Some(crate::config::BootstrapAdmin {
            name: "Root".into(),
            email: "root@example.com".into(),
            password: "changeme!".into(),
        });
        let state = AppState::from_config(cfg).unwrap();
        let res = state
            .auth
            .login(&LoginRequest { email: "root@example.com".into(), password: "changeme!".into() })
            .unwrap();
        assert_eq!(res.account.role, Role::Admin);
        assert!(!state.federated.is_enabled());
    }
}
