//!
//! regdesk configuration
//! ---------------------
//! `AppConfig` is resolved once at startup. Precedence is CLI flag, then
//! environment variable, then built-in default. Parsing is split from process
//! state (`resolve` takes the args and an env lookup) so tests can drive it.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::identity::SessionIssuer;
use crate::security;

pub const DEFAULT_HTTP_PORT: u16 = 5000;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const MIN_SECRET_LEN: usize = 32;
pub const MAX_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapAdmin {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub bind: IpAddr,
    /// `None` keeps every collection in memory only.
    pub data_dir: Option<PathBuf>,
    pub jwt_secret: Vec<u8>,
    /// True when no secret was configured and one was generated for this process.
    pub ephemeral_secret: bool,
    pub token_ttl_secs: i64,
    pub google_client_id: Option<String>,
    pub allow_admin_signup: bool,
    pub bootstrap_admin: Option<BootstrapAdmin>,
    pub secure_cookies: bool,
    /// Browser origins allowed to call the API with credentials. Empty disables CORS.
    pub cors_origins: Vec<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("http_port", &self.http_port)
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("jwt_secret", &"<redacted>")
            .field("ephemeral_secret", &self.ephemeral_secret)
            .field("token_ttl_secs", &self.token_ttl_secs)
            .field("google_client_id", &self.google_client_id)
            .field("allow_admin_signup", &self.allow_admin_signup)
            .field("bootstrap_admin", &self.bootstrap_admin.as_ref().map(|a| &a.email))
            .field("secure_cookies", &self.secure_cookies)
            .field("cors_origins", &self.cors_origins)
            .finish()
    }
}

fn parse_port_env(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u16> {
    env(name).and_then(|v| v.trim().parse::<u16>().ok())
}

fn parse_port_arg(args: &[String], flag: &str) -> Option<u16> {
    arg_value(args, flag).and_then(|v| v.parse::<u16>().ok())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_bool_env(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    env(name).as_deref().and_then(parse_bool)
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let i = args.iter().position(|a| a == flag)?;
    args.get(i + 1).filter(|v| !v.starts_with("--")).cloned()
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl AppConfig {
    /// Resolve from the real process arguments and environment.
    pub fn from_env_and_args() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        Self::resolve(&args, |k| std::env::var(k).ok())
    }

    pub fn resolve(args: &[String], env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let http_port = parse_port_arg(args, "--http-port")
            .or_else(|| parse_port_env(&env, "REGDESK_HTTP_PORT"))
            .unwrap_or(DEFAULT_HTTP_PORT);

        let bind_raw = arg_value(args, "--bind").or_else(|| non_empty(env("REGDESK_BIND")));
        let bind = match bind_raw {
            Some(b) => b.parse::<IpAddr>().with_context(|| format!("invalid bind address '{}'", b))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };

        let in_memory = has_flag(args, "--in-memory") || parse_bool_env(&env, "REGDESK_IN_MEMORY").unwrap_or(false);
        let data_dir = if in_memory {
            None
        } else {
            let d = arg_value(args, "--data-dir")
                .or_else(|| non_empty(env("REGDESK_DATA_DIR")))
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
            Some(PathBuf::from(d))
        };

        let (jwt_secret, ephemeral_secret) = match non_empty(env("REGDESK_JWT_SECRET")) {
            Some(s) if s.len() < MIN_SECRET_LEN => {
                bail!("REGDESK_JWT_SECRET must be at least {} bytes", MIN_SECRET_LEN)
            }
            Some(s) => (s.into_bytes(), false),
            None => (security::random_secret()?.into_bytes(), true),
        };

        let ttl_raw = arg_value(args, "--token-ttl").or_else(|| non_empty(env("REGDESK_TOKEN_TTL_SECS")));
        let token_ttl_secs = match ttl_raw {
            Some(t) => {
                let secs = t.parse::<i64>().ok().filter(|n| *n > 0).with_context(|| format!("invalid token ttl '{}'", t))?;
                if secs > MAX_TOKEN_TTL_SECS {
                    bail!("token ttl {} exceeds the maximum of {} seconds", secs, MAX_TOKEN_TTL_SECS);
                }
                secs
            }
            None => SessionIssuer::DEFAULT_TTL_SECS,
        };

        let allow_admin_signup = if has_flag(args, "--no-admin-signup") {
            false
        } else {
            parse_bool_env(&env, "REGDESK_ALLOW_ADMIN_SIGNUP").unwrap_or(true)
        };

        let bootstrap_admin = match (non_empty(env("REGDESK_ADMIN_EMAIL")), env("REGDESK_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) if !password.is_empty() => Some(BootstrapAdmin {
                name: non_empty(env("REGDESK_ADMIN_NAME")).unwrap_or_else(|| "Administrator".to_string()),
                email,
                password,
            }),
            (Some(_), _) => bail!("REGDESK_ADMIN_EMAIL is set but REGDESK_ADMIN_PASSWORD is missing"),
            _ => None,
        };

        let cors_raw = arg_value(args, "--cors-origin")
            .or_else(|| env("REGDESK_CORS_ORIGIN"))
            .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string());
        let mut cors_origins = Vec::new();
        for origin in cors_raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            if origin == "*" || !(origin.starts_with("http://") || origin.starts_with("https://")) {
                bail!("invalid CORS origin '{}': expected an explicit http(s) origin", origin);
            }
            cors_origins.push(origin.trim_end_matches('/').to_string());
        }

        Ok(Self {
            http_port,
            bind,
            data_dir,
            jwt_secret,
            ephemeral_secret,
            token_ttl_secs,
            google_client_id: non_empty(env("REGDESK_GOOGLE_CLIENT_ID")),
            allow_admin_signup,
            bootstrap_admin,
            secure_cookies: parse_bool_env(&env, "REGDESK_SECURE_COOKIES").unwrap_or(false),
            cors_origins,
        })
    }

    /// Minimal in-memory configuration for tests and embedding.
    pub fn in_memory(secret: &[u8]) -> Self {
        Self {
            http_port: 0,
            bind: IpAddr::from([127, 0, 0, 1]),
            data_dir: None,
            jwt_secret: secret.to_vec(),
            ephemeral_secret: false,
            token_ttl_secs: SessionIssuer::DEFAULT_TTL_SECS,
            google_client_id: None,
            allow_admin_signup: true,
            bootstrap_admin: None,
            secure_cookies: false,
            cors_origins: vec![DEFAULT_CORS_ORIGIN.to_string()],
        }
    }

    pub fn warn_if_ephemeral(&self) {
        if self.ephemeral_secret {
            warn!(target: "startup", "REGDESK_JWT_SECRET not set; using a random signing secret, sessions will not survive a restart");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(v: &[&str]) -> Vec<String> {
        std::iter::once("regdesk_server").chain(v.iter().copied()).map(String::from).collect()
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn defaults_apply_without_sources() {
        let c = AppConfig::resolve(&args(&[]), env_of(&[])).unwrap();
        assert_eq!(c.http_port, 5000);
        assert_eq!(c.bind.to_string(), "0.0.0.0");
        assert_eq!(c.data_dir, Some(PathBuf::from("data")));
        assert!(c.ephemeral_secret);
        assert!(c.jwt_secret.len() >= MIN_SECRET_LEN);
        assert_eq!(c.token_ttl_secs, 3600);
        assert!(c.allow_admin_signup);
        assert!(c.google_client_id.is_none());
        assert!(!c.secure_cookies);
    }

    #[test]
    fn flags_override_env() {
        let env = env_of(&[("REGDESK_HTTP_PORT", "6000"), ("REGDESK_DATA_DIR", "/env/dir"), ("REGDESK_TOKEN_TTL_SECS", "60")]);
        let c = AppConfig::resolve(&args(&["--http-port", "7000", "--data-dir", "/flag/dir"]), env).unwrap();
        assert_eq!(c.http_port, 7000);
        assert_eq!(c.data_dir, Some(PathBuf::from("/flag/dir")));
        assert_eq!(c.token_ttl_secs, 60);
    }

    #[test]
    fn short_secret_is_rejected() {
        let err = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_JWT_SECRET", "short")])).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn configured_secret_is_used_verbatim() {
        let secret = "0123456789abcdef0123456789abcdef!";
        let c = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_JWT_SECRET", secret)])).unwrap();
        assert_eq!(c.jwt_secret, secret.as_bytes());
        assert!(!c.ephemeral_secret);
        assert!(!format!("{:?}", c).contains(secret));
    }

    #[test]
    fn in_memory_and_admin_signup_switches() {
        let c = AppConfig::resolve(&args(&["--in-memory", "--no-admin-signup"]), env_of(&[])).unwrap();
        assert!(c.data_dir.is_none());
        assert!(!c.allow_admin_signup);
        let c = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_IN_MEMORY", "yes"), ("REGDESK_ALLOW_ADMIN_SIGNUP", "off")])).unwrap();
        assert!(c.data_dir.is_none());
        assert!(!c.allow_admin_signup);
    }

    #[test]
    fn bootstrap_admin_needs_both_values() {
        let c = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_ADMIN_EMAIL", "root@example.com"), ("REGDESK_ADMIN_PASSWORD", "pw")])).unwrap();
        let admin = c.bootstrap_admin.unwrap();
        assert_eq!(admin.email, "root@example.com");
        assert_eq!(admin.name, "Administrator");
        assert!(AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_ADMIN_EMAIL", "root@example.com")])).is_err());
    }

    #[test]
    fn bad_values_fail_loudly() {
        assert!(AppConfig::resolve(&args(&["--bind", "not-an-ip"]), env_of(&[])).is_err());
        assert!(AppConfig::resolve(&args(&["--token-ttl", "-5"]), env_of(&[])).is_err());
    }

    #[test]
    fn cors_origins_default_and_override() {
        let c = AppConfig::resolve(&args(&[]), env_of(&[])).unwrap();
        assert_eq!(c.cors_origins, vec!["http://localhost:3000".to_string()]);
        let c = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_CORS_ORIGIN", "https://app.example.com/, http://localhost:5173")])).unwrap();
        assert_eq!(c.cors_origins, vec!["https://app.example.com".to_string(), "http://localhost:5173".to_string()]);
        let c = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_CORS_ORIGIN", "")])).unwrap();
        assert!(c.cors_origins.is_empty());
        // credentialed CORS cannot use a wildcard
        assert!(AppConfig::resolve(&args(&["--cors-origin", "*"]), env_of(&[])).is_err());
    }

    #[test]
    fn token_ttl_is_bounded() {
        let huge = AppConfig::resolve(&args(&[]), env_of(&[("REGDESK_TOKEN_TTL_SECS", "1000000000000000")])).unwrap_err();
        assert!(huge.to_string().contains("exceeds the maximum"));
        let c = AppConfig::resolve(&args(&["--token-ttl", &MAX_TOKEN_TTL_SECS.to_string()]), env_of(&[])).unwrap();
        assert_eq!(c.token_ttl_secs, MAX_TOKEN_TTL_SECS);
        assert!(AppConfig::resolve(&args(&["--token-ttl", &(MAX_TOKEN_TTL_SECS + 1).to_string()]), env_of(&[])).is_err());
    }
}
