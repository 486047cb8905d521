//!
//! regdesk server binary
//! ---------------------
//! Command-line entry point for the registration desk HTTP API. Configuration
//! comes from CLI flags and environment variables (see `regdesk::config`).

use anyhow::Result;
use std::env;

use regdesk::config::{has_flag, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?,
        )
        .try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("regdesk Server\n\nUSAGE:\n  regdesk_server [--http-port N] [--bind ADDR] [--data-dir PATH] [--in-memory] [--token-ttl SECS] [--no-admin-signup]\n\nOPTIONS:\n  --http-port N       HTTP API port (env: REGDESK_HTTP_PORT, default 5000)\n  --bind ADDR         Listen address (env: REGDESK_BIND, default 0.0.0.0)\n  --data-dir PATH     Data folder for JSON snapshots (env: REGDESK_DATA_DIR, default data)\n  --in-memory         Keep all data in memory only (env: REGDESK_IN_MEMORY)\n  --token-ttl SECS    Session token lifetime (env: REGDESK_TOKEN_TTL_SECS, default 3600)\n  --no-admin-signup   Refuse self-registered admin accounts (env: REGDESK_ALLOW_ADMIN_SIGNUP)\n\nENVIRONMENT:\n  REGDESK_JWT_SECRET          Signing secret, at least 32 bytes (random per process if unset)\n  REGDESK_GOOGLE_CLIENT_ID    Enables Google sign-in\n  REGDESK_ADMIN_EMAIL / REGDESK_ADMIN_PASSWORD / REGDESK_ADMIN_NAME   Bootstrap admin account\n  REGDESK_SECURE_COOKIES      Mark the session cookie Secure\n");
        return Ok(());
    }

    let config = AppConfig::resolve(&args, |k| env::var(k).ok())?;
    tracing::info!(target: "startup", "Using http={}:{}, data_dir={:?}", config.bind, config.http_port, config.data_dir);
    regdesk::server::run(config).await
}
