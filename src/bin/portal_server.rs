//!
//! portal server binary
//! --------------------
//! Command-line entry point for the client portal HTTP API. Configuration
//! comes from `PORTAL_*` environment variables; CLI flags override them.

use anyhow::Result;
use std::env;

use agency_portal::config::{has_flag, PortalConfig};

const USAGE: &str = "portal_server

USAGE:
  portal_server [--http-port N] [--data-dir PATH] [--dev-persona NAME]

OPTIONS:
  --http-port N         HTTP API port (env: PORTAL_HTTP_PORT, default 7878)
  --data-dir PATH       Folder for profiles.json and an optional subscriptions.json
                        (env: PORTAL_DATA_DIR; in-memory when unset)
  --dev-persona NAME    new_user | returning_user | admin (env: PORTAL_DEV_PERSONA)

ENVIRONMENT:
  PORTAL_ADMIN_EMAILS      Comma separated e-mails granted the admin role
  PORTAL_SESSION_TTL_SECS  Session lifetime in seconds (default 3600)
  PORTAL_SESSION_SWEEP_SECS  Expired-session sweep interval (default 60)
  PORTAL_SECURE_COOKIES    Mark the session cookie Secure (default true)
  RUST_LOG                 Log filter (default info)
";

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = PortalConfig::from_env().apply_args(&args);
    tracing::info!(
        "Using port: http={}, data_dir={:?}, dev_persona={:?}",
        config.http_port,
        config.data_dir,
        config.dev_persona
    );
    agency_portal::server::run(config).await
}
