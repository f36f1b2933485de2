//! Process configuration. Environment variables provide the base values and
//! command-line flags override them.

use std::path::PathBuf;
use std::time::Duration;

use crate::identity::{AdminAllowList, DevPersona};

pub const DEFAULT_HTTP_PORT: u16 = 7878;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_SESSION_SWEEP_SECS: u64 = 60;
pub const PROFILE_SNAPSHOT: &str = "profiles.json";
/// Payment provider export read for the admin revenue figures.
pub const SUBSCRIPTIONS_FILE: &str = "subscriptions.json";

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub http_port: u16,
    /// Where the profile snapshot lives. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub admins: AdminAllowList,
    pub dev_persona: Option<DevPersona>,
    pub session_ttl: Duration,
    /// How often expired sessions are swept.
    pub session_sweep: Duration,
    pub secure_cookies: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            data_dir: None,
            admins: AdminAllowList::default(),
            dev_persona: None,
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            session_sweep: Duration::from_secs(DEFAULT_SESSION_SWEEP_SECS),
            secure_cookies: true,
        }
    }
}

pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Value following `flag` in `args`, if any.
pub fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        i += 1;
    }
    None
}

pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

impl PortalConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(port) = get("PORTAL_HTTP_PORT").and_then(|v| v.trim().parse::<u16>().ok()) {
            cfg.http_port = port;
        }
        cfg.data_dir = get("PORTAL_DATA_DIR").filter(|v| !v.trim().is_empty()).map(PathBuf::from);
        if let Some(list) = get("PORTAL_ADMIN_EMAILS") {
            cfg.admins = AdminAllowList::parse(&list);
        }
        cfg.dev_persona = get("PORTAL_DEV_PERSONA").and_then(|v| DevPersona::parse(&v));
        if let Some(secs) = get("PORTAL_SESSION_TTL_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            if secs > 0 {
                cfg.session_ttl = Duration::from_secs(secs);
            }
        }
        if let Some(secs) = get("PORTAL_SESSION_SWEEP_SECS").and_then(|v| v.trim().parse::<u64>().ok()) {
            if secs > 0 {
                cfg.session_sweep = Duration::from_secs(secs);
            }
        }
        if let Some(b) = get("PORTAL_SECURE_COOKIES").and_then(|v| parse_bool(&v)) {
            cfg.secure_cookies = b;
        }
        cfg
    }

    /// Apply `--http-port`, `--data-dir` and `--dev-persona`.
    pub fn apply_args(mut self, args: &[String]) -> Self {
        if let Some(port) = arg_value(args, "--http-port").and_then(|v| v.parse::<u16>().ok()) {
            self.http_port = port;
        }
        if let Some(dir) = arg_value(args, "--data-dir") {
            self.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(p) = arg_value(args, "--dev-persona").and_then(DevPersona::parse) {
            self.dev_persona = Some(p);
        }
        self
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(PROFILE_SNAPSHOT))
    }

    pub fn subscriptions_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|d| d.join(SUBSCRIPTIONS_FILE))
    }
}
