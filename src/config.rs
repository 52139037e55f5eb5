//! Service configuration from environment variables, with CLI overrides
//! applied by the server binary.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::identity::DEFAULT_SESSION_COOKIE;
use crate::lock::DEFAULT_LOCK_TTL;

/// Default cap on an uploaded backup.
pub const DEFAULT_IMPORT_MAX_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    File,
    Memory,
}

impl StoreKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" | "disk" => Some(StoreKind::File),
            "memory" | "mem" => Some(StoreKind::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub data_root: PathBuf,
    pub store: StoreKind,
    pub lock_ttl: Duration,
    /// Longest an import is expected to run; the lock TTL must stay above it.
    pub import_budget: Duration,
    /// Largest accepted `/admin/import` request body.
    pub import_max_bytes: usize,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    pub session_cookie: String,
    pub session_ttl: Duration,
    /// Label stamped into exported backups.
    pub environment: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 7878,
            data_root: PathBuf::from("data"),
            store: StoreKind::File,
            lock_ttl: DEFAULT_LOCK_TTL,
            import_budget: Duration::from_secs(5 * 60),
            import_max_bytes: DEFAULT_IMPORT_MAX_BYTES,
            admin_email: None,
            admin_password: None,
            session_cookie: DEFAULT_SESSION_COOKIE.to_string(),
            session_ttl: Duration::from_secs(60 * 60),
            environment: "production".to_string(),
        }
    }
}

pub fn parse_port_env(name: &str) -> Option<u16> {
    env::var(name).ok().and_then(|v| v.parse::<u16>().ok())
}

fn parse_secs_env(name: &str) -> Option<Duration> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(s) => Some(Duration::from_secs(s)),
        Err(e) => {
            warn!(target: "startup", "ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

fn parse_bytes_env(name: &str) -> Option<usize> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!(target: "startup", "ignoring {}={:?}: expected a positive byte count", name, raw);
            None
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
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

impl Config {
    pub fn from_env() -> Self {
        let d = Config::default();
        let store = match non_empty_env("ENCORE_STORE") {
            Some(s) => StoreKind::parse(&s).unwrap_or_else(|| {
                warn!(target: "startup", "unknown ENCORE_STORE={:?}, using file", s);
                StoreKind::File
            }),
            None => d.store,
        };
        Self {
            http_port: parse_port_env("ENCORE_HTTP_PORT").unwrap_or(d.http_port),
            data_root: non_empty_env("ENCORE_DATA_ROOT").map(PathBuf::from).unwrap_or(d.data_root),
            store,
            lock_ttl: parse_secs_env("ENCORE_LOCK_TTL_SECS").unwrap_or(d.lock_ttl),
            import_budget: parse_secs_env("ENCORE_IMPORT_BUDGET_SECS").unwrap_or(d.import_budget),
            import_max_bytes: parse_bytes_env("ENCORE_IMPORT_MAX_BYTES").unwrap_or(d.import_max_bytes),
            admin_email: non_empty_env("ENCORE_ADMIN_EMAIL"),
            admin_password: non_empty_env("ENCORE_ADMIN_PASSWORD"),
            session_cookie: non_empty_env("SESSION_COOKIE_NAME").unwrap_or(d.session_cookie),
            session_ttl: parse_secs_env("ENCORE_SESSION_TTL_SECS").unwrap_or(d.session_ttl),
            environment: non_empty_env("ENCORE_ENVIRONMENT").unwrap_or(d.environment),
        }
    }

    /// Apply `--port`, `--data-root` and `--store` overrides.
    pub fn apply_args(mut self, args: &[String]) -> Self {
        if let Some(p) = arg_value(args, "--port").and_then(|v| v.parse::<u16>().ok()) { self.http_port = p; }
        if let Some(root) = arg_value(args, "--data-root") { self.data_root = PathBuf::from(root); }
        if let Some(k) = arg_value(args, "--store").and_then(StoreKind::parse) { self.store = k; }
        self
    }

    /// Human-readable problems that do not stop startup.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.lock_ttl <= self.import_budget {
            out.push(format!(
                "lock TTL ({}s) does not exceed the import budget ({}s); a running import can lose its lock",
                self.lock_ttl.as_secs(), self.import_budget.as_secs()
            ));
        }
        if self.admin_email.is_some() != self.admin_password.is_some() {
            out.push("ENCORE_ADMIN_EMAIL and ENCORE_ADMIN_PASSWORD must be set together; admin bootstrap skipped".to_string());
        }
        out
    }
}
