//! Service configuration, read from `FLEETGATE_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Longest accepted login session.
pub const MAX_SESSION_TTL_SECS: u64 = 30 * 24 * 60 * 60;
/// Upper bound on `FLEETGATE_DEPLOY_CONCURRENCY`.
pub const MAX_DEPLOY_CONCURRENCY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Docker,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub state_file: PathBuf,
    pub engine: EngineKind,
    pub engine_scheme: String,
    /// Used when a host record has no `port` property.
    pub engine_port: u16,
    /// Directory inside containers that configuration files are written to.
    pub container_home: String,
    pub deploy_timeout_ms: u64,
    /// Maximum parallel container writes per deployment; `None` is unbounded.
    pub deploy_concurrency: Option<usize>,
    pub session_ttl_secs: u64,
    /// Mark the session cookie `Secure`. Turn off only when no TLS terminates in front.
    pub secure_cookies: bool,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    fn default_http_port() -> u16 { 8080 }
    fn default_state_file() -> PathBuf { PathBuf::from("state/fleetgate.json") }
    fn default_engine() -> EngineKind { EngineKind::Docker }
    fn default_engine_scheme() -> String { "http".to_string() }
    fn default_engine_port() -> u16 { 2375 }
    fn default_container_home() -> String { "/home/user".to_string() }
    fn default_deploy_timeout_ms() -> u64 { 10_000 }
    fn default_session_ttl_secs() -> u64 { 60 * 60 }

    pub fn deploy_timeout(&self) -> Duration { Duration::from_millis(self.deploy_timeout_ms) }

    pub fn session_ttl(&self) -> Duration { Duration::from_secs(self.session_ttl_secs) }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();
        if let Some(v) = get("FLEETGATE_HTTP_PORT") {
            cfg.http_port = v.parse().with_context(|| format!("FLEETGATE_HTTP_PORT={}", v))?;
        }
        if let Some(v) = get("FLEETGATE_STATE_FILE") {
            cfg.state_file = PathBuf::from(v);
        }
        if let Some(v) = get("FLEETGATE_ENGINE") {
            cfg.engine = match v.to_ascii_lowercase().as_str() {
                "docker" => EngineKind::Docker,
                "memory" => EngineKind::Memory,
                other => return Err(anyhow!("FLEETGATE_ENGINE must be docker or memory, got {}", other)),
            };
        }
        if let Some(v) = get("FLEETGATE_ENGINE_SCHEME") {
            if v != "http" && v != "https" {
                return Err(anyhow!("FLEETGATE_ENGINE_SCHEME must be http or https, got {}", v));
            }
            cfg.engine_scheme = v;
        }
        if let Some(v) = get("FLEETGATE_ENGINE_PORT") {
            cfg.engine_port = v.parse().with_context(|| format!("FLEETGATE_ENGINE_PORT={}", v))?;
        }
        if let Some(v) = get("FLEETGATE_CONTAINER_HOME") {
            if !v.starts_with('/') {
                return Err(anyhow!("FLEETGATE_CONTAINER_HOME must be an absolute path, got {}", v));
            }
            cfg.container_home = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("FLEETGATE_DEPLOY_TIMEOUT_MS") {
            cfg.deploy_timeout_ms = v.parse().with_context(|| format!("FLEETGATE_DEPLOY_TIMEOUT_MS={}", v))?;
        }
        if let Some(v) = get("FLEETGATE_DEPLOY_CONCURRENCY") {
            let n: usize = v.parse().with_context(|| format!("FLEETGATE_DEPLOY_CONCURRENCY={}", v))?;
            if n > MAX_DEPLOY_CONCURRENCY {
                return Err(anyhow!("FLEETGATE_DEPLOY_CONCURRENCY must be at most {}, got {}", MAX_DEPLOY_CONCURRENCY, n));
            }
            cfg.deploy_concurrency = if n == 0 { None } else { Some(n) };
        }
        if let Some(v) = get("FLEETGATE_SESSION_TTL_SECS") {
            let secs: u64 = v.parse().with_context(|| format!("FLEETGATE_SESSION_TTL_SECS={}", v))?;
            if secs == 0 || secs > MAX_SESSION_TTL_SECS {
                return Err(anyhow!("FLEETGATE_SESSION_TTL_SECS must be between 1 and {}, got {}", MAX_SESSION_TTL_SECS, secs));
            }
            cfg.session_ttl_secs = secs;
        }
        if let Some(v) = get("FLEETGATE_SECURE_COOKIES") {
            cfg.secure_cookies = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => return Err(anyhow!("FLEETGATE_SECURE_COOKIES must be true or false, got {}", other)),
            };
        }
        cfg.admin_user = get("FLEETGATE_ADMIN_USER");
        cfg.admin_password = get("FLEETGATE_ADMIN_PASSWORD");
        if cfg.admin_user.is_some() != cfg.admin_password.is_some() {
            return Err(anyhow!("FLEETGATE_ADMIN_USER and FLEETGATE_ADMIN_PASSWORD must be set together"));
        }
        Ok(cfg)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: Self::default_http_port(),
            state_file: Self::default_state_file(),
            engine: Self::default_engine(),
            engine_scheme: Self::default_engine_scheme(),
            engine_port: Self::default_engine_port(),
            container_home: Self::default_container_home(),
            deploy_timeout_ms: Self::default_deploy_timeout_ms(),
            deploy_concurrency: None,
            session_ttl_secs: Self::default_session_ttl_secs(),
            secure_cookies: true,
            admin_user: None,
            admin_password: None,
        }
    }
}
