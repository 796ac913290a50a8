//!
//! fleetgate HTTP server
//! ---------------------
//! Axum-based HTTP API for the host pool and per-user configuration.
//!
//! Responsibilities:
//! - Session login/logout and administrator-managed accounts.
//! - Host registry: properties, client credentials, engine version, container ports.
//! - User profile and configuration files, patched with RFC 6902 and deployed into
//!   the user's running containers.
//! - Host-bound delegation tokens.
//!
//! Every handler resolves the caller once into an `Identity`, asks the authorization
//! policy, and only then touches the store or an engine.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::config::{Config, EngineKind};
use crate::deploy::{ConfigDeploymentCoordinator, DeployOptions};
use crate::engine::{DockerEngine, EngineClient, MemoryEngine};
use crate::error::{AppError, AppResult};
use crate::identity::{Identity, IdentityResolver, RequestCredentials, SessionManager, Target};
use crate::security;
use crate::storage::SharedStore;

pub mod auth;
pub mod hosts;
pub mod users;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub sessions: Arc<SessionManager>,
    pub resolver: IdentityResolver,
    pub engine: Arc<dyn EngineClient>,
    pub deployer: Arc<ConfigDeploymentCoordinator>,
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(store: SharedStore, engine: Arc<dyn EngineClient>, config: &Config) -> Self {
        let sessions = Arc::new(SessionManager::new(config.session_ttl()));
        let resolver = IdentityResolver::new(store.clone(), sessions.clone());
        let deployer = Arc::new(ConfigDeploymentCoordinator::new(
            store.clone(),
            engine.clone(),
            DeployOptions::from(config),
        ));
        Self { store, sessions, resolver, engine, deployer, secure_cookies: config.secure_cookies }
    }

    /// Resolve the caller of this request against `target`.
    pub fn identify(&self, headers: &HeaderMap, target: Target<'_>) -> Identity {
        let creds = RequestCredentials::from_headers(headers);
        let identity = self.resolver.resolve(&creds, &target);
        debug!(target: "auth", identity = identity.kind(), hostname = ?target.hostname, "request identity resolved");
        identity
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "fleetgate ok" }))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/users", post(users::create_account))
        .route("/hosts", get(hosts::list_hosts))
        .route("/hosts/{hostname}", get(hosts::get_host).post(hosts::post_host).delete(hosts::delete_host))
        .route("/hosts/{hostname}/credentials", get(hosts::get_credentials).delete(hosts::reset_credentials))
        .route("/hosts/{hostname}/version", get(hosts::get_version))
        .route("/hosts/{hostname}/{container}/{port}", get(hosts::get_port))
        .route("/user", get(users::get_profile).patch(users::patch_profile))
        .route("/user/configurations", get(users::get_configurations).patch(users::patch_configurations))
        .route("/user/configurations/{file}", delete(users::reset_configuration).put(users::deploy_configuration))
        .route("/user/delegations", post(users::create_delegation))
        .with_state(state)
}

/// Start the fleetgate HTTP server.
///
/// Opens the state snapshot, ensures the bootstrap administrator, picks the engine
/// backend and serves until the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        target: "startup",
        state_file = %config.state_file.display(),
        engine = ?config.engine,
        container_home = %config.container_home,
        deploy_timeout_ms = config.deploy_timeout_ms,
        deploy_concurrency = ?config.deploy_concurrency,
        secure_cookies = config.secure_cookies,
        "fleetgate configuration"
    );
    if !config.secure_cookies {
        warn!(target: "startup", "session cookies are sent without the Secure attribute");
    }
    let store = SharedStore::open(&config.state_file)
        .with_context(|| format!("While opening state snapshot {}", config.state_file.display()))?;
    ensure_bootstrap_admin(&store, &config).context("While ensuring bootstrap administrator")?;

    let engine: Arc<dyn EngineClient> = match config.engine {
        EngineKind::Docker => Arc::new(
            DockerEngine::new(&config.engine_scheme, config.engine_port, config.deploy_timeout())
                .context("While building engine client")?,
        ),
        EngineKind::Memory => {
            warn!(target: "startup", "using in-memory engine, no real containers will be reached");
            Arc::new(MemoryEngine::new())
        }
    };

    let app = router(AppState::new(store, engine, &config));
    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!(target: "startup", "Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Create the configured administrator if the account does not exist yet.
/// An existing account is left as it is.
pub fn ensure_bootstrap_admin(store: &SharedStore, config: &Config) -> anyhow::Result<()> {
    let (Some(username), Some(password)) = (&config.admin_user, &config.admin_password) else {
        return Ok(());
    };
    if let Some(existing) = store.user(username) {
        if !existing.admin {
            warn!(target: "startup", username = %username, "bootstrap administrator exists without admin rights");
        }
        return Ok(());
    }
    let hash = security::hash_password(password)?;
    store.create_user(username, Some(hash), true)?;
    info!(target: "startup", username = %username, "bootstrap administrator created");
    Ok(())
}

static HOST_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static hostname label pattern")
});

/// RFC 1123 hostname, returned lowercased.
pub fn validate_hostname(raw: &str) -> AppResult<String> {
    let name = raw.trim_end_matches('.').to_ascii_lowercase();
    let ok = !name.is_empty() && name.len() <= 253 && name.split('.').all(|label| HOST_LABEL.is_match(label));
    if ok {
        Ok(name)
    } else {
        Err(AppError::validation("invalid_hostname".to_string(), format!("invalid hostname: {:?}", raw)))
    }
}

/// Decode a buffered JSON body into `T`, classifying failures as validation errors.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &Bytes) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| AppError::validation("bad_json".to_string(), format!("invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hostnames_follow_rfc1123() {
        assert_eq!(validate_hostname("Node1.Example.COM").unwrap(), "node1.example.com");
        assert_eq!(validate_hostname("node-1.example.com.").unwrap(), "node-1.example.com");
        assert!(validate_hostname("localhost").is_ok());
        assert!(validate_hostname("").is_err());
        assert!(validate_hostname("-node.example.com").is_err());
        assert!(validate_hostname("node-.example.com").is_err());
        assert!(validate_hostname("node..example.com").is_err());
        assert!(validate_hostname("node_1.example.com").is_err());
        assert!(validate_hostname(&"a".repeat(64)).is_err());
        assert!(validate_hostname(&["abc"; 70].join(".")).is_err());
    }

    #[test]
    fn bootstrap_admin_is_created_once() {
        let store = SharedStore::in_memory();
        let config = Config {
            admin_user: Some("root@example.com".into()),
            admin_password: Some("hunter2".into()),
            ..Config::default()
        };
        ensure_bootstrap_admin(&store, &config).unwrap();
        let first = store.user("root@example.com").unwrap();
        assert!(first.admin);
        ensure_bootstrap_admin(&store, &config).unwrap();
        assert_eq!(store.user("root@example.com").unwrap().version, first.version);
    }
}
