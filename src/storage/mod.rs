//!
//! fleetgate storage module
//! ------------------------
//! Process-wide state (hosts, users, delegation tokens) held in memory and persisted
//! as a single JSON snapshot after every committed mutation.
//!
//! Every mutation runs under the store's write lock against a working copy of the
//! state. The copy replaces the live state only after the closure succeeded and the
//! snapshot reached disk, so a failed closure or a failed save leaves both memory
//! and disk untouched and concurrent writers to the same record are serialized.
//!
//! The public API centers around `SharedStore`, a cheap-to-clone handle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::configurations;
use crate::security::{ClientCredential, SecurityError};

mod records;

pub use records::{DelegationRecord, HostRecord, State, UserRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("host not found: {0}")]
    HostNotFound(String),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("snapshot io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Security(#[from] SecurityError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of `upsert_host`.
#[derive(Debug, Clone)]
pub struct HostUpsert {
    pub record: HostRecord,
    pub created: bool,
}

#[derive(Clone)]
pub struct SharedStore {
    state: Arc<Mutex<State>>,
    /// Snapshot file; `None` keeps everything in memory.
    path: Option<Arc<PathBuf>>,
}

impl SharedStore {
    /// Open (or start) a store persisted at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let bytes = std::fs::read(&path)?;
            let state: State = serde_json::from_slice(&bytes)?;
            info!(target: "startup", path = %path.display(), hosts = state.hosts.len(), users = state.users.len(), "loaded state snapshot");
            state
        } else {
            info!(target: "startup", path = %path.display(), "no state snapshot yet, starting empty");
            State::default()
        };
        Ok(Self { state: Arc::new(Mutex::new(state)), path: Some(Arc::new(path)) })
    }

    pub fn in_memory() -> Self {
        Self { state: Arc::new(Mutex::new(State::default())), path: None }
    }

    /// Apply `f` to a working copy of the state and commit it only if `f` succeeds
    /// and the snapshot is saved.
    pub fn commit<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut State) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.state.lock();
        let mut working = guard.clone();
        let out = f(&mut working)?;
        self.save(&working).map_err(E::from)?;
        *guard = working;
        Ok(out)
    }

    fn save(&self, state: &State) -> StoreResult<()> {
        let Some(path) = self.path.as_deref() else { return Ok(()); };
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let bytes = serde_json::to_vec_pretty(state)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, path)?;
        debug!(path = %path.display(), "state snapshot saved");
        Ok(())
    }

    // --- hosts ---

    pub fn hostnames(&self) -> Vec<String> {
        self.state.lock().hosts.keys().cloned().collect()
    }

    pub fn hosts(&self) -> Vec<HostRecord> {
        self.state.lock().hosts.values().cloned().collect()
    }

    pub fn host(&self, hostname: &str) -> Option<HostRecord> {
        self.state.lock().hosts.get(hostname).cloned()
    }

    /// Create the host with fresh credentials, or replace the properties of an
    /// existing one. Credentials of an existing host are never touched here.
    pub fn upsert_host(&self, hostname: &str, properties: Map<String, Value>) -> StoreResult<HostUpsert> {
        self.commit(|state| {
            let now = Utc::now();
            if let Some(existing) = state.hosts.get_mut(hostname) {
                existing.properties = properties;
                existing.updated_at = now;
                existing.version += 1;
                return Ok(HostUpsert { record: existing.clone(), created: false });
            }
            let record = HostRecord {
                hostname: hostname.to_string(),
                properties,
                credential: ClientCredential::generate()?,
                created_at: now,
                updated_at: now,
                version: 1,
            };
            state.hosts.insert(hostname.to_string(), record.clone());
            Ok(HostUpsert { record, created: true })
        })
    }

    /// Rotate the host's client secret, keeping its client id.
    pub fn reset_host_secret(&self, hostname: &str) -> StoreResult<ClientCredential> {
        self.commit(|state| {
            let host = state
                .hosts
                .get_mut(hostname)
                .ok_or_else(|| StoreError::HostNotFound(hostname.to_string()))?;
            host.credential = host.credential.reset()?;
            host.updated_at = Utc::now();
            host.version += 1;
            Ok(host.credential.clone())
        })
    }

    /// Remove a host together with every delegation bound to it.
    pub fn remove_host(&self, hostname: &str) -> StoreResult<HostRecord> {
        self.commit(|state| {
            let removed = state
                .hosts
                .remove(hostname)
                .ok_or_else(|| StoreError::HostNotFound(hostname.to_string()))?;
            state.delegations.retain(|_, d| d.hostname != hostname);
            Ok(removed)
        })
    }

    // --- users ---

    pub fn user(&self, username: &str) -> Option<UserRecord> {
        self.state.lock().users.get(username).cloned()
    }

    pub fn create_user(&self, username: &str, password_hash: Option<String>, admin: bool) -> StoreResult<UserRecord> {
        self.commit(|state| {
            if state.users.contains_key(username) {
                return Err(StoreError::UserExists(username.to_string()));
            }
            let record = UserRecord {
                username: username.to_string(),
                password_hash,
                admin,
                profile: Map::new(),
                configurations: configurations::defaults(),
                version: 1,
            };
            state.users.insert(username.to_string(), record.clone());
            Ok(record)
        })
    }

    /// Mutate one user record. `f` sees a copy; nothing is kept unless it returns `Ok`.
    pub fn update_user<T, E, F>(&self, username: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut UserRecord) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.commit(|state| {
            let user = state
                .users
                .get_mut(username)
                .ok_or_else(|| E::from(StoreError::UserNotFound(username.to_string())))?;
            let out = f(user)?;
            user.version += 1;
            Ok(out)
        })
    }

    // --- delegations ---

    pub fn delegation(&self, token: &str) -> Option<DelegationRecord> {
        self.state.lock().delegations.get(token).cloned()
    }

    pub fn insert_delegation(&self, token: &str, record: DelegationRecord) -> StoreResult<()> {
        self.commit(|state| {
            if !state.hosts.contains_key(&record.hostname) {
                return Err(StoreError::HostNotFound(record.hostname.clone()));
            }
            if !state.users.contains_key(&record.user) {
                return Err(StoreError::UserNotFound(record.user.clone()));
            }
            state.delegations.insert(token.to_string(), record);
            Ok(())
        })
    }
}
