use std::collections::HashMap;
use std::time::{Duration, Instant};
use parking_lot::RwLock;
use crate::security::{random_token, SecurityError};
use crate::tprintln;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub username: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

/// In-memory login sessions. Sessions do not survive a restart.
pub struct SessionManager {
    pub ttl: Duration,
    sessions: RwLock<HashMap<SessionToken, Session>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, sessions: RwLock::new(HashMap::new()) }
    }

    /// Start a session for `username`. Expired sessions are swept out first.
    pub fn issue(&self, username: &str) -> Result<Session, SecurityError> {
        let now = Instant::now();
        let expires_at = now.checked_add(self.ttl).ok_or(SecurityError::SessionTtl(self.ttl.as_secs()))?;
        let sess = Session {
            token: random_token()?,
            username: username.to_string(),
            issued_at: now,
            expires_at,
        };
        let mut sessions = self.sessions.write();
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(sess.token.clone(), sess.clone());
        drop(sessions);
        tprintln!("session.issue user={} ttl_secs={}", username, self.ttl.as_secs());
        Ok(sess)
    }

    /// Username behind a live session token. Expired sessions are dropped on sight.
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        let expired = {
            let map = self.sessions.read();
            match map.get(token) {
                Some(s) if s.expires_at > now => return Some(s.username.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired {
            self.logout(token);
        }
        None
    }

    /// Sessions currently held, expired or not.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn logout(&self, token: &str) -> bool {
        let removed = self.sessions.write().remove(token);
        if let Some(sess) = &removed {
            tprintln!("session.logout user={}", sess.username);
        }
        removed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_validate_logout() {
        let sm = SessionManager::default();
        let s = sm.issue("ada@example.com").unwrap();
        assert_eq!(sm.validate(&s.token).as_deref(), Some("ada@example.com"));
        assert!(sm.logout(&s.token));
        assert!(sm.validate(&s.token).is_none());
        assert!(!sm.logout(&s.token));
    }

    #[test]
    fn expired_sessions_do_not_validate() {
        let sm = SessionManager::new(Duration::from_millis(0));
        let s = sm.issue("ada@example.com").unwrap();
        assert!(sm.validate(&s.token).is_none());
    }

    #[test]
    fn issuing_sweeps_abandoned_sessions() {
        let sm = SessionManager::new(Duration::from_millis(0));
        for _ in 0..50 {
            sm.issue("ada@example.com").unwrap();
        }
        assert!(sm.len() <= 1);

        let live = SessionManager::new(Duration::from_secs(60));
        live.issue("ada@example.com").unwrap();
        live.issue("bob@example.com").unwrap();
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn oversized_ttl_is_an_error() {
        let sm = SessionManager::new(Duration::from_secs(u64::MAX));
        assert!(matches!(sm.issue("ada@example.com"), Err(SecurityError::SessionTtl(_))));
        assert!(sm.is_empty());
    }
}
