use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use base64::Engine;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("random source unavailable: {0}")]
    Random(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("session lifetime of {0} s is out of range")]
    SessionTtl(u64),
}

/// OAuth2 client credential issued to a host. The id is fixed for the host's
/// lifetime; only the secret rotates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientCredential {
    pub id: String,
    pub secret: String,
}

impl ClientCredential {
    pub fn generate() -> Result<Self, SecurityError> {
        Ok(Self { id: uuid::Uuid::new_v4().to_string(), secret: random_token()? })
    }

    /// Same id, fresh secret.
    pub fn reset(&self) -> Result<Self, SecurityError> {
        Ok(Self { id: self.id.clone(), secret: random_token()? })
    }

    pub fn matches(&self, id: &str, secret: &str) -> bool {
        // Evaluate both comparisons so timing does not reveal which half was wrong.
        let id_ok = constant_time_eq(&self.id, id);
        let secret_ok = constant_time_eq(&self.secret, secret);
        id_ok & secret_ok
    }
}

/// 256-bit random token, base64url without padding. Used for client secrets,
/// session tokens and delegation tokens.
pub fn random_token() -> Result<String, SecurityError> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| SecurityError::Random(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub fn hash_password(password: &str) -> Result<String, SecurityError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| SecurityError::Random(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| SecurityError::Hash(e.to_string()))?;
    let argon2 = Argon2::default();
    let phc = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| SecurityError::Hash(e.to_string()))?
        .to_string();
    Ok(phc)
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        let argon2 = Argon2::default();
        argon2.verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}
