use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::info;

use super::{parse_json, AppState};
use crate::error::{AppError, AppResult};
use crate::identity::{RequestCredentials, SESSION_COOKIE};
use crate::security;

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    pub username: String,
    pub password: String,
}

fn set_session_cookie(token: &str, max_age_secs: u64, secure: bool) -> AppResult<HeaderValue> {
    // HttpOnly cookie scoped to path / with SameSite=Strict; Secure unless turned off
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly;{} SameSite=Strict; Path=/; Max-Age={}",
        SESSION_COOKIE,
        token,
        if secure { " Secure;" } else { "" },
        max_age_secs
    ))
    .map_err(|e| AppError::internal("cookie".to_string(), e.to_string()))
}

fn clear_session_cookie(secure: bool) -> HeaderValue {
    if secure {
        HeaderValue::from_static("fleetgate_session=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; Secure; SameSite=Strict; Path=/")
    } else {
        HeaderValue::from_static("fleetgate_session=deleted; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly; SameSite=Strict; Path=/")
    }
}

fn bad_login() -> AppError {
    AppError::unauthenticated("bad_credentials".to_string(), "invalid username or password".to_string())
}

pub async fn login(State(state): State<AppState>, body: Bytes) -> AppResult<impl IntoResponse> {
    let payload: LoginPayload = parse_json(&body)?;
    let user = state.store.user(&payload.username).ok_or_else(bad_login)?;
    let hash = user.password_hash.as_deref().ok_or_else(bad_login)?;
    if !security::verify_password(hash, &payload.password) {
        info!(target: "auth", username = %payload.username, "login rejected");
        return Err(bad_login());
    }
    let session = state.sessions.issue(&user.username)?;
    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, set_session_cookie(&session.token, state.sessions.ttl.as_secs(), state.secure_cookies)?);
    info!(target: "auth", username = %user.username, admin = user.admin, "login");
    Ok((StatusCode::OK, headers, Json(serde_json::json!({"status": "ok", "username": user.username}))))
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = RequestCredentials::from_headers(&headers).session {
        state.sessions.logout(&token);
    }
    let mut h = HeaderMap::new();
    h.insert(header::SET_COOKIE, clear_session_cookie(state.secure_cookies));
    (StatusCode::NO_CONTENT, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_attribute_follows_config() {
        let secure = set_session_cookie("tok", 60, true).unwrap();
        let secure = secure.to_str().unwrap();
        assert!(secure.starts_with("fleetgate_session=tok;"));
        assert!(secure.contains("; Secure;"));
        assert!(secure.contains("HttpOnly"));
        assert!(secure.ends_with("Max-Age=60"));

        let plain = set_session_cookie("tok", 60, false).unwrap();
        assert!(!plain.to_str().unwrap().contains("Secure"));
        assert!(!clear_session_cookie(false).to_str().unwrap().contains("Secure"));
        assert!(clear_session_cookie(true).to_str().unwrap().contains("Secure"));
    }
}
