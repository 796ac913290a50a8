use axum::http::{header, HeaderMap};
use base64::Engine;

pub const SESSION_COOKIE: &str = "fleetgate_session";

/// OAuth2 client id/secret presented with HTTP Basic authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSecretPair {
    pub id: String,
    pub secret: String,
}

/// Raw credentials carried by one request, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCredentials {
    pub client: Option<ClientSecretPair>,
    pub session: Option<String>,
    pub bearer: Option<String>,
}

impl RequestCredentials {
    /// Extract whatever credentials are present. Malformed headers count as absent.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut out = Self { session: parse_cookie(headers, SESSION_COOKIE), ..Default::default() };
        let Some(auth) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
            return out;
        };
        let auth = auth.trim();
        if let Some(encoded) = strip_scheme(auth, "Basic") {
            out.client = decode_basic(encoded);
        } else if let Some(token) = strip_scheme(auth, "Bearer") {
            if !token.is_empty() {
                out.bearer = Some(token.to_string());
            }
        }
        out
    }
}

fn strip_scheme<'a>(value: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = value.split_once(' ')?;
    if head.eq_ignore_ascii_case(scheme) { Some(rest.trim()) } else { None }
}

fn decode_basic(encoded: &str) -> Option<ClientSecretPair> {
    let bytes = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(bytes).ok()?;
    let (id, secret) = text.split_once(':')?;
    if id.is_empty() || secret.is_empty() { return None; }
    Some(ClientSecretPair { id: id.to_string(), secret: secret.to_string() })
}

fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(header::COOKIE) {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            if let Some((k, v)) = part.trim().split_once('=') {
                if k == name && !v.is_empty() { return Some(v.to_string()); }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn basic(id: &str, secret: &str) -> HeaderValue {
        let raw = base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", id, secret));
        HeaderValue::from_str(&format!("Basic {}", raw)).unwrap()
    }

    #[test]
    fn basic_auth_yields_client_pair() {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, basic("abc", "s:e:cret"));
        let c = RequestCredentials::from_headers(&h);
        assert_eq!(c.client, Some(ClientSecretPair { id: "abc".into(), secret: "s:e:cret".into() }));
        assert!(c.bearer.is_none());
    }

    #[test]
    fn bearer_and_cookie_are_independent() {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer tok123"));
        h.insert(header::COOKIE, HeaderValue::from_static("theme=dark; fleetgate_session=sess1"));
        let c = RequestCredentials::from_headers(&h);
        assert_eq!(c.bearer.as_deref(), Some("tok123"));
        assert_eq!(c.session.as_deref(), Some("sess1"));
        assert!(c.client.is_none());
    }

    #[test]
    fn garbage_is_ignored() {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!notbase64"));
        assert_eq!(RequestCredentials::from_headers(&h), RequestCredentials::default());
        h.insert(header::AUTHORIZATION, HeaderValue::from_static("Digest abc"));
        assert_eq!(RequestCredentials::from_headers(&h), RequestCredentials::default());
    }
}
