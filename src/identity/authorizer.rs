use axum::http::HeaderMap;
use tracing::debug;

use super::principal::Principal;
use super::provider::{AuthError, AuthProvider};

/// Default name of the session cookie.
pub const DEFAULT_SESSION_COOKIE: &str = "__session";

pub fn parse_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    for cookie in headers.get_all(axum::http::header::COOKIE).iter() {
        let Ok(s) = cookie.to_str() else { continue; };
        for part in s.split(';') {
            let p = part.trim();
            if let Some((k, v)) = p.split_once('=') {
                if k == name && !v.is_empty() { return Some(v.to_string()); }
            }
        }
    }
    None
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let v = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = v.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() { Some(token.trim().to_string()) } else { None }
}

/// Session token from the session cookie, falling back to `Authorization: Bearer`.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    parse_cookie(headers, cookie_name).or_else(|| bearer_token(headers))
}

/// Any signed-in user with a `users` profile.
pub fn require_user(provider: &dyn AuthProvider, headers: &HeaderMap, cookie_name: &str) -> Result<Principal, AuthError> {
    let Some(token) = session_token(headers, cookie_name) else { return Err(AuthError::Unauthorized); };
    match provider.principal_for_token(&token)? {
        Some(p) => Ok(p),
        None => Err(AuthError::Unauthorized),
    }
}

/// Signed-in user whose stored role is `admin`.
pub fn require_admin(provider: &dyn AuthProvider, headers: &HeaderMap, cookie_name: &str) -> Result<Principal, AuthError> {
    let p = require_user(provider, headers, cookie_name)?;
    if !p.is_admin() {
        debug!(target: "auth", user = %p.id, "admin route refused for non-admin");
        return Err(AuthError::Forbidden);
    }
    Ok(p)
}
