use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use parking_lot::RwLock;
use tracing::debug;

pub type SessionToken = String;

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    /// Principal id (lower-cased email). Role is resolved per request.
    pub user_id: String,
    pub issued_at: Instant,
    pub expires_at: Instant,
}

fn gen_token() -> Result<String, getrandom::Error> { token_from(getrandom::getrandom) }

// 256-bit random token, base64url without padding
fn token_from(fill: impl FnOnce(&mut [u8]) -> Result<(), getrandom::Error>) -> Result<String, getrandom::Error> {
    let mut buf = [0u8; 32];
    fill(&mut buf[..])?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// In-process session table. Clones share the same table.
#[derive(Clone)]
pub struct SessionManager {
    pub ttl: Duration,
    sessions: Arc<RwLock<HashMap<SessionToken, Session>>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self { Self { ttl, sessions: Arc::new(RwLock::new(HashMap::new())) } }

    /// Fails only when the OS random source does.
    pub fn issue(&self, user_id: &str) -> Result<Session, getrandom::Error> {
        let token = gen_token()?;
        let now = Instant::now();
        let sess = Session { token, user_id: user_id.to_string(), issued_at: now, expires_at: now + self.ttl };
        self.sessions.write().insert(sess.token.clone(), sess.clone());
        debug!(target: "auth", user = user_id, ttl_secs = self.ttl.as_secs(), "session issued");
        Ok(sess)
    }

    /// User id for a live token. Expired tokens are dropped on sight.
    pub fn validate(&self, token: &str) -> Option<String> {
        let now = Instant::now();
        let expired = {
            let map = self.sessions.read();
            match map.get(token) {
                Some(s) if s.expires_at > now => return Some(s.user_id.clone()),
                Some(_) => true,
                None => false,
            }
        };
        if expired { self.sessions.write().remove(token); }
        None
    }

    pub fn logout(&self, token: &str) -> bool { self.sessions.write().remove(token).is_some() }

    /// Drop every session of one user. Returns how many were removed.
    pub fn revoke_user(&self, user_id: &str) -> usize {
        let mut w = self.sessions.write();
        let before = w.len();
        w.retain(|_, s| s.user_id != user_id);
        before - w.len()
    }
}
