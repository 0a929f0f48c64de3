// Session management: HMAC-signed tokens binding a connection to a player.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::engine::config::{SESSION_ABSOLUTE_SECS, SESSION_IDLE_SECS};
use crate::engine::player::PlayerId;

type HmacSha256 = Hmac<Sha256>;

/// A live session. The token is never stored; it is recomputed from the
/// session fields and the server secret on every validation.
#[derive(Clone, Debug)]
struct Session {
    player_id: PlayerId,
    username: String,
    created_at: i64,
    expires_at: i64,
    last_activity: Instant,
}

/// Credentials handed to the client at welcome time.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub session_id: String,
    pub token: String,
    pub expires_at: i64,
}

/// Issues and validates HMAC-SHA256 session tokens. Validation fails closed:
/// unknown id, expired session, or mismatched token all yield None.
#[derive(Clone)]
pub struct SessionManager {
    secret: Arc<Vec<u8>>,
    inner: Arc<Mutex<HashMap<String, Session>>>,
}

impl SessionManager {
    pub fn new(secret: Vec<u8>) -> Self {
        SessionManager {
            secret: Arc::new(secret),
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn sign(&self, session_id: &str, player_id: PlayerId, username: &str, created_at: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(session_id.as_bytes());
        mac.update(&player_id.to_be_bytes());
        mac.update(username.as_bytes());
        mac.update(&created_at.to_be_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Create a session bound to a player. The id is 16 random bytes hex.
    pub fn create(&self, player_id: PlayerId, username: &str) -> SessionHandle {
        let mut id_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut id_bytes);
        let session_id = hex::encode(id_bytes);

        let created_at = chrono::Utc::now().timestamp();
        let expires_at = created_at + SESSION_ABSOLUTE_SECS;
        let token = self.sign(&session_id, player_id, username, created_at);

        let session = Session {
            player_id,
            username: username.to_string(),
            created_at,
            expires_at,
            last_activity: Instant::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .insert(session_id.clone(), session);

        SessionHandle {
            session_id,
            token,
            expires_at,
        }
    }

    /// Validate a presented (session id, token) pair. The HMAC comparison is
    /// constant time. Success bumps last-activity and returns the bound
    /// player id.
    pub fn validate(&self, session_id: &str, token: &str) -> Option<PlayerId> {
        let token_bytes = hex::decode(token).ok()?;

        let mut sessions = self.inner.lock().unwrap();
        let session = sessions.get_mut(session_id)?;

        let now = chrono::Utc::now().timestamp();
        if now >= session.expires_at {
            return None;
        }
        if session.last_activity.elapsed() > Duration::from_secs(SESSION_IDLE_SECS) {
            return None;
        }

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(session_id.as_bytes());
        mac.update(&session.player_id.to_be_bytes());
        mac.update(session.username.as_bytes());
        mac.update(&session.created_at.to_be_bytes());
        if mac.verify_slice(&token_bytes).is_err() {
            return None;
        }

        session.last_activity = Instant::now();
        Some(session.player_id)
    }

    /// Drop every session bound to a player (ban or eviction path).
    pub fn invalidate_player(&self, player_id: PlayerId) {
        self.inner
            .lock()
            .unwrap()
            .retain(|_, s| s.player_id != player_id);
    }

    /// Remove sessions past the idle or absolute deadline. Returns the
    /// player ids whose sessions were evicted so the registry can drop them.
    pub fn sweep_expired(&self) -> Vec<PlayerId> {
        let now = chrono::Utc::now().timestamp();
        let idle = Duration::from_secs(SESSION_IDLE_SECS);
        let mut evicted = Vec::new();
        self.inner.lock().unwrap().retain(|_, s| {
            let expired = now >= s.expires_at || s.last_activity.elapsed() > idle;
            if expired {
                evicted.push(s.player_id);
            }
            !expired
        });
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    #[cfg(test)]
    fn age_session(&self, session_id: &str, by: Duration) {
        if let Some(s) = self.inner.lock().unwrap().get_mut(session_id) {
            s.last_activity = Instant::now() - by;
        }
    }
}
