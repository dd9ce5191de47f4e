//! Session record and the host contract around it
//!
//! Sign-in itself happens elsewhere. The client only reads the stored
//! session to build request headers and socket sub-protocols, and asks the
//! host to drop the session and route to sign-in when the backend rejects it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::storage::KeyValueStore;

/// Route the host navigates to when the session is rejected.
pub const SIGN_IN_ROUTE: &str = "sign-in";

/// Stored session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default)]
    pub authenticator: Option<String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Expiry in seconds since the epoch.
    #[serde(default)]
    pub expiration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Token and authenticator header value, when both are present.
    pub fn credentials(&self) -> Option<(&str, &'static str)> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        let authenticator = self.authenticator.as_deref().filter(|a| !a.is_empty())?;
        Some((token, authenticator_name(authenticator)))
    }

    pub fn is_expired(&self, now_secs: f64) -> bool {
        self.expiration.map_or(false, |expiration| expiration < now_secs)
    }
}

/// Short authenticator name sent to the backend.
pub fn authenticator_name(authenticator: &str) -> &'static str {
    if authenticator.contains("google") {
        "google"
    } else {
        ""
    }
}

/// Session management provided by the host.
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// The current session, if one is stored and still valid.
    async fn current(&self) -> Option<Session>;

    /// Forget the stored session.
    async fn invalidate(&self);

    /// Route the user to sign-in.
    fn redirect_to_sign_in(&self);
}

/// Session kept in the client's key-value store.
///
/// With no session key configured (authentication disabled) there is never
/// a session.
pub struct StoredSession {
    store: Arc<dyn KeyValueStore>,
    key: Option<String>,
    signed_out: AtomicBool,
}

impl StoredSession {
    pub fn new(store: Arc<dyn KeyValueStore>, key: Option<String>) -> Self {
        Self {
            store,
            key,
            signed_out: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Whether a redirect to sign-in has been requested.
    pub fn signed_out(&self) -> bool {
        self.signed_out.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHost for StoredSession {
    async fn current(&self) -> Option<Session> {
        let key = self.key.as_deref()?;
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("Failed to read session: {}", e);
                return None;
            }
        };
        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                warn!("Stored session is not valid JSON: {}", e);
                return None;
            }
        };

        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        if session.is_expired(now) {
            warn!("Your session has expired. Please sign in again.");
            self.invalidate().await;
            return None;
        }
        Some(session)
    }

    async fn invalidate(&self) {
        if let Some(key) = &self.key {
            if let Err(e) = self.store.remove(key).await {
                warn!("Failed to remove session: {}", e);
            }
        }
    }

    fn redirect_to_sign_in(&self) {
        self.signed_out.store(true, Ordering::SeqCst);
        warn!("Session rejected by backend; redirecting to {}", SIGN_IN_ROUTE);
    }
}
