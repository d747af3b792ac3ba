//! Session keeper: issues, renews, and closes the visitor session.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use livechat_core::RuntimeConfig;

use crate::store::{SessionStore, StoreOptions};

/// Storage key for the session identifier.
pub const SESSION_ID_KEY: &str = "livechat_session_id";
/// Storage key for the session expiry timestamp.
pub const SESSION_EXPIRY_KEY: &str = "livechat_session_expiry";
/// Storage key for the consent-accepted flag.
pub const CONSENT_KEY: &str = "consent_accepted";

type ExpiryCallback = Box<dyn Fn() + Send + Sync>;

/// Owns the visitor-scoped session identifier with expiry and inactivity
/// timeout. At most one live session id/expiry pair exists in storage, and
/// at most one inactivity timer is ever armed.
pub struct SessionKeeper {
    store: Arc<dyn SessionStore>,
    runtime: RuntimeConfig,
    inactivity_timer: Mutex<Option<JoinHandle<()>>>,
    on_expired: Mutex<Option<ExpiryCallback>>,
}

impl SessionKeeper {
    pub fn new(store: Arc<dyn SessionStore>, runtime: RuntimeConfig) -> Self {
        Self {
            store,
            runtime,
            inactivity_timer: Mutex::new(None),
            on_expired: Mutex::new(None),
        }
    }

    /// Register a callback invoked whenever the session is closed.
    pub fn set_on_expired(&self, callback: impl Fn() + Send + Sync + 'static) {
        *self.on_expired.lock().unwrap() = Some(Box::new(callback));
    }

    /// Return the live session id, creating or renewing as needed.
    ///
    /// Missing or expired session ⇒ a fresh random id with a fresh expiry;
    /// otherwise the existing id with its expiry pushed forward. Both are
    /// persisted as path-scoped, secure entries.
    pub fn ensure_session(&self) -> String {
        let existing = self.current_session_id();
        let session_id = match existing {
            Some(id) => {
                debug!(session_id = %id, "Renewing existing session");
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                info!(session_id = %id, "Created new session");
                id
            }
        };
        self.persist(&session_id);
        session_id
    }

    /// The stored session id, if present and unexpired.
    pub fn current_session_id(&self) -> Option<String> {
        let id = self.store.get(SESSION_ID_KEY)?;
        let expiry = self.store.get(SESSION_EXPIRY_KEY)?;
        let expiry: chrono::DateTime<Utc> = expiry.parse().ok()?;
        if expiry < Utc::now() || id.is_empty() {
            return None;
        }
        Some(id)
    }

    fn persist(&self, session_id: &str) {
        let expiry = Utc::now()
            + chrono::Duration::from_std(self.runtime.session_duration)
                .unwrap_or_else(|_| chrono::Duration::minutes(10));
        let options = StoreOptions::session(expiry);

        // Storage failures are non-fatal: chat works without persistence.
        if let Err(err) = self.store.set(SESSION_ID_KEY, session_id, &options) {
            warn!(error = %err, "Failed to persist session id");
            return;
        }
        if let Err(err) = self.store.set(SESSION_EXPIRY_KEY, &expiry.to_rfc3339(), &options) {
            warn!(error = %err, "Failed to persist session expiry");
        }
    }

    /// Arm (or re-arm) the single inactivity timer. Every call replaces any
    /// previously armed timer; when it fires, the session is closed.
    pub fn schedule_inactivity_close(self: &Arc<Self>) {
        let timeout = self.runtime.inactivity_timeout;
        let keeper = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            info!("Inactivity timeout reached, closing session");
            keeper.close_session();
        });

        let mut timer = self.inactivity_timer.lock().unwrap();
        if let Some(previous) = timer.replace(handle) {
            previous.abort();
        }
    }

    /// Remove the persisted session and consent flag and notify the expiry
    /// callback. Idempotent.
    pub fn close_session(&self) {
        self.store.remove(SESSION_ID_KEY);
        self.store.remove(SESSION_EXPIRY_KEY);
        self.store.remove(CONSENT_KEY);
        debug!("Session closed");
        if let Some(callback) = self.on_expired.lock().unwrap().as_ref() {
            callback();
        }
    }

    /// Cancel any armed inactivity timer without closing the session.
    pub fn cancel_timers(&self) {
        if let Some(handle) = self.inactivity_timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl Drop for SessionKeeper {
    fn drop(&mut self) {
        if let Some(handle) = self.inactivity_timer.lock().unwrap().take() {
            handle.abort();
        }
    }
}
