use std::sync::{Arc, RwLock, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::{MemorySessionStorage, SessionStorage};
use super::Session;

/// Authentication state as seen by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    LoggedOut,
    LoggedIn,
    /// The session was dropped because a refresh failed; the user must log in again.
    Expired,
}

/// Single source of truth for the current credential pair.
///
/// Clone is cheap and every clone sees the same session. All mutation goes
/// through [`SessionStore::set`] and [`SessionStore::clear`].
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    current: RwLock<Option<Arc<Session>>>,
    storage: Box<dyn SessionStorage>,
    status: watch::Sender<AuthStatus>,
}

impl SessionStore {
    /// Open the store, restoring whatever session the storage holds.
    /// A storage error at startup means "logged out".
    pub fn open(storage: impl SessionStorage + 'static) -> Self {
        let restored = match storage.load() {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Failed to restore session, starting logged out");
                None
            }
        };
        debug!(restored = restored.is_some(), "Session store opened");

        let status = if restored.is_some() {
            AuthStatus::LoggedIn
        } else {
            AuthStatus::LoggedOut
        };

        Self {
            inner: Arc::new(StoreInner {
                current: RwLock::new(restored.map(Arc::new)),
                storage: Box::new(storage),
                status: watch::channel(status).0,
            }),
        }
    }

    /// A store that persists nothing.
    pub fn in_memory() -> Self {
        Self::open(MemorySessionStorage::new())
    }

    /// Current session, if any. Never blocks on I/O.
    pub fn get(&self) -> Option<Arc<Session>> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the session wholesale.
    pub fn set(&self, session: Session) {
        self.replace(Some(session), AuthStatus::LoggedIn);
    }

    /// Remove the session (logout).
    pub fn clear(&self) {
        self.replace(None, AuthStatus::LoggedOut);
    }

    /// Settle a refresh that was started from the session holding `refresh_token`.
    ///
    /// `Some` installs the refreshed session and `None` expires the old one.
    /// Nothing changes when the session was replaced or removed meanwhile;
    /// returns whether the outcome was applied.
    pub(crate) fn replace_if(&self, refresh_token: &str, refreshed: Option<Session>) -> bool {
        let current = self
            .inner
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if current.as_ref().map(|s| s.refresh_token.as_str()) != Some(refresh_token) {
            debug!("Session changed during refresh, discarding outcome");
            return false;
        }
        let status = if refreshed.is_some() {
            AuthStatus::LoggedIn
        } else {
            AuthStatus::Expired
        };
        self.commit(current, refreshed, status);
        true
    }

    pub fn is_authenticated(&self) -> bool {
        self.get().is_some()
    }

    pub fn access_token(&self) -> Option<String> {
        self.get().map(|s| s.access_token.clone())
    }

    pub fn status(&self) -> AuthStatus {
        *self.inner.status.borrow()
    }

    /// Observe login, logout and expiry.
    pub fn watch_status(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    fn replace(&self, session: Option<Session>, status: AuthStatus) {
        let current = self
            .inner
            .current
            .write()
            .unwrap_or_else(|e| e.into_inner());
        self.commit(current, session, status);
    }

    fn commit(
        &self,
        mut current: RwLockWriteGuard<'_, Option<Arc<Session>>>,
        session: Option<Session>,
        status: AuthStatus,
    ) {
        // Persist under the write lock so disk order matches memory order
        let persisted = match &session {
            Some(s) => self.inner.storage.save(s),
            None => self.inner.storage.clear(),
        };
        if let Err(e) = persisted {
            warn!(error = %e, "Failed to persist session change");
        }

        *current = session.map(Arc::new);
        drop(current);

        info!(status = ?status, "Session updated");
        self.inner.status.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{FileSessionStorage, StorageError};

    struct BrokenStorage;

    impl SessionStorage for BrokenStorage {
        fn load(&self) -> Result<Option<Session>, StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
        fn save(&self, _session: &Session) -> Result<(), StorageError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into())
        }
        fn clear(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn session(access: &str) -> Session {
        Session::new(access.to_string(), format!("{}-refresh", access))
    }

    #[test]
    fn test_set_get_clear() {
        let store = SessionStore::in_memory();
        assert!(store.get().is_none());
        assert_eq!(store.status(), AuthStatus::LoggedOut);

        store.set(session("a1"));
        assert!(store.is_authenticated());
        assert_eq!(store.access_token().as_deref(), Some("a1"));
        assert_eq!(store.status(), AuthStatus::LoggedIn);

        store.set(session("a2"));
        assert_eq!(store.access_token().as_deref(), Some("a2"));

        store.clear();
        assert!(store.get().is_none());
        assert!(store.access_token().is_none());
        assert_eq!(store.status(), AuthStatus::LoggedOut);
    }

    #[test]
    fn test_clones_share_state() {
        let store = SessionStore::in_memory();
        let other = store.clone();
        store.set(session("shared"));
        assert_eq!(other.access_token().as_deref(), Some("shared"));
        other.clear();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_restores_from_file_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::open(FileSessionStorage::new(dir.path().to_path_buf()));
            store.set(session("persisted"));
        }
        let reopened = SessionStore::open(FileSessionStorage::new(dir.path().to_path_buf()));
        assert_eq!(reopened.access_token().as_deref(), Some("persisted"));
        assert_eq!(reopened.status(), AuthStatus::LoggedIn);

        reopened.clear();
        let again = SessionStore::open(FileSessionStorage::new(dir.path().to_path_buf()));
        assert!(again.get().is_none());
    }

    #[test]
    fn test_storage_failure_is_logged_out() {
        let store = SessionStore::open(BrokenStorage);
        assert!(store.get().is_none());
        assert_eq!(store.status(), AuthStatus::LoggedOut);

        // Write failures keep the in-memory session for this process
        store.set(session("memory-only"));
        assert_eq!(store.access_token().as_deref(), Some("memory-only"));
    }

    #[test]
    fn test_expire_reports_expired_status() {
        let store = SessionStore::in_memory();
        let mut rx = store.watch_status();
        store.set(session("a"));
        assert!(store.replace_if("a-refresh", None));
        assert!(store.get().is_none());
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), AuthStatus::Expired);
    }

    #[test]
    fn test_replace_if_ignores_a_replaced_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(FileSessionStorage::new(dir.path().to_path_buf()));
        store.set(session("a"));
        store.clear();

        assert!(!store.replace_if("a-refresh", Some(session("b"))));
        assert!(store.get().is_none());
        assert_eq!(store.status(), AuthStatus::LoggedOut);
        let reopened = SessionStore::open(FileSessionStorage::new(dir.path().to_path_buf()));
        assert!(reopened.get().is_none());

        store.set(session("c"));
        assert!(!store.replace_if("a-refresh", None));
        assert_eq!(store.access_token().as_deref(), Some("c"));
        assert_eq!(store.status(), AuthStatus::LoggedIn);

        assert!(store.replace_if("c-refresh", Some(session("d"))));
        assert_eq!(store.access_token().as_deref(), Some("d"));
    }
}
