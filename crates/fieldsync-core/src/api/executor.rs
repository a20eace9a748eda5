//! Authenticated request execution with single-flight credential refresh.
//!
//! Every authenticated call carries the current access token. A 401 triggers
//! at most one refresh shared by all callers that hit it, then exactly one
//! retry per caller. A 401 on the retry is final for that call.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{Session, SessionStore};

use super::transport::{ApiResponse, HttpTransport, RequestSpec};
use super::ApiError;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenResponse {
    fn into_session(self) -> Session {
        if !self.token_type.eq_ignore_ascii_case("bearer") {
            warn!(token_type = %self.token_type, "Unexpected token type, using as bearer");
        }
        Session::new(self.access_token, self.refresh_token)
    }
}

type RefreshOutcome = Result<Arc<Session>, ApiError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// The one refresh currently in flight.
struct PendingRefresh {
    flight: u64,
    handle: SharedRefresh,
}

/// Executes requests against the server on behalf of the current session.
pub struct RequestExecutor<T: HttpTransport> {
    transport: Arc<T>,
    store: SessionStore,
    pending: Arc<Mutex<Option<PendingRefresh>>>,
    next_flight: Arc<AtomicU64>,
}

impl<T: HttpTransport> Clone for RequestExecutor<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            store: self.store.clone(),
            pending: Arc::clone(&self.pending),
            next_flight: Arc::clone(&self.next_flight),
        }
    }
}

impl<T: HttpTransport> RequestExecutor<T> {
    pub fn new(transport: T, store: SessionStore) -> Self {
        Self::from_shared(Arc::new(transport), store)
    }

    pub fn from_shared(transport: Arc<T>, store: SessionStore) -> Self {
        Self {
            transport,
            store,
            pending: Arc::new(Mutex::new(None)),
            next_flight: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    /// Send `spec`, attaching the access token when `requires_auth` is set.
    ///
    /// Statuses other than 401 come back unmodified as `Ok`. A 401 on an
    /// authenticated call is resolved through a shared refresh and one retry;
    /// it fails with `SessionExpired` if the refresh fails and with
    /// `AuthorizationDenied` if the retry is rejected too.
    pub async fn execute(
        &self,
        spec: &RequestSpec,
        requires_auth: bool,
    ) -> Result<ApiResponse, ApiError> {
        if !requires_auth {
            return self.transport.send(spec, None).await;
        }

        let sent_with = self.store.get();
        let bearer = sent_with.as_ref().map(|s| s.access_token.as_str());
        let response = self.transport.send(spec, bearer).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        let Some(sent_with) = sent_with else {
            debug!(path = %spec.path, "Unauthenticated request rejected, no session to refresh");
            return Ok(response);
        };

        let session = self.refreshed_since(&sent_with).await?;
        debug!(path = %spec.path, "Retrying with refreshed credential");
        let retry = self
            .transport
            .send(spec, Some(session.access_token.as_str()))
            .await?;

        if retry.is_unauthorized() {
            warn!(path = %spec.path, "Request rejected again after refresh");
            return Err(ApiError::AuthorizationDenied);
        }
        Ok(retry)
    }

    /// Log in with a username and password and install the new session.
    pub async fn login(&self, username: &str, password: &str) -> Result<Arc<Session>, ApiError> {
        let spec = RequestSpec::post_form(
            LOGIN_PATH,
            &[("username", username), ("password", password)],
        );
        let response = self.transport.send(&spec, None).await?;
        if response.is_unauthorized() {
            return Err(ApiError::InvalidCredentials);
        }

        let tokens: TokenResponse = response.error_for_status()?.json()?;
        let session = tokens.into_session();
        self.store.set(session.clone());
        info!(username = username, "Login successful");
        Ok(Arc::new(session))
    }

    /// Tell the server we're leaving, then drop the session regardless of the answer.
    pub async fn logout(&self) {
        if let Some(session) = self.store.get() {
            let spec = RequestSpec::post_json(LOGOUT_PATH, json!({}));
            match self.transport.send(&spec, Some(&session.access_token)).await {
                Ok(response) if response.is_success() => debug!("Server acknowledged logout"),
                Ok(response) => debug!(status = response.status, "Server rejected logout"),
                Err(e) => debug!(error = %e, "Logout request failed"),
            }
        }
        self.store.clear();
    }

    /// Wait for a credential newer than `stale`, refreshing only if nobody has yet.
    async fn refreshed_since(&self, stale: &Session) -> RefreshOutcome {
        let handle = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            match pending.as_ref() {
                Some(in_flight) => {
                    debug!(flight = in_flight.flight, "Joining refresh in flight");
                    in_flight.handle.clone()
                }
                None => match self.store.get() {
                    None => return Err(ApiError::SessionExpired),
                    // Someone already refreshed after our request went out
                    Some(current) if current.access_token != stale.access_token => {
                        return Ok(current);
                    }
                    Some(current) => self.start_refresh(current.refresh_token.clone(), &mut pending),
                },
            }
        };
        handle.await
    }

    /// Spawn the refresh and park its shared handle in the pending slot.
    /// Must be called with the slot locked.
    fn start_refresh(
        &self,
        refresh_token: String,
        slot: &mut Option<PendingRefresh>,
    ) -> SharedRefresh {
        let flight = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let transport = Arc::clone(&self.transport);
        let store = self.store.clone();
        let pending = Arc::clone(&self.pending);

        // A task of its own, so a cancelled caller doesn't abandon the other waiters
        let task = tokio::spawn(async move {
            info!(flight, "Refreshing access credential");
            let outcome = match request_refresh(transport.as_ref(), &refresh_token).await {
                Ok(session) if store.replace_if(&refresh_token, Some(session.clone())) => {
                    info!(flight, "Credential refreshed");
                    Ok(Arc::new(session))
                }
                Err(e) if store.replace_if(&refresh_token, None) => {
                    warn!(flight, error = %e, "Credential refresh failed, ending session");
                    Err(ApiError::SessionExpired)
                }
                // Logged out or logged in again while the refresh ran
                _ => match store.get() {
                    Some(current) => {
                        debug!(flight, "Refresh superseded by a newer session");
                        Ok(current)
                    }
                    None => {
                        debug!(flight, "Session ended during refresh");
                        Err(ApiError::SessionExpired)
                    }
                },
            };

            let mut slot = pending.lock().unwrap_or_else(|e| e.into_inner());
            if slot.as_ref().is_some_and(|p| p.flight == flight) {
                *slot = None;
            }
            outcome
        });

        let handle = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Refresh task aborted");
                    Err(ApiError::SessionExpired)
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(PendingRefresh {
            flight,
            handle: handle.clone(),
        });
        handle
    }
}

async fn request_refresh<T: HttpTransport>(
    transport: &T,
    refresh_token: &str,
) -> Result<Session, ApiError> {
    let spec = RequestSpec::post_json(REFRESH_PATH, json!({ "refresh_token": refresh_token }));
    let response = transport.send(&spec, None).await?.error_for_status()?;
    let tokens: TokenResponse = response.json()?;
    Ok(tokens.into_session())
}
