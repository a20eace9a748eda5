//! In-memory stand-in for the server, shared by the executor and sync tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;

use super::executor::{LOGIN_PATH, LOGOUT_PATH, REFRESH_PATH};
use super::transport::{ApiResponse, HttpTransport, RequestBody, RequestSpec};
use super::ApiError;

pub(crate) struct FakeServer {
    valid_access: Mutex<Option<String>>,
    pub refresh_ok: AtomicBool,
    pub refresh_calls: AtomicUsize,
    calls: Mutex<Vec<(String, Option<String>)>>,
    canned: Mutex<HashMap<String, (u16, String)>>,
    denied: Mutex<HashSet<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl FakeServer {
    pub fn new(valid_access: &str) -> Arc<Self> {
        Arc::new(Self {
            valid_access: Mutex::new(Some(valid_access.to_string())),
            refresh_ok: AtomicBool::new(true),
            refresh_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            canned: Mutex::new(HashMap::new()),
            denied: Mutex::new(HashSet::new()),
            gate: Mutex::new(None),
        })
    }

    /// Answer authorized calls to `path` with a fixed status and body.
    pub fn respond(&self, path: &str, status: u16, body: &str) {
        self.canned
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Reject every call to `path` with 401, whatever the credential.
    pub fn deny_always(&self, path: &str) {
        self.denied.lock().unwrap().insert(path.to_string());
    }

    /// Expire the current access token server-side.
    pub fn revoke_access(&self) {
        *self.valid_access.lock().unwrap() = None;
    }

    /// Bearer tokens sent to `path`, in call order.
    pub fn calls_to(&self, path: &str) -> Vec<Option<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, bearer)| bearer.clone())
            .collect()
    }

    /// Park data fetches until permits are added to the returned semaphore.
    pub fn hold_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    fn json(status: u16, body: serde_json::Value) -> Result<ApiResponse, ApiError> {
        Ok(ApiResponse::new(status, body.to_string()))
    }
}

impl HttpTransport for FakeServer {
    async fn send(
        &self,
        request: &RequestSpec,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let seq = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((request.path.clone(), bearer.map(str::to_string)));
            calls.iter().filter(|(p, _)| *p == request.path).count()
        };

        match request.path.as_str() {
            LOGIN_PATH => {
                let password_ok = matches!(
                    &request.body,
                    Some(RequestBody::Form(fields))
                        if fields.iter().any(|(k, v)| k == "password" && v == "correct")
                );
                if !password_ok {
                    return Self::json(401, json!({"detail": "Incorrect email or password"}));
                }
                *self.valid_access.lock().unwrap() = Some("login-access".to_string());
                Self::json(
                    200,
                    json!({"access_token": "login-access", "refresh_token": "login-refresh", "token_type": "bearer"}),
                )
            }
            REFRESH_PATH => {
                let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(10)).await;
                if !self.refresh_ok.load(Ordering::SeqCst) {
                    return Self::json(401, json!({"detail": "Invalid refresh token"}));
                }
                let access = format!("fresh-{}", n);
                *self.valid_access.lock().unwrap() = Some(access.clone());
                Self::json(
                    200,
                    json!({"access_token": access, "refresh_token": format!("refresh-{}", n)}),
                )
            }
            LOGOUT_PATH => Self::json(200, json!({"message": "Successfully logged out"})),
            path => {
                let gate = self.gate.lock().unwrap().clone();
                if let Some(gate) = gate {
                    gate.acquire().await.expect("gate closed").forget();
                }
                if self.denied.lock().unwrap().contains(path) {
                    return Ok(ApiResponse::new(401, "denied"));
                }
                let valid = self.valid_access.lock().unwrap().clone();
                if bearer.is_none() || bearer.map(str::to_string) != valid {
                    return Ok(ApiResponse::new(401, "Could not validate credentials"));
                }
                if let Some((status, body)) = self.canned.lock().unwrap().get(path).cloned() {
                    return Ok(ApiResponse::new(status, body));
                }
                Self::json(200, json!({"path": path, "seq": seq}))
            }
        }
    }
}
