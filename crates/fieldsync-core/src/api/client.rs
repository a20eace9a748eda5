//! Typed API client for the operations dashboard backend.
//!
//! `ApiClient` wraps a [`RequestExecutor`] and turns the server's JSON into
//! the models in [`crate::models`]. All calls are authenticated.

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::models::{AlertPage, Dashboard, Identity, SystemStats};

use super::executor::RequestExecutor;
use super::transport::{HttpTransport, RequestSpec};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

pub const DASHBOARD_PATH: &str = "/dashboard";
pub const OPEN_ALERTS_PATH: &str = "/api/alerts/open";
pub const STATS_PATH: &str = "/api/stats";
pub const ME_PATH: &str = "/auth/me";

/// Largest page the server accepts.
const MAX_ALERT_PAGE_SIZE: u32 = 500;

pub struct ApiClient<T: HttpTransport> {
    executor: RequestExecutor<T>,
}

impl<T: HttpTransport> Clone for ApiClient<T> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
        }
    }
}

impl<T: HttpTransport> ApiClient<T> {
    pub fn new(executor: RequestExecutor<T>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &RequestExecutor<T> {
        &self.executor
    }

    /// Execute an authenticated request and decode a successful JSON body.
    pub async fn get_json<R: DeserializeOwned>(&self, spec: &RequestSpec) -> Result<R, ApiError> {
        let response = self.executor.execute(spec, true).await?.error_for_status()?;
        debug!(path = %spec.path, bytes = response.body.len(), "Response received");
        response.json()
    }

    // ===== Data Fetching Methods =====

    /// Fetch the dashboard snapshot (KPIs, modules, latest alerts)
    pub async fn fetch_dashboard(&self) -> Result<Dashboard, ApiError> {
        self.get_json(&RequestSpec::get(DASHBOARD_PATH)).await
    }

    /// Fetch one page of open alerts
    pub async fn fetch_open_alerts(&self, skip: u32, limit: u32) -> Result<AlertPage, ApiError> {
        self.get_json(&open_alerts_request(skip, limit)).await
    }

    /// Fetch system-wide counters (manager role)
    pub async fn fetch_stats(&self) -> Result<SystemStats, ApiError> {
        self.get_json(&RequestSpec::get(STATS_PATH)).await
    }

    /// Fetch the identity behind the current session
    pub async fn me(&self) -> Result<Identity, ApiError> {
        self.get_json(&RequestSpec::get(ME_PATH)).await
    }
}

fn open_alerts_request(skip: u32, limit: u32) -> RequestSpec {
    RequestSpec::get(OPEN_ALERTS_PATH)
        .with_query("skip", skip)
        .with_query("limit", limit.clamp(1, MAX_ALERT_PAGE_SIZE))
}
