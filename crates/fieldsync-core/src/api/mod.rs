//! REST API module for the operations dashboard backend.
//!
//! This module provides:
//! - `RequestExecutor`: bearer injection with single-flight refresh-and-retry
//! - `ApiClient`: typed fetches for the dashboard, alerts and stats views
//! - `HttpTransport`: the HTTP seam, with `ReqwestTransport` for production
//!
//! The API uses JWT bearer tokens obtained from `/auth/login` and renewed
//! through `/auth/refresh`.

pub mod client;
pub mod error;
pub mod executor;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use client::ApiClient;
pub use error::ApiError;
pub use executor::RequestExecutor;
pub use transport::{ApiResponse, HttpTransport, ReqwestTransport, RequestBody, RequestSpec};
