//! HTTP transport seam.
//!
//! The executor talks to the server through [`HttpTransport`] so the
//! refresh-and-retry logic can be driven by an in-memory fake in tests.
//! [`ReqwestTransport`] is the production implementation.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// A request described independently of credentials, so it can be re-sent
/// after a refresh.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/api/alerts/open`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post_json(path: impl Into<String>, body: Value) -> Self {
        Self {
            body: Some(RequestBody::Json(body)),
            ..Self::new(Method::POST, path)
        }
    }

    pub fn post_form(path: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        let fields = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            body: Some(RequestBody::Form(fields)),
            ..Self::new(Method::POST, path)
        }
    }

    pub fn with_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The server's authorization-denied status.
    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Map non-2xx statuses to an [`ApiError`].
    pub fn error_for_status(self) -> Result<Self, ApiError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ApiError::from_status(self.status, &self.body))
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON: {}", e)))
    }
}

/// Sends one HTTP request, optionally with a bearer credential.
///
/// Implementations must not retry; the executor decides how many calls a
/// logical request costs.
pub trait HttpTransport: Send + Sync + 'static {
    fn send(
        &self,
        request: &RequestSpec,
        bearer: Option<&str>,
    ) -> impl Future<Output = Result<ApiResponse, ApiError>> + Send;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &RequestSpec,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path))
            .header(reqwest::header::ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match &request.body {
            Some(RequestBody::Json(body)) => builder.json(body),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let spec = RequestSpec::get("/api/alerts/open").with_query("limit", 10);
        assert_eq!(spec.method, Method::GET);
        assert_eq!(spec.query, vec![("limit".to_string(), "10".to_string())]);
        assert!(spec.body.is_none());

        let login = RequestSpec::post_form("/auth/login", &[("username", "u"), ("password", "p")]);
        assert_eq!(login.method, Method::POST);
        assert!(matches!(login.body, Some(RequestBody::Form(ref f)) if f.len() == 2));
    }

    #[test]
    fn test_url_joining() {
        let transport =
            ReqwestTransport::new("http://localhost:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url("/dashboard"), "http://localhost:8000/dashboard");
        assert_eq!(transport.url("api/stats"), "http://localhost:8000/api/stats");
    }

    #[test]
    fn test_response_helpers() {
        let ok = ApiResponse::new(200, r#"{"email":"a@b.c"}"#);
        assert!(ok.is_success());
        let value: Value = ok.json().unwrap();
        assert_eq!(value["email"], "a@b.c");

        let denied = ApiResponse::new(401, "");
        assert!(denied.is_unauthorized());
        assert_eq!(denied.error_for_status(), Err(ApiError::Unauthorized));

        let garbage = ApiResponse::new(200, "<html>");
        assert!(matches!(garbage.json::<Value>(), Err(ApiError::InvalidResponse(_))));
    }
}
