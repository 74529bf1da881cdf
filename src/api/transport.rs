use std::time::Duration;

use async_trait::async_trait;
use http::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::{SessionError, SessionResult};

/// An outgoing API call, independent of the HTTP client that sends it.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub(crate) retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    /// Sets the Authorization header. Values that are not valid header text are ignored.
    pub fn with_authorization(mut self, value: &str) -> Self {
        self.set_authorization(value);
        self
    }

    pub fn set_authorization(&mut self, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(header) => {
                self.headers.insert(AUTHORIZATION, header);
            }
            Err(_) => debug!("Dropping Authorization value that is not valid header text"),
        }
    }

    pub fn authorization(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
    }

    pub fn is_retry(&self) -> bool {
        self.retried
    }
}

/// A response as seen by the session layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl ApiResponse {
    pub fn new(status: StatusCode, body: Value) -> Self {
        ApiResponse { status, body }
    }

    /// The payload inside the backend's `{ "data": ... }` envelope, or the
    /// whole body when there is no envelope.
    pub fn payload(&self) -> &Value {
        match self.body.get("data") {
            Some(data) => data,
            None => &self.body,
        }
    }

    pub fn data<T: DeserializeOwned>(&self) -> SessionResult<T> {
        serde_json::from_value(self.payload().clone())
            .map_err(|e| SessionError::IncompleteResponse(e.to_string()))
    }

    /// Human readable reason from an error body (`message` or `error`).
    pub fn message(&self) -> String {
        ["message", "error"]
            .iter()
            .find_map(|key| self.body.get(*key).and_then(Value::as_str))
            .map(str::to_string)
            .or_else(|| self.status.canonical_reason().map(str::to_string))
            .unwrap_or_default()
    }

    /// Maps 401 to `Unauthorized` and any other non-2xx status to `Status`.
    pub fn error_for_status(self, endpoint: &str) -> SessionResult<ApiResponse> {
        if self.status.is_success() {
            return Ok(self);
        }
        if self.status == StatusCode::UNAUTHORIZED {
            return Err(SessionError::Unauthorized {
                endpoint: endpoint.to_string(),
            });
        }
        Err(SessionError::Status {
            endpoint: endpoint.to_string(),
            status: self.status,
            message: self.message(),
        })
    }
}

/// Sends requests over the wire. Statuses are returned, never turned into errors.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse>;
}

/// The production transport, built on a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(config: &ApiConfig) -> SessionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_in_ms))
            .build()
            .map_err(|e| SessionError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(ReqwestTransport {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: ApiRequest) -> SessionResult<ApiResponse> {
        let url = self.url(&request.path);
        debug!(method = %request.method, endpoint = %request.path, "Sending request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone());
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        debug!(endpoint = %request.path, status = status.as_u16(), "Received response");
        Ok(ApiResponse { status, body })
    }
}
