//! HTTP client for the backend.
//!
//! Every request is adapted to the backend's routes and field names, carries
//! the session headers, and is retried according to the [`RetryPolicy`].
//! Retry decisions are made here and nowhere else.

use crate::config::{ClientConfig, ConfigError};
use crate::error::{Result, SyncError};
use crate::session::SessionProvider;
use fieldsync_engine::{ApiRequest, ApiResponse, Attempt, Method, RequestAdapter, RetryPolicy};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::fmt;
use std::sync::Arc;

/// Why one attempt did not produce a success response.
enum Failure {
    Response(ApiResponse),
    Transport(reqwest::Error),
}

impl Failure {
    fn attempt(&self) -> Attempt {
        match self {
            Failure::Response(response) => Attempt::Status(response.status),
            Failure::Transport(e) if e.is_connect() => Attempt::ConnectFailed,
            Failure::Transport(_) => Attempt::NoResponse,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Response(response) => write!(f, "status {}", response.status),
            Failure::Transport(e) => write!(f, "{e}"),
        }
    }
}

/// HTTP client bound to one backend and one session.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    session: Arc<dyn SessionProvider>,
    adapter: RequestAdapter,
    retry: RetryPolicy,
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    /// Create a client with the standard endpoint table.
    pub fn new(config: &ClientConfig, session: Arc<dyn SessionProvider>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            session,
            adapter: RequestAdapter::standard(),
            retry: config.retry,
        })
    }

    /// Builder-style method replacing the endpoint table.
    pub fn with_adapter(mut self, adapter: RequestAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send an internal request and return the response in the internal shape.
    ///
    /// Non-success responses become errors: 401 (and token-related 403)
    /// notify the session and yield [`SyncError::Unauthorized`].
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let adapted = self.adapter.adapt_request(request);
        if !adapted.mapped {
            tracing::debug!(path = %request.path, backend_path = %adapted.request.path, "No endpoint mapping, using fallback path");
        }

        let url = format!("{}{}", self.base_url, adapted.request.path);
        let method = request.method;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let failure = match self.send_once(&url, &adapted.request).await {
                Ok(response) if response.is_success() => {
                    tracing::debug!(%method, path = %adapted.request.path, status = response.status, attempts, "Request succeeded");
                    return Ok(self.adapter.adapt_response(request, response));
                }
                Ok(response) => Failure::Response(response),
                Err(e) => Failure::Transport(e),
            };

            if self.retry.should_retry(method, failure.attempt(), attempts) {
                let delay = self.retry.delay_for(attempts - 1);
                tracing::warn!(
                    %method,
                    path = %adapted.request.path,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    reason = %failure,
                    "Request failed, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return Err(self.into_error(method, &adapted.request.path, failure));
        }
    }

    async fn send_once(&self, url: &str, request: &ApiRequest) -> std::result::Result<ApiResponse, reqwest::Error> {
        let mut builder = self
            .client
            .request(to_reqwest_method(request.method), url)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");

        if let Some(token) = self.session.bearer_token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }
        if let Some(user_id) = self.session.user_id() {
            builder = builder.header("X-User-ID", user_id);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        Ok(ApiResponse::new(status, parse_body(&text)))
    }

    fn into_error(&self, method: Method, path: &str, failure: Failure) -> SyncError {
        match failure {
            Failure::Response(response) => {
                let err = SyncError::from_response(response.status, &response.body);
                if let SyncError::Unauthorized(detail) = &err {
                    tracing::warn!(%method, path, status = response.status, detail = %detail, "Credentials rejected");
                    self.session.on_unauthorized();
                } else {
                    tracing::debug!(%method, path, error = %err, "Request rejected");
                }
                err
            }
            Failure::Transport(e) if e.is_connect() => {
                tracing::debug!(%method, path, error = %e, "Backend unreachable");
                SyncError::NetworkUnreachable(e.to_string())
            }
            Failure::Transport(e) => {
                tracing::debug!(%method, path, error = %e, "No response from backend");
                SyncError::ResponseLost(e.to_string())
            }
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

/// JSON body, or the raw text when the backend did not send JSON.
fn parse_body(text: &str) -> serde_json::Value {
    if text.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| serde_json::Value::String(text.to_string()))
}
