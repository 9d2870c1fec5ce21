//! HTTP client for a remote homectl server.
//!
//! [`HomectlClient`] wraps `reqwest::Client` with one typed method per REST
//! endpoint. Request and response bodies are the server's own types from
//! [`homectl::routes`], so both sides agree on the wire format.
//!
//! ## Authentication
//!
//! When the inventory carries an `auth_token` it is sent as a Bearer token.
//! Without one the request goes out bare and the server decides.
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for an `error` field in the JSON body. If
//! parsing fails, the raw response body is returned as the error message.

use std::time::Duration;

use homectl::routes::{HaltPayload, StatusData, WakePayload};
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Url};

/// HTTP client for a single homectl server.
pub struct HomectlClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HomectlClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ClientError::Request)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// The server's base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// `POST /api/wake`
    pub async fn wake(&self, payload: &WakePayload) -> Result<(), ClientError> {
        let resp = self
            .authed(self.http.post(format!("{}/api/wake", self.base_url)))
            .json(payload)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_response(resp).await.map(drop)
    }

    /// `POST /api/halt`
    pub async fn halt(&self, payload: &HaltPayload) -> Result<(), ClientError> {
        let resp = self
            .authed(self.http.post(format!("{}/api/halt", self.base_url)))
            .json(payload)
            .send()
            .await
            .map_err(ClientError::Request)?;
        Self::handle_response(resp).await.map(drop)
    }

    /// `GET /api/status/{host}`. The answer must be JSON.
    pub async fn status(&self, host: &str) -> Result<StatusData, ClientError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::Protocol(format!("Invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::Protocol(format!("Invalid base URL: {}", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "status", host]);

        let resp = self
            .authed(self.http.get(url))
            .send()
            .await
            .map_err(ClientError::Request)?;

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let status = resp.status();
        let body = Self::handle_response(resp).await?;
        if !is_json {
            return Err(ClientError::Protocol(format!(
                "expected application/json from status endpoint (HTTP {status})"
            )));
        }
        serde_json::from_str(&body)
            .map_err(|e| ClientError::Protocol(format!("Invalid status body: {e}")))
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Return the body text on success, or a [`ClientError::Server`] with the
    /// server's message on failure.
    async fn handle_response(resp: reqwest::Response) -> Result<String, ClientError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ClientError::Request)?;

        if status.is_success() {
            Ok(body)
        } else {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"].as_str().map(String::from))
                .unwrap_or(body);
            Err(ClientError::Server {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Errors returned by [`HomectlClient`] methods.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP transport error (connection refused, timeout, DNS failure).
    Request(reqwest::Error),
    /// The server returned a non-2xx HTTP status.
    Server { status: u16, message: String },
    /// The response did not have the expected shape.
    Protocol(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Server { status, message } => {
                write!(f, "Server error (HTTP {}): {}", status, message)
            }
            ClientError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}
