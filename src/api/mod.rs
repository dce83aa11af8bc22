//! Credentialed HTTP access to the document-chat server.
//!
//! One shared `reqwest` client for plain JSON calls and a second one
//! without an overall timeout for event-stream responses. Session cookies
//! come from the [`CredentialStore`] and are refreshed from `Set-Cookie`
//! headers on every response, so a `/refresh` or `/login` transparently
//! rotates the persisted tokens.

pub mod credentials;

use crate::config::Config;
use crate::error::{ClientError, Result};
use credentials::CredentialStore;
use reqwest::header;
use reqwest::{Client, Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    stream_http: Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        credentials: Arc<CredentialStore>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()?;
        // No overall timeout here: a generation stream legitimately stays
        // open far longer than any plain request.
        let stream_http = Client::builder().connect_timeout(connect_timeout).build()?;

        Ok(Self {
            http,
            stream_http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    /// Build a client from config, with cookies persisted next to it.
    pub fn from_config(config: &Config) -> Result<Self> {
        let credentials = Arc::new(CredentialStore::load(config.credentials_path()));
        Self::new(
            &config.base_url,
            credentials,
            Duration::from_secs(config.connect_timeout_secs),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        credentialed: bool,
        event_stream: bool,
    ) -> Result<Response> {
        let client = if event_stream {
            &self.stream_http
        } else {
            &self.http
        };
        let mut request = client.request(method, self.url(path));
        if credentialed {
            if let Some(cookie) = self.credentials.cookie_header() {
                request = request.header(header::COOKIE, cookie);
            }
        }
        if event_stream {
            request = request.header(header::ACCEPT, "text/event-stream");
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.absorb_cookies(&response).await;

        if response.status().is_success() {
            Ok(response)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    /// Pick up rotated session cookies from a response and persist them.
    async fn absorb_cookies(&self, response: &Response) {
        let mut changed = false;
        for value in response.headers().get_all(header::SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                changed |= self.credentials.apply_set_cookie(raw);
            }
        }
        if changed {
            if let Err(err) = self.credentials.persist().await {
                tracing::warn!("failed to persist session credentials: {err:#}");
            }
        }
    }

    async fn api_error(response: Response) -> ClientError {
        let status = response.status().as_u16();
        let message = match response.text().await {
            Ok(body) => extract_detail(&body),
            Err(_) => String::new(),
        };
        ClientError::Api { status, message }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, credentialed: bool) -> Result<T> {
        let response = self
            .execute::<()>(Method::GET, path, None, credentialed, false)
            .await?;
        Ok(response.json().await?)
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T> {
        let response = self.execute(Method::POST, path, body, true, false).await?;
        Ok(response.json().await?)
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .execute(Method::PUT, path, Some(body), true, false)
            .await?;
        Ok(response.json().await?)
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.execute::<()>(Method::DELETE, path, None, true, false)
            .await?;
        Ok(())
    }

    /// Open a streaming POST; the caller consumes the response body
    /// incrementally. Non-success statuses are rejected before any
    /// byte of the stream is surfaced.
    pub async fn post_stream<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Response> {
        self.execute(Method::POST, path, Some(body), true, true)
            .await
    }
}

/// Servers report failures as `{"detail": "..."}`; fall back to the raw
/// body when that shape is absent.
fn extract_detail(body: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value.get("detail") {
            Some(detail) => detail
                .as_str()
                .map_or_else(|| detail.to_string(), str::to_string),
            None => body.trim().to_string(),
        },
        Err(_) => body.trim().to_string(),
    }
}
