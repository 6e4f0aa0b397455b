//! HTTP transport backed by `reqwest`.

use crate::config::Config;
use crate::error::TransportError;
use crate::transport::{Request, Transport};
use async_trait::async_trait;
use crudsync_engine::Method;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Query parameter the backend's session token travels in.
pub const CSRF_PARAM: &str = "csrf";

/// Talks to a CRUD backend over HTTP.
///
/// Every URL is `service_url + path`, followed by the service parameters
/// and then the request's own query string.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    params: RwLock<Vec<(String, String)>>,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &Config) -> Self {
        Self {
            client,
            base_url: config.service_url.clone(),
            params: RwLock::new(config.service_url_params.clone()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Current service parameters, including the session token once logged in.
    pub async fn params(&self) -> Vec<(String, String)> {
        self.params.read().await.clone()
    }

    async fn url(&self, path: &str, query: &str) -> String {
        let mut url = format!("{}{}", self.base_url, path.trim_start_matches('/'));

        let mut parts: Vec<String> = self
            .params
            .read()
            .await
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect();
        if !query.is_empty() {
            parts.push(query.to_string());
        }

        if !parts.is_empty() {
            url.push('?');
            url.push_str(&parts.join("&"));
        }
        url
    }

    async fn execute(&self, request: Request) -> Result<Value, TransportError> {
        let url = self.url(&request.path, &request.query).await;
        debug!(method = %request.method, url = %url, "Sending request");

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Network(format!("{} {} failed: {e}", request.method, url)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(format!("failed to read response: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Value, TransportError> {
        self.execute(request).await
    }

    async fn login(&self, user: &str, password: &str) -> Result<(), TransportError> {
        let mut request = Request::post(
            "",
            serde_json::json!({"username": user, "password": password}),
        );
        request.query = "_a=login".to_string();

        let token = match self.execute(request).await? {
            Value::String(token) => token,
            Value::Null => return Err(TransportError::Decode("login returned no token".into())),
            other => other.to_string(),
        };

        let mut params = self.params.write().await;
        params.retain(|(k, _)| k != CSRF_PARAM);
        params.push((CSRF_PARAM.to_string(), token));
        info!(user = %user, "Logged in");
        Ok(())
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.execute(Request::get("", "_a=logout")).await?;
        self.params.write().await.retain(|(k, _)| k != CSRF_PARAM);
        info!("Logged out");
        Ok(())
    }
}
