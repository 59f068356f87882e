//! HTTP request action.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::ActionError;
use crate::registry::Action;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP method.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
#[allow(clippy::upper_case_acronyms)] // HTTP methods are conventionally uppercase
pub enum HttpMethod {
    #[default]
    GET,
    POST,
    PUT,
    PATCH,
    DELETE,
}

impl HttpMethod {
    fn carries_body(&self) -> bool {
        matches!(self, HttpMethod::POST | HttpMethod::PUT | HttpMethod::PATCH)
    }
}

impl From<HttpMethod> for Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::GET => Method::GET,
            HttpMethod::POST => Method::POST,
            HttpMethod::PUT => Method::PUT,
            HttpMethod::PATCH => Method::PATCH,
            HttpMethod::DELETE => Method::DELETE,
        }
    }
}

/// `http_request` step configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequestConfig {
    /// URL to request.
    pub url: String,

    /// HTTP method (default: GET).
    #[serde(default)]
    pub method: HttpMethod,

    /// Request headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Request body. When absent, body-carrying methods send the step input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Request timeout in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

/// HTTP request action.
pub struct HttpRequestAction {
    client: reqwest::Client,
}

impl HttpRequestAction {
    /// Create a new HTTP action.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();

        Self { client }
    }

    /// Create an HTTP action with a custom client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Parse the step config into an [`HttpRequestConfig`].
    pub fn parse_config(config: &serde_json::Value) -> Result<HttpRequestConfig, ActionError> {
        let parsed: HttpRequestConfig = serde_json::from_value(config.clone())
            .map_err(|e| ActionError::Configuration(format!("invalid http_request config: {}", e)))?;

        if !parsed.url.starts_with("http://") && !parsed.url.starts_with("https://") {
            return Err(ActionError::Configuration(format!(
                "unsupported url scheme: {}",
                parsed.url
            )));
        }

        Ok(parsed)
    }

    /// Execute an HTTP request.
    pub async fn request(
        &self,
        config: &HttpRequestConfig,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let start = std::time::Instant::now();

        let method: Method = config.method.clone().into();
        let mut request = self.client.request(method, &config.url);

        for (key, value) in &config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        match &config.body {
            Some(serde_json::Value::String(s)) => request = request.body(s.clone()),
            Some(body) => request = request.json(body),
            None if config.method.carries_body() => request = request.json(input),
            None => {}
        }

        let timeout = config.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
        request = request.timeout(Duration::from_secs(timeout));

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::Timeout(timeout)
            } else {
                ActionError::from(e)
            }
        })?;
        let status_code = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body: serde_json::Value =
            serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));

        tracing::debug!(
            url = %config.url,
            status_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "http_request action finished"
        );

        if !(200..300).contains(&status_code) {
            return Err(ActionError::ExecutionFailed(format!(
                "{} responded with status {}",
                config.url, status_code
            )));
        }

        Ok(serde_json::json!({
            "status_code": status_code,
            "body": body,
        }))
    }
}

impl Default for HttpRequestAction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Action for HttpRequestAction {
    fn name(&self) -> &'static str {
        "http_request"
    }

    async fn execute(
        &self,
        config: &serde_json::Value,
        input: &serde_json::Value,
    ) -> Result<serde_json::Value, ActionError> {
        let parsed = Self::parse_config(config)?;
        self.request(&parsed, input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_defaults() {
        let config = HttpRequestAction::parse_config(&serde_json::json!({
            "action_type": "http_request",
            "url": "https://hooks.example.com/lead"
        }))
        .unwrap();
        assert_eq!(config.method, HttpMethod::GET);
        assert!(config.headers.is_empty());
        assert!(config.body.is_none());
    }

    #[test]
    fn test_parse_config_missing_url() {
        let err = HttpRequestAction::parse_config(&serde_json::json!({"method": "POST"})).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_parse_config_rejects_scheme() {
        let err = HttpRequestAction::parse_config(&serde_json::json!({"url": "file:///etc/passwd"}))
            .unwrap_err();
        assert!(matches!(err, ActionError::Configuration(_)));
    }

    #[test]
    fn test_method_carries_body() {
        assert!(HttpMethod::POST.carries_body());
        assert!(!HttpMethod::GET.carries_body());
        assert!(!HttpMethod::DELETE.carries_body());
    }
}
