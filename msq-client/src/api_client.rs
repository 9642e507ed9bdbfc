//! REST client for the MeterSquare backend.

use crate::config::ClientConfig;
use crate::queries::{endpoint_for, Endpoint};
use async_trait::async_trait;
use msq_cache::{QueryFetcher, QueryKey};
use msq_core::{FetchError, NotificationData, Timestamp, ValidationError};
use msq_notify::NotificationApi;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ApiClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("Validation failed with {} field error(s)", errors.len())]
    Rejected { errors: Vec<ValidationError> },
    #[error("Config error: {0}")]
    Config(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ApiClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl From<ApiClientError> for FetchError {
    fn from(err: ApiClientError) -> Self {
        match err {
            ApiClientError::Status { status, message } => FetchError::Http { status, message },
            ApiClientError::Rejected { errors } => FetchError::Rejected { errors },
            ApiClientError::Timeout { timeout_ms } => FetchError::Timeout { timeout_ms },
            ApiClientError::Serde(e) => FetchError::Decode(e.to_string()),
            ApiClientError::Http(e) if e.is_decode() => FetchError::Decode(e.to_string()),
            ApiClientError::Http(e) => match e.status() {
                Some(status) => FetchError::Http {
                    status: status.as_u16(),
                    message: e.to_string(),
                },
                None => FetchError::Network(e.to_string()),
            },
            ApiClientError::WebSocket(e) => FetchError::Network(e.to_string()),
            ApiClientError::Config(message) => FetchError::Network(message),
        }
    }
}

/// Backend error body: `{"error": "..."}` or `{"message": "..."}`, with
/// optional per-field errors on 422.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "message")]
    error: Option<String>,
    #[serde(default)]
    errors: Option<serde_json::Map<String, Value>>,
}

#[derive(Clone)]
pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth_header: HeaderMap,
    timeout_ms: u64,
}

impl RestClient {
    pub fn new(config: &ClientConfig, access_token: Option<&str>) -> Result<Self, ApiClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            auth_header: build_auth_headers(access_token)?,
            timeout_ms: config.request_timeout_ms,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    pub async fn get_json(&self, endpoint: &Endpoint) -> Result<Value, ApiClientError> {
        let request = self
            .client
            .get(self.url(&endpoint.path))
            .query(&endpoint.query);
        self.send(request).await
    }

    /// Send a JSON body with `method`. A 204 yields `Value::Null`.
    pub async fn send_json(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiClientError> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ApiClientError> {
        let response = request
            .headers(self.auth_header.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ApiClientError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    ApiClientError::Http(e)
                }
            })?;
        parse_response(response).await
    }
}

async fn parse_response(response: reqwest::Response) -> Result<Value, ApiClientError> {
    let status = response.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let text = response.text().await?;
    if status.is_success() {
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        return Ok(serde_json::from_str(&text)?);
    }
    Err(error_from_body(status.as_u16(), &text))
}

fn error_from_body(status: u16, text: &str) -> ApiClientError {
    let body: ErrorBody = serde_json::from_str(text).unwrap_or_default();
    if status == 422 {
        if let Some(fields) = body.errors.filter(|fields| !fields.is_empty()) {
            let errors = fields
                .into_iter()
                .map(|(field, reason)| {
                    let reason = match reason {
                        Value::String(s) => s,
                        Value::Array(items) => items
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(", "),
                        other => other.to_string(),
                    };
                    ValidationError::invalid(field, reason)
                })
                .collect();
            return ApiClientError::Rejected { errors };
        }
    }
    ApiClientError::Status {
        status,
        message: body.error.unwrap_or_else(|| text.trim().to_string()),
    }
}

fn build_auth_headers(access_token: Option<&str>) -> Result<HeaderMap, ApiClientError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = access_token {
        let value = format!("Bearer {}", token);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&value).map_err(|e| ApiClientError::Config(e.to_string()))?,
        );
    }
    Ok(headers)
}

#[async_trait]
impl QueryFetcher for RestClient {
    async fn fetch(&self, key: &QueryKey) -> Result<Value, FetchError> {
        let endpoint = endpoint_for(key).ok_or_else(|| FetchError::Http {
            status: 404,
            message: format!("No endpoint for query {}", key),
        })?;
        tracing::debug!(%key, path = %endpoint.path, "Fetching query");
        Ok(self.get_json(&endpoint).await?)
    }
}

#[async_trait]
impl NotificationApi for RestClient {
    async fn fetch_since(&self, since: Option<Timestamp>) -> Result<Vec<NotificationData>, FetchError> {
        let mut endpoint = Endpoint::new("/api/notifications");
        if let Some(since) = since {
            endpoint = endpoint.with_query("since", since.to_rfc3339());
        }
        let body = self.get_json(&endpoint).await?;
        decode_notifications(body)
    }
}

/// Accepts a bare list or `{"notifications": [...]}`.
pub(crate) fn decode_notifications(body: Value) -> Result<Vec<NotificationData>, FetchError> {
    let list = match body {
        Value::Object(mut map) => map
            .remove("notifications")
            .or_else(|| map.remove("data"))
            .unwrap_or(Value::Array(Vec::new())),
        Value::Null => Value::Array(Vec::new()),
        other => other,
    };
    serde_json::from_value(list).map_err(|e| FetchError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_422_field_errors_become_rejected() {
        let err = error_from_body(
            422,
            r#"{"error": "invalid", "errors": {"email": ["is invalid"], "company_name": "required"}}"#,
        );
        let ApiClientError::Rejected { errors } = err else {
            panic!("expected Rejected");
        };
        assert_eq!(errors.len(), 2);
        assert!(matches!(FetchError::from(ApiClientError::Rejected { errors }), FetchError::Rejected { .. }));
    }

    #[test]
    fn test_status_errors_keep_backend_message() {
        let err = error_from_body(403, r#"{"message": "Not allowed"}"#);
        let fetch: FetchError = err.into();
        assert_eq!(
            fetch,
            FetchError::Http {
                status: 403,
                message: "Not allowed".to_string()
            }
        );
        assert!(!fetch.is_retryable());

        let fetch: FetchError = error_from_body(502, "Bad Gateway").into();
        assert_eq!(fetch.status(), Some(502));
        assert!(fetch.is_retryable());
    }

    #[test]
    fn test_decode_notification_shapes() {
        let item = json!({"id": "n1", "title": "Hello"});
        assert_eq!(decode_notifications(json!([item.clone()])).unwrap().len(), 1);
        assert_eq!(
            decode_notifications(json!({"notifications": [item], "total": 1}))
                .unwrap()
                .len(),
            1
        );
        assert!(decode_notifications(Value::Null).unwrap().is_empty());
        assert!(decode_notifications(json!([{"title": "no id"}])).is_err());
    }

    #[test]
    fn test_bearer_header() {
        let headers = build_auth_headers(Some("abc")).unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
        assert!(build_auth_headers(None).unwrap().is_empty());
        assert!(build_auth_headers(Some("bad\ntoken")).is_err());
    }
}
