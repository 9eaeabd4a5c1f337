use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::AuthContext;
use crate::error::FetchError;
use crate::models::StreamPayload;

const ACCEPT_VERSION: &str = "application/json; version=2.0";
const CSRF_HEADER: &str = "X-CSRFToken";
const UNKNOWN_ERROR: &str = "Unknown Error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Either a path below the base URL or an absolute pagination link.
    pub path: String,
    /// Query pairs; `None` values are sent as bare flags.
    pub query: Vec<(String, Option<String>)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), Some(value.to_string())));
        self
    }

    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    pub fn flag(mut self, key: &str) -> Self {
        self.query.push((key.to_string(), None));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn query_string(&self) -> Option<String> {
        if self.query.is_empty() {
            return None;
        }
        let parts: Vec<String> = self
            .query
            .iter()
            .map(|(key, value)| match value {
                Some(value) => format!("{key}={value}"),
                None => key.clone(),
            })
            .collect();
        Some(parts.join("&"))
    }

    /// `/api/streams/public/?last_id=3` style rendering, used for logging
    /// and by scripted transports.
    pub fn path_and_query(&self) -> String {
        match self.query_string() {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// Path of a stream or content endpoint below the `/api/` root.
pub fn api_path(endpoint: &str) -> String {
    format!("/api/{}/", endpoint.trim_matches('/'))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl RawResponse {
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            content_type: Some("application/json".into()),
            body: body.to_string(),
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: Some("text/html".into()),
            body: body.into(),
        }
    }

    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }

    fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("application/json"))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: &ApiRequest,
        csrf_token: Option<&str>,
    ) -> Result<RawResponse, FetchError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = sanitize_base_url(base_url.into())?;
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, request: &ApiRequest) -> Result<Url, FetchError> {
        let parsed = if request.path.starts_with("http://") || request.path.starts_with("https://") {
            Url::parse(&request.path)
        } else {
            Url::parse(&self.base_url).map(|mut url| {
                url.set_path(&request.path);
                url
            })
        };
        let mut url = parsed.map_err(|err| FetchError::Transport {
            message: format!("invalid URL for {}: {err}", request.path),
        })?;
        if let Some(query) = request.query_string() {
            url.set_query(Some(&query));
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: &ApiRequest,
        csrf_token: Option<&str>,
    ) -> Result<RawResponse, FetchError> {
        let url = self.url(request)?;
        let mut builder = self
            .client
            .request(request.method.into(), url)
            .header(ACCEPT, ACCEPT_VERSION);
        if let Some(token) = csrf_token {
            builder = builder.header(CSRF_HEADER, token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|err| FetchError::Transport {
            message: err.to_string(),
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body = response.text().await.map_err(|err| FetchError::Transport {
            message: err.to_string(),
        })?;
        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn sanitize_base_url(mut base: String) -> Result<String> {
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    while base.ends_with('/') {
        base.pop();
    }
    let _ = Url::parse(&base).context("invalid base URL")?;
    Ok(base)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub status: u16,
    /// `None` for 204 and empty bodies.
    pub payload: Option<Value>,
}

impl Fetched {
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, FetchError> {
        Ok(serde_json::from_value(self.payload.unwrap_or(Value::Null))?)
    }

    pub fn stream_payload(self) -> Result<StreamPayload, FetchError> {
        Ok(StreamPayload::decode(self.payload.unwrap_or(Value::Null))?)
    }
}

/// Issues API calls and folds every outcome into `Result<Fetched, FetchError>`.
#[derive(Clone)]
pub struct FetchGateway {
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthContext>,
}

impl FetchGateway {
    pub fn new(transport: Arc<dyn Transport>, auth: Arc<dyn AuthContext>) -> Self {
        Self { transport, auth }
    }

    pub async fn call(&self, request: ApiRequest) -> Result<Fetched, FetchError> {
        let csrf_token = self.auth.csrf_token();
        tracing::debug!(method = ?request.method, path = %request.path_and_query(), "api call");
        let response = self.transport.send(&request, csrf_token.as_deref()).await?;
        interpret(response, self.auth.as_ref())
    }
}

fn interpret(response: RawResponse, auth: &dyn AuthContext) -> Result<Fetched, FetchError> {
    let status = response.status;
    if (200..300).contains(&status) {
        if status == 204 || response.body.trim().is_empty() {
            return Ok(Fetched {
                status,
                payload: None,
            });
        }
        let payload = serde_json::from_str(&response.body)?;
        return Ok(Fetched {
            status,
            payload: Some(payload),
        });
    }

    if matches!(status, 401 | 403) && auth.is_authenticated() {
        tracing::warn!(status, "authenticated request rejected, forcing sign-out");
        auth.on_session_expired();
        return Err(FetchError::SessionExpired { status });
    }

    let structured = if response.is_json() {
        serde_json::from_str::<Value>(&response.body).ok()
    } else {
        None
    };
    let message = match &structured {
        Some(detail) => json_error_message(detail),
        None => status_message(status),
    };
    tracing::debug!(status, %message, "api call failed");
    Err(match status {
        403 | 404 => FetchError::Unavailable { status, message },
        400..=499 if structured.is_some() => FetchError::Validation { status, message },
        _ => FetchError::Http { status, message },
    })
}

fn json_error_message(detail: &Value) -> String {
    let candidate = present(detail.get("message"))
        .or_else(|| present(detail.get("detail")))
        .or_else(|| present(detail.get("recipients").and_then(|r| r.get(0))))
        .or_else(|| present(detail.get(0)));
    match candidate {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => UNKNOWN_ERROR.to_string(),
    }
}

/// JSON `null` counts as absent.
fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn status_message(status: u16) -> String {
    let message = match status {
        204 => "",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => UNKNOWN_ERROR,
    };
    message.to_string()
}

#[cfg(test)]
pub(crate) mod mock {
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    use super::*;

    /// Replays queued responses keyed by `path_and_query` and records every
    /// request it sees.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<HashMap<String, VecDeque<RawResponse>>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl ScriptedTransport {
        pub(crate) fn respond(&self, path_and_query: &str, response: RawResponse) {
            self.responses
                .lock()
                .unwrap()
                .entry(path_and_query.to_string())
                .or_default()
                .push_back(response);
        }

        pub(crate) fn respond_json(&self, path_and_query: &str, body: Value) {
            self.respond(path_and_query, RawResponse::json(200, &body));
        }

        pub(crate) fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub(crate) fn request_paths(&self) -> Vec<String> {
            self.requests().iter().map(ApiRequest::path_and_query).collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            request: &ApiRequest,
            _csrf_token: Option<&str>,
        ) -> Result<RawResponse, FetchError> {
            self.requests.lock().unwrap().push(request.clone());
            let key = request.path_and_query();
            self.responses
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| FetchError::Transport {
                    message: format!("no scripted response for {key}"),
                })
        }
    }
}
