//! Request transport for the authorization client.
//!
//! [`HttpTransport`] talks to the access-control server over HTTP.
//! [`ScriptedTransport`] answers from canned responses and records every
//! request, for tests and offline runs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::error::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        })
    }
}

/// One request against the access-control server.
#[derive(Clone, PartialEq)]
pub struct AuthRequest {
    pub method: Method,
    /// Path relative to the server base, starting with `/`
    pub path: String,
    pub bearer: Option<String>,
    pub body: Option<Value>,
}

impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("bearer", &self.bearer.as_ref().map(|_| "<redacted>"))
            .field("body", &self.body)
            .finish()
    }
}

impl AuthRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            bearer: None,
            body: None,
        }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Status plus JSON body (`Null` when the body was empty).
#[derive(Debug, Clone, PartialEq)]
pub struct AuthResponse {
    pub status: u16,
    pub body: Value,
}

impl AuthResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }
}

#[async_trait]
pub trait AuthTransport: Send + Sync {
    async fn send(&self, request: AuthRequest) -> Result<AuthResponse, TransportError>;
}

/// HTTP transport over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AuthTransport for HttpTransport {
    async fn send(&self, request: AuthRequest) -> Result<AuthResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
            Method::Delete => self.client.delete(&url),
        };
        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;

        // Non-JSON bodies (plain-text errors) are kept as a string.
        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(AuthResponse { status, body })
    }
}

enum Scripted {
    Respond(AuthResponse),
    Fail(TransportError),
}

/// Canned-response transport.
///
/// Responses are queued per method and path and consumed in order; the last
/// one for a route keeps answering once the queue is down to it. Unscripted
/// routes fail as unreachable.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    requests: Mutex<Vec<AuthRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(&self, method: Method, path: &str, scripted: Scripted) {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        routes
            .entry((method, path.to_string()))
            .or_default()
            .push_back(scripted);
    }

    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.push(method, path, Scripted::Respond(AuthResponse::new(status, body)));
        self
    }

    pub fn fail(&self, method: Method, path: &str, error: TransportError) -> &Self {
        self.push(method, path, Scripted::Fail(error));
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<AuthRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn next(&self, method: Method, path: &str) -> Option<Result<AuthResponse, TransportError>> {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = routes.get_mut(&(method, path.to_string()))?;
        let scripted = if queue.len() > 1 {
            queue.pop_front()?
        } else {
            match queue.front()? {
                Scripted::Respond(response) => Scripted::Respond(response.clone()),
                Scripted::Fail(error) => Scripted::Fail(error.clone()),
            }
        };
        Some(match scripted {
            Scripted::Respond(response) => Ok(response),
            Scripted::Fail(error) => Err(error),
        })
    }
}

#[async_trait]
impl AuthTransport for ScriptedTransport {
    async fn send(&self, request: AuthRequest) -> Result<AuthResponse, TransportError> {
        let (method, path) = (request.method, request.path.clone());
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.next(method, &path).unwrap_or_else(|| {
            Err(TransportError::Connect(format!(
                "no scripted response for {method} {path}"
            )))
        })
    }
}
