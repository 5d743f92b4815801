//! HTTP transport abstraction
//!
//! The streamer never talks to an HTTP library directly. It builds an
//! [`HttpRequest`], hands it to an [`HttpTransport`] on a runtime task and
//! receives the [`HttpResponse`] back as a completion message.

mod http_client;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::TransportError;

pub use http_client::ReqwestTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// A fully built outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    #[must_use]
    pub const fn get(url: Url) -> Self {
        Self {
            method: Method::Get,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub const fn post(url: Url) -> Self {
        Self {
            method: Method::Post,
            url,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a raw payload, tagged as `application/octet-stream`.
    #[must_use]
    pub fn with_body(self, body: Bytes) -> Self {
        let mut request = self.with_header("Content-Type", "application/octet-stream");
        request.body = body;
        request
    }

    /// Attach a JSON payload.
    #[must_use]
    pub fn with_json(self, body: String) -> Self {
        let mut request = self.with_header("Content-Type", "application/json");
        request.body = Bytes::from(body);
        request
    }
}

/// Snapshot of a completed response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    #[must_use]
    pub const fn new(status: u16, body: Bytes) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Case-insensitive header lookup; the first match wins.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Body decoded as UTF-8, lossy.
    #[must_use]
    pub fn body_as_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// The replay service answers every successful call with `200 OK`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Asynchronous request/response transport.
///
/// Implementations own TLS, authentication and timeouts. Cancellation is
/// cooperative: the streamer aborts the task awaiting `execute`.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}
