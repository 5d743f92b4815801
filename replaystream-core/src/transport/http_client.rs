//! `reqwest`-backed transport

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;

use super::{HttpRequest, HttpResponse, HttpTransport, Method};
use crate::config::HttpConfig;
use crate::error::TransportError;

/// HTTP transport over a pooled `reqwest::Client`.
///
/// Redirects are disabled: the replay service never redirects, and a chunk
/// upload must not be silently re-targeted.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    max_response_bytes: usize,
}

impl ReqwestTransport {
    pub fn new(config: &HttpConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            max_response_bytes: config.max_response_bytes,
        })
    }

    fn build_headers(request: &HttpRequest) -> Result<HeaderMap, TransportError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
            headers.insert(name, HeaderValue::from_str(value)?);
        }
        Ok(headers)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let headers = Self::build_headers(&request)?;
        let builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
        };

        let response = builder.headers(headers).body(request.body).send().await?;

        if let Some(len) = response.content_length() {
            if len as usize > self.max_response_bytes {
                return Err(TransportError::ResponseTooLarge {
                    size: len,
                    limit: self.max_response_bytes,
                });
            }
        }

        let status = response.status().as_u16();
        let header_pairs: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();

        let body = response.bytes().await?;
        if body.len() > self.max_response_bytes {
            return Err(TransportError::ResponseTooLarge {
                size: body.len() as u64,
                limit: self.max_response_bytes,
            });
        }

        tracing::trace!(
            method = %request.method,
            url = %request.url,
            status,
            bytes = body.len(),
            "http request completed"
        );

        Ok(header_pairs
            .into_iter()
            .fold(HttpResponse::new(status, body), |resp, (k, v)| resp.with_header(k, v)))
    }
}
