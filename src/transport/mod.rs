//! HTTP transport port.
//!
//! The core never opens sockets itself; callers and background probes go
//! through this trait. The default implementation adapts `reqwest` and keeps
//! one client per proxy endpoint so connection pools and cookies stay
//! route-scoped.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use thiserror::Error;
use tokio::sync::Mutex;
use url::Url;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

/// Outbound request description.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub proxy: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl TransportRequest {
    pub fn new(url: Url, method: Method) -> Self {
        Self {
            url,
            method,
            headers: HeaderMap::new(),
            proxy: None,
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// Completed exchange, with the latency measured by the transport.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub latency: Duration,
}

/// Abstract "perform HTTP request" primitive.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;

    /// Lightweight reachability probe through a proxy endpoint. Used by the
    /// pool health check; the default sends a HEAD to a neutral target.
    async fn probe(&self, proxy: &str) -> bool {
        let Ok(url) = Url::parse("https://www.gstatic.com/generate_204") else {
            return false;
        };
        let request = TransportRequest::new(url, Method::HEAD).with_proxy(proxy);
        matches!(self.execute(request).await, Ok(response) if response.status < 500)
    }
}

/// Reqwest-backed transport with one client per proxy endpoint.
pub struct ReqwestTransport {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    async fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, TransportError> {
        let mut guard = self.clients.lock().await;
        let key = proxy.map(|endpoint| endpoint.to_string());
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.timeout);
        if let Some(endpoint) = proxy {
            let proxy = reqwest::Proxy::all(endpoint)
                .map_err(|err| TransportError::Transport(err.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        guard.insert(key, client.clone());
        Ok(client)
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let client = self.client(request.proxy.as_deref()).await?;

        let headers = to_reqwest_headers(&request.headers)?;
        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout(self.timeout)
            } else {
                TransportError::Transport(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers = from_reqwest_headers(response.headers())?;
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Transport(err.to_string()))?;
        let latency = started.elapsed();

        Ok(TransportResponse {
            status,
            headers,
            body,
            latency,
        })
    }
}

fn to_reqwest_headers(headers: &HeaderMap) -> Result<reqwest::header::HeaderMap, TransportError> {
    let mut map = reqwest::header::HeaderMap::new();
    for (name, value) in headers.iter() {
        let header_name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        let header_value = reqwest::header::HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn from_reqwest_headers(headers: &reqwest::header::HeaderMap) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers.iter() {
        let header_name = HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        let header_value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| TransportError::InvalidHeader(name.to_string()))?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_carries_proxy_and_headers() {
        let url = Url::parse("https://target.example/products").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("test-agent"));

        let request = TransportRequest::new(url, Method::GET)
            .with_headers(headers)
            .with_proxy("http://10.0.0.1:8080");

        assert_eq!(request.proxy.as_deref(), Some("http://10.0.0.1:8080"));
        assert_eq!(
            request.headers.get("user-agent").unwrap(),
            &HeaderValue::from_static("test-agent")
        );
    }
}
