//! # HTTP Interface
//!
//! The transport seam between the engines and the network. The production
//! implementation rides on reqwest with rustls; tests script their own
//! implementations of [`Transport`].

use std::time::Duration;

use crate::config::Config;
use crate::error::Result;

/// A completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Scoped GET/POST with timeout, TLS verification and a custom User-Agent.
#[allow(async_fn_in_trait)]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse>;
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse>;
}

/// Production transport backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout))
            .user_agent(config.user_agent.clone())
            .use_rustls_tls()
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse> {
        let resp = self.client.post(url).body(body).send().await?;
        let status = resp.status().as_u16();
        let body = resp.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}
