//! Outbound HTTP behind a trait, so the pipeline can run against a scripted
//! endpoint in tests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;

use kg_core::config::{EndpointConfig, Http2Mode};

use crate::strategy::{BodyEncoding, HttpMethod};

pub const SPARQL_JSON: &str = "application/sparql-results+json";

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP transport error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub method: HttpMethod,
    pub encoding: BodyEncoding,
    pub params: Vec<(String, String)>,
    pub accept: String,
    pub timeout: Duration,
}

impl OutboundRequest {
    /// Value of a protocol parameter, e.g. `query`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
    /// Whether the response came back over HTTP/2.
    pub http2: bool,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait SparqlTransport: Send + Sync {
    /// Send one request. Non-2xx statuses are returned as responses; only
    /// failures to get any response are errors.
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError>;
}

/// reqwest-backed transport. HTTP/1.1 vs HTTP/2 is fixed here at
/// construction and is independent of the request strategies.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout());
        builder = match config.http2 {
            Http2Mode::Off => builder.http1_only(),
            Http2Mode::On => builder.http2_prior_knowledge(),
            Http2Mode::Auto => builder,
        };
        let client = builder.build().map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SparqlTransport for HttpTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        let builder = match (request.method, request.encoding) {
            (HttpMethod::Post, BodyEncoding::Form) => self.client.post(&request.url).form(&request.params),
            (HttpMethod::Post, BodyEncoding::QueryString) => self
                .client
                .post(&request.url)
                .query(&request.params)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded"),
            (HttpMethod::Get, _) => self.client.get(&request.url).query(&request.params),
        };

        let response = builder
            .header(ACCEPT, &request.accept)
            .timeout(request.timeout)
            .send()
            .await?;

        let status = response.status().as_u16();
        let http2 = response.version() == reqwest::Version::HTTP_2;
        let body = response.text().await?;
        debug!(url = %request.url, status, http2, bytes = body.len(), "endpoint responded");

        Ok(RawResponse { status, body, http2 })
    }
}
