//! In-memory [`SparqlTransport`] for tests: replays queued responses, then
//! falls back to an optional handler, and records every request it sees.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::transport::{OutboundRequest, RawResponse, SparqlTransport, TransportError};

type Handler = Box<dyn Fn(&OutboundRequest) -> Result<RawResponse, TransportError> + Send + Sync>;

#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
    handler: Option<Handler>,
    log: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request not covered by the queue with `handler`.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&OutboundRequest) -> Result<RawResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Box::new(handler)),
            ..Self::default()
        }
    }

    pub fn push(&self, response: Result<RawResponse, TransportError>) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.push_back(response);
        }
    }

    pub fn push_ok(&self, body: &str) {
        self.push_status(200, body);
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(RawResponse {
            status,
            body: body.to_string(),
            http2: false,
        }));
    }

    pub fn push_err(&self, err: TransportError) {
        self.push(Err(err));
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    pub fn calls(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or_default()
    }

    /// Requests whose URL equals `url`.
    pub fn calls_to(&self, url: &str) -> usize {
        self.requests().iter().filter(|r| r.url == url).count()
    }
}

#[async_trait]
impl SparqlTransport for ScriptedTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<RawResponse, TransportError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(request.clone());
        }
        let queued = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        match (queued, &self.handler) {
            (Some(response), _) => response,
            (None, Some(handler)) => handler(request),
            (None, None) => Err(TransportError::Other("no scripted response left".to_string())),
        }
    }
}

/// A 200 response with `body`.
pub fn ok(body: impl Into<String>) -> Result<RawResponse, TransportError> {
    Ok(RawResponse {
        status: 200,
        body: body.into(),
        http2: false,
    })
}
