//! Shared helpers for integration tests: a recording mock of the Axiom API.
#![allow(dead_code)]

use axiom_client::{Client, ClientBuilder, RetryPolicy};
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const API_TOKEN: &str = "xaat-00000000-0000-0000-0000-000000000000";
pub const PERSONAL_TOKEN: &str = "xapt-00000000-0000-0000-0000-000000000000";
pub const ORG_ID: &str = "acme-1234";

/// A request as the mock server saw it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path and query.
    pub uri: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body with any `Content-Encoding` removed.
    pub fn decoded_body(&self) -> Vec<u8> {
        match self.header("content-encoding") {
            Some("zstd") => zstd::decode_all(&self.body[..]).unwrap(),
            Some("gzip") => {
                let mut out = Vec::new();
                flate2::read::GzDecoder::new(&self.body[..])
                    .read_to_end(&mut out)
                    .unwrap();
                out
            }
            _ => self.body.clone(),
        }
    }

    /// Decoded body parsed as NDJSON.
    pub fn ndjson(&self) -> Vec<Value> {
        String::from_utf8(self.decoded_body())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.decoded_body()).unwrap()
    }
}

/// A scripted reply.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.to_string(),
        }
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

type Responder = Box<dyn Fn(&Recorded) -> Reply + Send + Sync>;

struct Inner {
    requests: Vec<Recorded>,
    queued: VecDeque<Reply>,
    responder: Responder,
}

/// Axum server on an ephemeral port that records every request.
///
/// Queued replies are served first, in order; after that every request is
/// answered by the responder.
#[derive(Clone)]
pub struct MockServer {
    pub url: String,
    inner: Arc<Mutex<Inner>>,
}

impl MockServer {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + Sync + 'static,
    {
        let inner = Arc::new(Mutex::new(Inner {
            requests: Vec::new(),
            queued: VecDeque::new(),
            responder: Box::new(responder),
        }));

        let app = Router::new().fallback(handle).with_state(inner.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            inner,
        }
    }

    /// A server that answers every ingest request with a status counting the
    /// NDJSON lines it received.
    pub async fn ingest() -> Self {
        Self::start(ingest_reply).await
    }

    pub fn enqueue(&self, reply: Reply) {
        self.inner.lock().unwrap().queued.push_back(reply);
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.inner.lock().unwrap().requests.clone()
    }
}

pub fn ingest_reply(req: &Recorded) -> Reply {
    let lines = req.ndjson().len();
    Reply::json(
        200,
        json!({
            "ingested": lines,
            "failed": 0,
            "failures": [],
            "processedBytes": req.body.len(),
            "blocksCreated": 0,
            "walLength": lines,
        }),
    )
}

async fn handle(State(inner): State<Arc<Mutex<Inner>>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let recorded = Recorded {
        method: parts.method.to_string(),
        uri: parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_default(),
        headers: parts.headers,
        body: body.to_vec(),
    };

    let reply = {
        let mut inner = inner.lock().unwrap();
        let reply = match inner.queued.pop_front() {
            Some(reply) => reply,
            None => (inner.responder)(&recorded),
        };
        inner.requests.push(recorded);
        reply
    };

    let mut builder = Response::builder().status(StatusCode::from_u16(reply.status).unwrap());
    for (name, value) in &reply.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder.body(Body::from(reply.body)).unwrap()
}

/// Retry policy with short backoffs so retry tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default().with_backoff(Duration::from_millis(1), Duration::from_millis(5))
}

pub fn builder(server: &MockServer, token: &str) -> ClientBuilder {
    Client::builder()
        .no_env()
        .with_url(&server.url)
        .with_token(token)
        .with_retry_policy(fast_retry())
}

pub fn api_client(server: &MockServer) -> Client {
    builder(server, API_TOKEN).build().unwrap()
}

pub fn personal_client(server: &MockServer) -> Client {
    builder(server, PERSONAL_TOKEN)
        .with_org_id(ORG_ID)
        .build()
        .unwrap()
}
