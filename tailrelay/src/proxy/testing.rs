//! In-process stand-in for Caddy's admin API that records every request.

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::Value;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

#[derive(Default)]
struct MockState {
    config: Value,
    requests: Vec<RecordedRequest>,
    fixed: Option<(u16, String)>,
}

pub(crate) struct MockCaddy {
    addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockCaddy {
    /// A Caddy with an empty (null) config.
    pub async fn new() -> Self {
        Self::start(MockState::default()).await
    }

    pub async fn with_config(config: Value) -> Self {
        Self::start(MockState { config, ..Default::default() }).await
    }

    /// Answers every request with the same status and body.
    pub async fn fixed(status: u16, body: &str) -> Self {
        Self::start(MockState { fixed: Some((status, body.to_string())), ..Default::default() }).await
    }

    async fn start(state: MockState) -> Self {
        let state = Arc::new(Mutex::new(state));
        let service_state = state.clone();
        let make_svc = make_service_fn(move |_conn: &AddrStream| {
            let state = service_state.clone();
            async move { Ok::<_, Infallible>(service_fn(move |req| handle(state.clone(), req))) }
        });
        let server = hyper::Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        tokio::spawn(async move {
            let _ = server.await;
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn config(&self) -> Value {
        self.state.lock().unwrap().config.clone()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Writes (PUT or PATCH) that targeted a single server slot.
    pub fn slot_writes(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| (r.method == "PUT" || r.method == "PATCH") && r.path.starts_with("/config/apps/http/servers/srv"))
            .collect()
    }
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

fn not_found(pointer: &str) -> Response<Body> {
    respond(StatusCode::NOT_FOUND, format!(r#"{{"error":"loading config path \"{}\": path not found"}}"#, pointer))
}

async fn handle(state: Arc<Mutex<MockState>>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let bytes = hyper::body::to_bytes(req.into_body()).await.unwrap_or_default();
    let body = String::from_utf8_lossy(&bytes).into_owned();

    let mut state = state.lock().unwrap();
    state.requests.push(RecordedRequest { method: method.to_string(), path: path.clone(), body: body.clone() });
    if let Some((status, body)) = &state.fixed {
        return Ok(respond(StatusCode::from_u16(*status).unwrap(), body.clone()));
    }

    let pointer = path.trim_start_matches("/config").trim_end_matches('/').to_string();
    let value: Value = serde_json::from_str(&body).unwrap_or(Value::Null);

    let response = match method {
        Method::GET if pointer.is_empty() => respond(StatusCode::OK, state.config.to_string()),
        Method::GET => match state.config.pointer(&pointer) {
            Some(found) => respond(StatusCode::OK, found.to_string()),
            None => not_found(&pointer),
        },
        Method::POST | Method::PATCH if pointer.is_empty() => {
            state.config = value;
            respond(StatusCode::OK, "")
        }
        Method::PATCH => match state.config.pointer_mut(&pointer) {
            Some(existing) => {
                *existing = value;
                respond(StatusCode::OK, "")
            }
            None => not_found(&pointer),
        },
        Method::PUT => {
            let (parent, key) = pointer.rsplit_once('/').unwrap_or(("", ""));
            match state.config.pointer_mut(parent).and_then(Value::as_object_mut) {
                Some(map) if map.contains_key(key) => respond(StatusCode::CONFLICT, r#"{"error":"key already exists"}"#),
                Some(map) => {
                    map.insert(key.to_string(), value);
                    respond(StatusCode::OK, "")
                }
                None => not_found(parent),
            }
        }
        Method::DELETE => {
            let (parent, key) = pointer.rsplit_once('/').unwrap_or(("", ""));
            match state.config.pointer_mut(parent).and_then(Value::as_object_mut).and_then(|m| m.remove(key)) {
                Some(_) => respond(StatusCode::OK, ""),
                None => not_found(&pointer),
            }
        }
        _ => respond(StatusCode::METHOD_NOT_ALLOWED, ""),
    };
    Ok(response)
}
