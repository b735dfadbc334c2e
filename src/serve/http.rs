//! HTTP listener and worker pool

use super::routes::{route, Method, Reply, RequestParts};
use super::scheduler::RefreshHandle;
use super::state::ServerState;
use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Request, Response, Server};

/// Maximum accepted request body (bytes)
const MAX_BODY_BYTES: u64 = 64 * 1024 * 1024;

/// Bound listener shared by `workers` threads.
pub struct HttpServer {
    server: Arc<Server>,
    workers: usize,
}

/// Stops the worker threads. Cheap to clone.
#[derive(Clone)]
pub struct ShutdownHandle {
    server: Arc<Server>,
    workers: usize,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // Each unblock releases one thread waiting in `recv`.
        for _ in 0..self.workers {
            self.server.unblock();
        }
    }
}

impl HttpServer {
    pub fn bind(address: &str, workers: usize) -> Result<Self> {
        let server =
            Server::http(address).map_err(|e| anyhow!("Failed to bind {}: {}", address, e))?;
        Ok(Self { server: Arc::new(server), workers: workers.max(1) })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle { server: self.server.clone(), workers: self.workers }
    }

    /// Serve requests until shut down. Blocks the calling thread.
    pub fn run(self, state: Arc<ServerState>, refresh: RefreshHandle) -> Result<()> {
        let mut handles = Vec::with_capacity(self.workers);
        for idx in 0..self.workers {
            let server = self.server.clone();
            let state = state.clone();
            let refresh = refresh.clone();
            let handle = thread::Builder::new()
                .name(format!("http-worker-{idx}"))
                .spawn(move || {
                    for request in server.incoming_requests() {
                        handle_request(&state, &refresh, request);
                    }
                })
                .with_context(|| format!("Failed to spawn HTTP worker {idx}"))?;
            handles.push(handle);
        }
        tracing::info!("Serving with {} worker(s)", self.workers);

        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("HTTP worker panicked");
            }
        }
        Ok(())
    }
}

fn handle_request(state: &ServerState, refresh: &RefreshHandle, mut request: Request) {
    let method = match request.method() {
        tiny_http::Method::Get => Method::Get,
        tiny_http::Method::Post => Method::Post,
        _ => Method::Other,
    };
    let url = request.url().to_string();
    let authorization = request
        .headers()
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());

    let mut body = Vec::new();
    let reply = match request.as_reader().take(MAX_BODY_BYTES).read_to_end(&mut body) {
        Ok(_) => route(
            state,
            refresh,
            RequestParts {
                method,
                url: &url,
                authorization: authorization.as_deref(),
                body: &body,
            },
        ),
        Err(e) => {
            tracing::warn!("Failed reading request body for {}: {}", url, e);
            Reply::json(400, serde_json::json!({ "detail": "Unreadable request body" }))
        }
    };

    tracing::debug!("{:?} {} -> {}", method, url, reply.status);
    if let Err(e) = request.respond(into_response(reply)) {
        tracing::warn!("Failed to send response for {}: {}", url, e);
    }
}

fn into_response(reply: Reply) -> Response<std::io::Cursor<Vec<u8>>> {
    let data = if reply.body.is_null() { Vec::new() } else { reply.body.to_string().into_bytes() };
    let mut response = Response::from_data(data).with_status_code(reply.status);
    if !reply.body.is_null() {
        if let Ok(h) = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
            response.add_header(h);
        }
    }
    for (name, value) in reply.headers {
        if let Ok(h) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(h);
        }
    }
    response
}
