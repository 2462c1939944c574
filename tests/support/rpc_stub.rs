//! Minimal JSON-RPC server standing in for a node's RPC port.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Reply for one JSON-RPC method.
#[derive(Clone)]
pub enum Reply {
    Result(Value),
    Error { code: i64, message: String },
    Status(StatusCode),
}

#[derive(Clone, Default)]
pub struct StubState {
    replies: Arc<Mutex<Vec<(String, Reply)>>>,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl StubState {
    pub fn reply(&self, method: &str, reply: Reply) {
        self.replies.lock().push((method.to_string(), reply));
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    fn lookup(&self, method: &str) -> Option<Reply> {
        self.replies
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == method)
            .map(|(_, reply)| reply.clone())
    }
}

pub struct RpcStub {
    pub addr: SocketAddr,
    pub state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
}

impl RpcStub {
    pub async fn spawn() -> Result<Self> {
        let state = StubState::default();
        let router = Router::new()
            .route("/", post(handle))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind rpc stub listener")?;
        let addr = listener.local_addr().context("read listener address")?;
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = rx.await;
            });
            if let Err(err) = server.await {
                eprintln!("rpc stub server error: {err}");
            }
        });
        Ok(Self {
            addr,
            state,
            shutdown: Some(tx),
        })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

impl Drop for RpcStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

async fn handle(
    State(state): State<StubState>,
    Json(request): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    state.requests.lock().push(request.clone());
    let id = request["id"].clone();
    let method = request["method"].as_str().unwrap_or_default();
    match state.lookup(method) {
        Some(Reply::Result(result)) => Ok(Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": result,
        }))),
        Some(Reply::Error { code, message }) => Ok(Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }))),
        Some(Reply::Status(status)) => Err(status),
        None => Ok(Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "Method not found" },
        }))),
    }
}
