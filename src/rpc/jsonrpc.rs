use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    CompletionMode, NodeEndpoint, RpcSession, SessionFactory, SignedCall, SubmissionResult,
};
use crate::errors::{HarnessError, HarnessResult};

pub const INSERT_KEY_METHOD: &str = "author_insertKey";
pub const HEADER_METHOD: &str = "chain_getHeader";
pub const SUBMIT_METHOD: &str = "author_submitSignedCall";
pub const STORAGE_METHOD: &str = "state_getStorageValue";

#[derive(Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

impl JsonRpcError {
    fn describe(&self) -> String {
        match &self.data {
            Some(data) => format!("{} ({}): {}", self.message, self.code, data),
            None => format!("{} ({})", self.message, self.code),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Header {
    number: Value,
}

/// JSON-RPC 2.0 over HTTP against a single node.
pub struct JsonRpcSession {
    client: Client,
    url: Url,
    label: String,
    next_id: AtomicU64,
}

impl JsonRpcSession {
    pub fn connect(endpoint: &NodeEndpoint, timeout: Duration) -> HarnessResult<Self> {
        let url = Url::parse(&endpoint.url).map_err(|err| {
            HarnessError::Config(format!("invalid endpoint url {}: {err}", endpoint.url))
        })?;
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            label: endpoint.label.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
    ) -> HarnessResult<Result<Value, JsonRpcError>> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(
            target = "chain_harness::rpc",
            node = %self.label,
            method,
            id = request.id,
            "sending rpc request"
        );

        let response = self
            .client
            .post(self.url.clone())
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HarnessError::Rpc(format!(
                "{method} on {} returned HTTP {status}",
                self.label
            )));
        }

        let body: JsonRpcResponse = response.json().await?;
        match (body.error, body.result) {
            (Some(error), _) => Ok(Err(error)),
            (None, result) => Ok(Ok(result.unwrap_or(Value::Null))),
        }
    }

    async fn call(&self, method: &str, params: Value) -> HarnessResult<Value> {
        self.request(method, params).await?.map_err(|error| {
            HarnessError::Rpc(format!(
                "{method} on {} failed: {}",
                self.label,
                error.describe()
            ))
        })
    }
}

#[async_trait]
impl RpcSession for JsonRpcSession {
    async fn insert_key(
        &self,
        key_type: &str,
        suri: &str,
        public_key_hex: &str,
    ) -> HarnessResult<()> {
        self.call(INSERT_KEY_METHOD, json!([key_type, suri, public_key_hex]))
            .await
            .map(|_| ())
    }

    async fn submit(
        &self,
        call: SignedCall,
        mode: CompletionMode,
    ) -> HarnessResult<SubmissionResult> {
        let payload = serde_json::to_value(&call)
            .map_err(|err| HarnessError::Rpc(format!("failed to encode signed call: {err}")))?;
        match self.request(SUBMIT_METHOD, json!([payload, mode.as_wire()])).await? {
            Ok(result) => serde_json::from_value(result).map_err(|err| {
                HarnessError::Rpc(format!(
                    "malformed submission result from {}: {err}",
                    self.label
                ))
            }),
            Err(error) => {
                warn!(
                    target = "chain_harness::rpc",
                    node = %self.label,
                    code = error.code,
                    "submission rejected by node"
                );
                Ok(SubmissionResult::rejected(error.describe()))
            }
        }
    }

    async fn query_storage(
        &self,
        module: &str,
        item: &str,
        keys: &[Value],
    ) -> HarnessResult<Option<Value>> {
        let value = self.call(STORAGE_METHOD, json!([module, item, keys])).await?;
        Ok(match value {
            Value::Null => None,
            value => Some(value),
        })
    }

    async fn block_height(&self) -> HarnessResult<u64> {
        let raw = self.call(HEADER_METHOD, json!([])).await?;
        let header: Header = serde_json::from_value(raw).map_err(|err| {
            HarnessError::Rpc(format!("malformed header from {}: {err}", self.label))
        })?;
        parse_block_number(&header.number)
    }
}

fn parse_block_number(value: &Value) -> HarnessResult<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .ok_or_else(|| HarnessError::Rpc(format!("block number {number} out of range"))),
        Value::String(text) => {
            let digits = text.trim_start_matches("0x");
            u64::from_str_radix(digits, 16)
                .map_err(|err| HarnessError::Rpc(format!("invalid block number {text}: {err}")))
        }
        other => Err(HarnessError::Rpc(format!("unexpected block number {other}"))),
    }
}

/// Opens a new HTTP client for every session.
#[derive(Debug, Clone)]
pub struct JsonRpcSessionFactory {
    timeout: Duration,
}

impl JsonRpcSessionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl SessionFactory for JsonRpcSessionFactory {
    async fn connect(&self, endpoint: &NodeEndpoint) -> HarnessResult<Box<dyn RpcSession>> {
        Ok(Box::new(JsonRpcSession::connect(endpoint, self.timeout)?))
    }
}
