//! Session abstraction over a node's remote procedure endpoint.
//!
//! Sessions are opened per operation through a [`SessionFactory`] and dropped
//! afterwards; nothing in the harness pools or reuses them.

pub mod jsonrpc;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{HarnessError, HarnessResult};
use crate::events::Event;

pub use jsonrpc::{JsonRpcSession, JsonRpcSessionFactory};

/// How long a submission waits before reporting back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionMode {
    /// Return once a block containing the call has been produced.
    #[default]
    Included,
    /// Return once that block is irreversible.
    Finalized,
}

impl CompletionMode {
    pub fn as_wire(&self) -> &'static str {
        match self {
            CompletionMode::Included => "inBlock",
            CompletionMode::Finalized => "finalized",
        }
    }
}

/// Where a node's RPC surface can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeEndpoint {
    pub label: String,
    pub url: String,
}

impl NodeEndpoint {
    pub fn new(label: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            url: url.into(),
        }
    }

    pub fn local(label: impl Into<String>, rpc_port: u16) -> Self {
        Self::new(label, format!("http://127.0.0.1:{rpc_port}"))
    }
}

impl fmt::Display for NodeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.url)
    }
}

/// An addressed operation; the parameter payload is opaque to the harness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub module: String,
    pub function: String,
    pub params: Value,
}

impl Call {
    pub fn new(module: impl Into<String>, function: impl Into<String>, params: Value) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            params,
        }
    }

    /// Canonical bytes covered by the signature. Object keys serialize in
    /// sorted order, so equal calls always encode identically.
    pub fn encode(&self) -> HarnessResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|err| HarnessError::Rpc(format!("failed to encode call: {err}")))
    }
}

impl fmt::Display for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}({})", self.module, self.function, self.params)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedCall {
    pub call: Call,
    pub signer: String,
    pub public_key: String,
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub events: Vec<Event>,
}

impl SubmissionResult {
    pub fn succeeded(events: Vec<Event>) -> Self {
        Self {
            success: true,
            error: None,
            events,
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(message.into()),
            events: Vec::new(),
        }
    }
}

#[async_trait]
pub trait RpcSession: Send + Sync {
    /// Builds a call addressed to `module.function`. Sessions backed by node
    /// metadata may reject unknown targets here.
    fn compose_call(&self, module: &str, function: &str, params: Value) -> HarnessResult<Call> {
        Ok(Call::new(module, function, params))
    }

    /// Associates a public key with a named signing slot in the node keystore.
    async fn insert_key(
        &self,
        key_type: &str,
        suri: &str,
        public_key_hex: &str,
    ) -> HarnessResult<()>;

    async fn submit(
        &self,
        call: SignedCall,
        mode: CompletionMode,
    ) -> HarnessResult<SubmissionResult>;

    async fn query_storage(
        &self,
        module: &str,
        item: &str,
        keys: &[Value],
    ) -> HarnessResult<Option<Value>>;

    async fn block_height(&self) -> HarnessResult<u64>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, endpoint: &NodeEndpoint) -> HarnessResult<Box<dyn RpcSession>>;
}
