use std::io;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

use crate::events::{Event, ExpectedEvent};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("node binary {0} does not exist, did you build it?")]
    BinaryNotFound(PathBuf),
    #[error("failed to reset data directory {path}: {source}")]
    DataDirResetError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("node {node} did not report readiness within {timeout:?}, see {log}")]
    StartupTimeout {
        node: String,
        log: PathBuf,
        timeout: Duration,
    },
    #[error("node {node} exited before becoming ready ({status}), see {log}")]
    NodeExited {
        node: String,
        log: PathBuf,
        status: String,
    },
    #[error("{name} is not a predefined identity, use one of {known:?}")]
    UnknownIdentity { name: String, known: Vec<String> },
    #[error("topology of {requested} nodes is out of range, expected 2..={max}")]
    InvalidTopologySize { requested: usize, max: usize },
    #[error("invalid parameters for {module}.{function}: {reason}")]
    InvalidParams {
        module: String,
        function: String,
        reason: String,
    },
    #[error("call rejected: {0}")]
    CallRejected(String),
    #[error("privileged call failed: {0}")]
    PrivilegedCallFailed(Value),
    #[error("expected the event {pattern} in {observed:?}, no match found")]
    ExpectedEventNotFound {
        pattern: ExpectedEvent,
        observed: Vec<Event>,
    },
    #[error("timed out waiting for block {target}, last observed {last_observed}")]
    HeightTimeout { target: u64, last_observed: u64 },
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for HarnessError {
    fn from(err: reqwest::Error) -> Self {
        HarnessError::Rpc(err.to_string())
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
