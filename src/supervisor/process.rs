use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::rpc::NodeEndpoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Starting,
    Ready,
    Terminating,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePorts {
    pub peer: u16,
    pub ws: u16,
    pub rpc: u16,
}

impl NodePorts {
    /// Ports of the `index`-th node of a topology.
    pub fn for_index(config: &HarnessConfig, index: usize) -> HarnessResult<Self> {
        let offset = u16::try_from(index)
            .map_err(|_| HarnessError::Config(format!("node index {index} out of range")))?;
        let bump = |base: u16| {
            base.checked_add(offset)
                .ok_or_else(|| HarnessError::Config(format!("port overflow for node {index}")))
        };
        Ok(Self {
            peer: bump(config.ports.peer)?,
            ws: bump(config.ports.ws)?,
            rpc: bump(config.ports.rpc)?,
        })
    }
}

/// Everything needed to start one validator process.
#[derive(Debug, Clone)]
pub struct NodeLaunchSpec {
    pub identity: String,
    pub ports: NodePorts,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
    pub node_key: Option<String>,
    pub bootnode: Option<String>,
}

impl NodeLaunchSpec {
    /// Default layout for a named node: `<data_root>/<name>` and
    /// `<log_dir>/node_<name>.log`.
    pub fn for_identity(
        config: &HarnessConfig,
        identity: &str,
        index: usize,
    ) -> HarnessResult<Self> {
        let name = identity.to_ascii_lowercase();
        Ok(Self {
            ports: NodePorts::for_index(config, index)?,
            data_dir: config.data_dir(&name),
            log_file: config.log_file(&name),
            identity: name,
            node_key: None,
            bootnode: None,
        })
    }

    pub fn with_node_key(mut self, key: impl Into<String>) -> Self {
        self.node_key = Some(key.into());
        self
    }

    pub fn with_bootnode(mut self, bootnode: impl Into<String>) -> Self {
        self.bootnode = Some(bootnode.into());
        self
    }
}

/// Arguments passed to the node binary, in a stable order.
pub fn node_arguments(config: &HarnessConfig, spec: &NodeLaunchSpec) -> Vec<String> {
    let mut args = vec![
        "--base-path".to_string(),
        spec.data_dir.display().to_string(),
        "--chain".to_string(),
        config.chain.clone(),
        format!("--{}", spec.identity.to_ascii_lowercase()),
        "--port".to_string(),
        spec.ports.peer.to_string(),
        "--ws-port".to_string(),
        spec.ports.ws.to_string(),
        "--rpc-port".to_string(),
        spec.ports.rpc.to_string(),
        "--telemetry-url".to_string(),
        config.telemetry_url.clone(),
        "--validator".to_string(),
        "--rpc-methods".to_string(),
        "Unsafe".to_string(),
        "--rpc-cors".to_string(),
        "all".to_string(),
    ];
    if let Some(key) = &spec.node_key {
        args.push("--node-key".to_string());
        args.push(key.clone());
    }
    if let Some(bootnode) = &spec.bootnode {
        args.push("--bootnodes".to_string());
        args.push(bootnode.clone());
    }
    args
}

pub struct NodeProcessHandle {
    name: String,
    pid: Option<u32>,
    child: Child,
    log: Option<File>,
    log_path: PathBuf,
    data_dir: PathBuf,
    ports: NodePorts,
    node_key: Option<String>,
    bootnode: Option<String>,
    state: NodeState,
}

impl NodeProcessHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ports(&self) -> NodePorts {
        self.ports
    }

    pub fn node_key(&self) -> Option<&str> {
        self.node_key.as_deref()
    }

    pub fn bootnode(&self) -> Option<&str> {
        self.bootnode.as_deref()
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn endpoint(&self) -> NodeEndpoint {
        NodeEndpoint::local(self.name.clone(), self.ports.rpc)
    }

    pub(crate) fn mark_ready(&mut self) {
        self.state = NodeState::Ready;
    }

    /// Returns the exit status if the process has already stopped.
    pub(crate) fn exit_status(&mut self) -> HarnessResult<Option<String>> {
        Ok(self.child.try_wait()?.map(|status| status.to_string()))
    }

    /// Sends the graceful terminate signal, waits `grace`, then force kills.
    /// Failures are logged and never returned.
    pub(crate) async fn terminate(&mut self, grace: Duration) {
        if self.state == NodeState::Terminated {
            return;
        }
        self.state = NodeState::Terminating;
        info!(
            target = "chain_harness::supervisor",
            node = %self.name,
            pid = ?self.pid,
            "terminating node"
        );

        if self.child.id().is_some() {
            if let Err(err) = send_terminate(&mut self.child) {
                warn!(
                    target = "chain_harness::supervisor",
                    node = %self.name,
                    "failed to signal termination: {err}"
                );
            }
        }

        match timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(
                    target = "chain_harness::supervisor",
                    node = %self.name,
                    status = %status,
                    "node has terminated"
                );
            }
            Ok(Err(err)) => {
                warn!(
                    target = "chain_harness::supervisor",
                    node = %self.name,
                    "failed to await node exit: {err}"
                );
            }
            Err(_) => {
                warn!(
                    target = "chain_harness::supervisor",
                    node = %self.name,
                    grace_ms = grace.as_millis() as u64,
                    "node ignored terminate signal, killing"
                );
                if let Err(err) = self.child.kill().await {
                    warn!(
                        target = "chain_harness::supervisor",
                        node = %self.name,
                        "failed to kill node: {err}"
                    );
                }
            }
        }

        self.log.take();
        self.state = NodeState::Terminated;
    }

    /// Synchronous last resort used when the supervisor is dropped with live
    /// handles.
    pub(crate) fn kill_now(&mut self) {
        if self.state == NodeState::Terminated {
            return;
        }
        if let Err(err) = self.child.start_kill() {
            warn!(
                target = "chain_harness::supervisor",
                node = %self.name,
                "failed to kill node on drop: {err}"
            );
        }
        self.log.take();
        self.state = NodeState::Terminated;
    }
}

/// Clears `dir` so the node starts from an empty base path. A missing
/// directory is already clean.
pub fn reset_data_dir(dir: &Path) -> HarnessResult<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(HarnessError::DataDirResetError {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

pub fn spawn_node(
    config: &HarnessConfig,
    spec: &NodeLaunchSpec,
) -> HarnessResult<NodeProcessHandle> {
    if !config.node_binary.is_file() {
        return Err(HarnessError::BinaryNotFound(config.node_binary.clone()));
    }

    reset_data_dir(&spec.data_dir)?;

    if let Some(parent) = spec.log_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let log = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&spec.log_file)?;
    let stdout = log.try_clone()?;
    let stderr = log.try_clone()?;

    let args = node_arguments(config, spec);
    info!(
        target = "chain_harness::supervisor",
        node = %spec.identity,
        program = %config.node_binary.display(),
        args = ?args,
        log = %spec.log_file.display(),
        "spawning node"
    );

    let child = Command::new(&config.node_binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => HarnessError::BinaryNotFound(config.node_binary.clone()),
            _ => HarnessError::Io(err),
        })?;

    Ok(NodeProcessHandle {
        name: spec.identity.clone(),
        pid: child.id(),
        child,
        log: Some(log),
        log_path: spec.log_file.clone(),
        data_dir: spec.data_dir.clone(),
        ports: spec.ports,
        node_key: spec.node_key.clone(),
        bootnode: spec.bootnode.clone(),
        state: NodeState::Starting,
    })
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    let id = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "node process is not running"))?;
    let result = unsafe { libc::kill(id as libc::pid_t, libc::SIGTERM) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
