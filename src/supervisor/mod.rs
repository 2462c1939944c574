//! Lifecycle of the validator processes backing a test network.
//!
//! The supervisor owns every spawned process. Topologies are built leader
//! first: the leader starts with a fixed peer key and must report readiness
//! before any follower is launched, and every follower dials the leader as its
//! only bootnode.

mod process;
mod readiness;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::identity::IdentityProvider;
use crate::rpc::NodeEndpoint;

pub use process::{
    node_arguments, reset_data_dir, NodeLaunchSpec, NodePorts, NodeProcessHandle, NodeState,
};
pub use readiness::log_contains_marker;

/// Detached view of a running topology, handed to test bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkTopology {
    pub leader: NodeEndpoint,
    pub followers: Vec<NodeEndpoint>,
    pub bootnode: String,
}

impl NetworkTopology {
    /// Leader first, then followers in launch order.
    pub fn endpoints(&self) -> impl Iterator<Item = &NodeEndpoint> {
        std::iter::once(&self.leader).chain(self.followers.iter())
    }

    pub fn endpoint(&self, name: &str) -> Option<&NodeEndpoint> {
        self.endpoints()
            .find(|endpoint| endpoint.label.eq_ignore_ascii_case(name))
    }

    pub fn node_count(&self) -> usize {
        1 + self.followers.len()
    }
}

pub struct NodeSupervisor {
    config: HarnessConfig,
    identities: Arc<IdentityProvider>,
    nodes: Vec<NodeProcessHandle>,
}

impl NodeSupervisor {
    pub fn new(config: HarnessConfig, identities: Arc<IdentityProvider>) -> Self {
        Self {
            config,
            identities,
            nodes: Vec::new(),
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn handles(&self) -> &[NodeProcessHandle] {
        &self.nodes
    }

    pub fn leader(&self) -> Option<&NodeProcessHandle> {
        self.nodes.first()
    }

    pub fn endpoints(&self) -> Vec<NodeEndpoint> {
        self.nodes.iter().map(NodeProcessHandle::endpoint).collect()
    }

    /// Spawns one node. The handle is registered before this returns so a
    /// failed readiness wait still gets torn down.
    pub fn launch(&mut self, spec: NodeLaunchSpec) -> HarnessResult<&NodeProcessHandle> {
        let identity = self.identities.resolve(&spec.identity)?;
        if self.nodes.iter().any(|node| node.name() == identity.flag()) {
            return Err(HarnessError::Config(format!(
                "node {} is already running",
                identity.name()
            )));
        }

        let spec = NodeLaunchSpec {
            identity: identity.flag(),
            ..spec
        };
        let handle = process::spawn_node(&self.config, &spec)?;
        info!(
            target = "chain_harness::supervisor",
            node = handle.name(),
            pid = ?handle.pid(),
            log = %handle.log_path().display(),
            "node launched"
        );
        self.nodes.push(handle);
        let index = self.nodes.len() - 1;
        Ok(&self.nodes[index])
    }

    /// Polls the node's log until the readiness marker shows up.
    pub async fn await_ready(&mut self, name: &str, timeout: Duration) -> HarnessResult<()> {
        let marker = self.config.readiness_marker.clone();
        let poll = self.config.poll_interval();
        let max_bytes = self.config.max_log_scan_bytes;
        let handle = self
            .nodes
            .iter_mut()
            .find(|node| node.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| HarnessError::Config(format!("node {name} has not been launched")))?;

        let started = Instant::now();
        loop {
            if log_contains_marker(handle.log_path(), &marker, max_bytes).await? {
                handle.mark_ready();
                info!(
                    target = "chain_harness::supervisor",
                    node = handle.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "node is ready"
                );
                return Ok(());
            }

            if let Some(status) = handle.exit_status()? {
                return Err(HarnessError::NodeExited {
                    node: handle.name().to_string(),
                    log: handle.log_path().to_path_buf(),
                    status,
                });
            }

            if started.elapsed() >= timeout {
                return Err(HarnessError::StartupTimeout {
                    node: handle.name().to_string(),
                    log: handle.log_path().to_path_buf(),
                    timeout,
                });
            }

            sleep(poll).await;
        }
    }

    /// Boots `count` nodes using the first `count` predefined identities.
    pub async fn build_topology(&mut self, count: usize) -> HarnessResult<NetworkTopology> {
        let names = self.identities.names();
        if count < 2 || count > names.len() {
            return Err(HarnessError::InvalidTopologySize {
                requested: count,
                max: names.len(),
            });
        }
        if !self.nodes.is_empty() {
            return Err(HarnessError::Config(
                "a topology is already running, tear it down first".into(),
            ));
        }

        let timeout = self.config.startup_timeout();
        info!(
            target = "chain_harness::supervisor",
            nodes = count,
            "building network topology"
        );

        let leader_spec = NodeLaunchSpec::for_identity(&self.config, names[0], 0)?
            .with_node_key(self.config.leader_node_key.clone());
        let leader_port = leader_spec.ports.peer;
        self.launch(leader_spec)?;
        self.await_ready(names[0], timeout).await?;

        let bootnode = self.config.leader_bootnode(leader_port);
        for (index, name) in names.iter().enumerate().take(count).skip(1) {
            let spec = NodeLaunchSpec::for_identity(&self.config, name, index)?
                .with_bootnode(bootnode.clone());
            self.launch(spec)?;
            self.await_ready(name, timeout).await?;
        }

        let mut endpoints = self.endpoints().into_iter();
        let leader = endpoints
            .next()
            .ok_or_else(|| HarnessError::Config("topology has no leader".into()))?;
        Ok(NetworkTopology {
            leader,
            followers: endpoints.collect(),
            bootnode,
        })
    }

    /// Stops every node and empties the registry. Termination failures are
    /// logged and swallowed.
    pub async fn teardown(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        let grace = self.config.terminate_grace();
        info!(
            target = "chain_harness::supervisor",
            nodes = self.nodes.len(),
            "tearing down network"
        );
        for mut node in self.nodes.drain(..) {
            node.terminate(grace).await;
        }
    }

    /// Builds a topology, runs `body` against it and tears everything down
    /// whatever the outcome.
    pub async fn scoped<F, Fut, T, E>(&mut self, count: usize, body: F) -> Result<T, E>
    where
        F: FnOnce(NetworkTopology) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<HarnessError>,
    {
        let outcome = match self.build_topology(count).await {
            Ok(topology) => body(topology).await,
            Err(err) => Err(E::from(err)),
        };
        self.teardown().await;
        outcome
    }
}

impl Drop for NodeSupervisor {
    fn drop(&mut self) {
        if self.nodes.is_empty() {
            return;
        }
        warn!(
            target = "chain_harness::supervisor",
            nodes = self.nodes.len(),
            "supervisor dropped with live nodes, killing them"
        );
        for node in &mut self.nodes {
            node.kill_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> NodeSupervisor {
        NodeSupervisor::new(HarnessConfig::default(), Arc::new(IdentityProvider::new()))
    }

    #[tokio::test]
    async fn rejects_topologies_outside_the_identity_registry() {
        let mut supervisor = supervisor();
        for count in [0, 1, 7] {
            match supervisor.build_topology(count).await {
                Err(HarnessError::InvalidTopologySize { requested, max }) => {
                    assert_eq!(requested, count);
                    assert_eq!(max, 6);
                }
                other => panic!("unexpected result: {:?}", other.map(|t| t.node_count())),
            }
        }
        assert!(supervisor.handles().is_empty());
    }

    #[tokio::test]
    async fn teardown_without_nodes_is_a_no_op() {
        let mut supervisor = supervisor();
        supervisor.teardown().await;
        supervisor.teardown().await;
        assert!(supervisor.handles().is_empty());
        assert!(supervisor.leader().is_none());
    }

    #[test]
    fn launch_rejects_unknown_identities() {
        let mut supervisor = supervisor();
        let spec = NodeLaunchSpec::for_identity(supervisor.config(), "ghost", 0).expect("spec");
        assert!(matches!(
            supervisor.launch(spec),
            Err(HarnessError::UnknownIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn await_ready_requires_a_launched_node() {
        let mut supervisor = supervisor();
        assert!(matches!(
            supervisor
                .await_ready("alice", Duration::from_millis(10))
                .await,
            Err(HarnessError::Config(_))
        ));
    }

    #[test]
    fn topology_lists_leader_first() {
        let topology = NetworkTopology {
            leader: NodeEndpoint::local("alice", 9933),
            followers: vec![NodeEndpoint::local("bob", 9934)],
            bootnode: HarnessConfig::default().leader_bootnode(30333),
        };
        let labels: Vec<_> = topology.endpoints().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["alice", "bob"]);
        assert_eq!(
            topology.endpoint("Bob").map(|e| e.url.as_str()),
            Some("http://127.0.0.1:9934")
        );
        assert_eq!(topology.node_count(), 2);
    }
}
