//! Integration-test harness for a permissioned multi-node chain.
//!
//! The harness boots a local network of validator processes and drives it with
//! signed calls:
//!
//! - [`supervisor::NodeSupervisor`] spawns the node binary, waits for each
//!   process to report readiness and wires followers to the leader.
//! - [`client::SignedCallClient`] signs calls with the development identities
//!   from [`identity::IdentityProvider`], submits them over a fresh
//!   [`rpc::RpcSession`] and verifies the emitted events.
//! - [`waiter::BlockHeightWaiter`] polls the chain height with a budget that
//!   grows with the number of missing blocks.
//!
//! Settings come from [`config::HarnessConfig`].

pub mod calls;
pub mod client;
pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod rpc;
pub mod supervisor;
pub mod waiter;

pub use client::{Invocation, SignedCallClient};
pub use config::HarnessConfig;
pub use errors::{HarnessError, HarnessResult};
pub use events::{Event, ExpectedEvent};
pub use identity::{Identity, IdentityProvider};
pub use rpc::{CompletionMode, NodeEndpoint};
pub use supervisor::{NetworkTopology, NodeSupervisor};
pub use waiter::BlockHeightWaiter;
