//! Shared fixtures for the harness integration tests.
#![allow(dead_code)]

pub mod chain;
#[cfg(unix)]
pub mod fake_node;
pub mod rpc_stub;
