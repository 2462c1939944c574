use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::HarnessConfig;
use crate::errors::{HarnessError, HarnessResult};
use crate::rpc::{NodeEndpoint, SessionFactory};

/// Polls a node's best block number until it reaches a target height.
pub struct BlockHeightWaiter {
    sessions: Arc<dyn SessionFactory>,
    poll_interval: Duration,
}

impl BlockHeightWaiter {
    pub fn new(sessions: Arc<dyn SessionFactory>, poll_interval: Duration) -> Self {
        Self {
            sessions,
            poll_interval,
        }
    }

    pub fn from_config(config: &HarnessConfig, sessions: Arc<dyn SessionFactory>) -> Self {
        Self::new(sessions, config.height_poll_interval())
    }

    pub async fn current_height(&self, endpoint: &NodeEndpoint) -> HarnessResult<u64> {
        let session = self.sessions.connect(endpoint).await?;
        session.block_height().await
    }

    /// Waits until the node reports at least `target`. `per_block` is the
    /// allowance for each missing block plus one; a height already at or past
    /// the target returns without sleeping.
    pub async fn wait_for_height(
        &self,
        endpoint: &NodeEndpoint,
        target: u64,
        per_block: Duration,
    ) -> HarnessResult<u64> {
        let mut current = self.current_height(endpoint).await?;
        if current >= target {
            return Ok(current);
        }

        let remaining = target - current;
        let blocks = u32::try_from(remaining.saturating_add(1)).unwrap_or(u32::MAX);
        let budget = per_block.saturating_mul(blocks);
        info!(
            target = "chain_harness::waiter",
            node = %endpoint.label,
            current,
            block = target,
            budget_ms = budget.as_millis() as u64,
            "waiting for blocks"
        );

        let started = Instant::now();
        loop {
            sleep(self.poll_interval).await;
            current = self.current_height(endpoint).await?;
            debug!(
                target = "chain_harness::waiter",
                node = %endpoint.label,
                current,
                block = target,
                "polled block height"
            );
            if current >= target {
                return Ok(current);
            }
            if started.elapsed() >= budget {
                return Err(HarnessError::HeightTimeout {
                    target,
                    last_observed: current,
                });
            }
        }
    }

    pub async fn wait_for_blocks(
        &self,
        endpoint: &NodeEndpoint,
        count: u64,
        per_block: Duration,
    ) -> HarnessResult<u64> {
        let current = self.current_height(endpoint).await?;
        self.wait_for_height(endpoint, current.saturating_add(count), per_block)
            .await
    }
}
