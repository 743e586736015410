//! Watermark and cooldown control of pool replenishment
//!
//! Each tick reads the cached pool count and both cooldown flags, then
//! decides whether to start a fetch:
//!
//! | condition                              | decision    | fetch |
//! |----------------------------------------|-------------|-------|
//! | count < exhaust                        | `Exhausted` | yes   |
//! | count < low, protect flag absent       | `Low`       | yes   |
//! | count < low, protect flag present      | `Observing` | no    |
//! | refresh flag absent                    | `Stale`     | yes   |
//! | otherwise                              | `Healthy`   | no    |
//!
//! Rows are evaluated top to bottom. Starting a fetch arms both flags before
//! the fetch itself runs.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{Thresholds, Windows};
use crate::pool::fetch::{FetchReport, FetchWorker};
use crate::pool::state::{Flag, PoolState};
use crate::store::KeyTtl;
use crate::Result;

/// What a tick concluded about the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Exhausted,
    Low,
    Observing,
    Stale,
    Healthy,
}

impl Decision {
    pub fn evaluate(
        count: u64,
        protect_active: bool,
        refresh_active: bool,
        thresholds: &Thresholds,
    ) -> Self {
        if count < thresholds.exhaust {
            Decision::Exhausted
        } else if count < thresholds.low {
            if protect_active {
                Decision::Observing
            } else {
                Decision::Low
            }
        } else if !refresh_active {
            Decision::Stale
        } else {
            Decision::Healthy
        }
    }

    pub fn triggers_fetch(&self) -> bool {
        matches!(self, Decision::Exhausted | Decision::Low | Decision::Stale)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Exhausted => "exhausted",
            Decision::Low => "low",
            Decision::Observing => "observing",
            Decision::Stale => "stale",
            Decision::Healthy => "healthy",
        };
        write!(f, "{label}")
    }
}

/// Something that can refill the pool on demand
#[async_trait]
pub trait Replenisher: Send + Sync {
    async fn replenish(&self) -> Result<FetchReport>;
}

#[async_trait]
impl Replenisher for FetchWorker {
    async fn replenish(&self) -> Result<FetchReport> {
        self.run().await
    }
}

/// Result of one controller tick
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub decision: Decision,
    pub pool_count: u64,
    pub fetch: Option<FetchReport>,
}

pub struct ReplenishmentController {
    state: PoolState,
    thresholds: Thresholds,
    windows: Windows,
    replenisher: Arc<dyn Replenisher>,
}

impl ReplenishmentController {
    pub fn new(
        state: PoolState,
        thresholds: Thresholds,
        windows: Windows,
        replenisher: Arc<dyn Replenisher>,
    ) -> Self {
        Self {
            state,
            thresholds,
            windows,
            replenisher,
        }
    }

    /// Reset cooldowns at process start. A leftover protect flag is cleared
    /// so a restarted service may fetch at once; an existing refresh flag is
    /// kept so restarts do not force a full crawl.
    pub async fn startup(&self) -> Result<()> {
        self.state.clear(Flag::Protect).await?;
        if self.state.flag_ttl(Flag::Refresh).await? == KeyTtl::Missing {
            self.state.arm(Flag::Refresh, self.windows.refresh()).await?;
        }
        info!("Replenishment controller started");
        Ok(())
    }

    /// Evaluate the pool once and fetch if needed
    pub async fn tick(&self) -> Result<TickOutcome> {
        let pool_count = self.state.cached_count().await?.unwrap_or(0);
        let protect = self.state.flag_ttl(Flag::Protect).await?;
        let refresh = self.state.flag_ttl(Flag::Refresh).await?;
        let decision =
            Decision::evaluate(pool_count, protect.exists(), refresh.exists(), &self.thresholds);

        match decision {
            Decision::Exhausted => warn!(pool_count, "Pool exhausted; fetching"),
            Decision::Low => info!(pool_count, "Pool below low watermark; fetching"),
            Decision::Observing => info!(
                pool_count,
                protect_remaining = ?protect.remaining(),
                "Pool low; waiting out protect window"
            ),
            Decision::Stale => info!(pool_count, "Refresh due; fetching"),
            Decision::Healthy => info!(
                pool_count,
                refresh_remaining = ?refresh.remaining(),
                "Pool healthy"
            ),
        }

        let fetch = if decision.triggers_fetch() {
            self.state.arm(Flag::Protect, self.windows.protect()).await?;
            self.state.arm(Flag::Refresh, self.windows.refresh()).await?;
            Some(self.replenisher.replenish().await?)
        } else {
            None
        };

        Ok(TickOutcome {
            decision,
            pool_count,
            fetch,
        })
    }
}
