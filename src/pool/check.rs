//! Re-validation of the proxies already in the pool

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::catalog::{ValidatorCatalog, ValidatorPool};
use crate::pool::state::PoolState;
use crate::proxy::{validate_all, ProxyParser, ProxyValidator, Verdict};
use crate::Result;

/// Outcome of one check cycle
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Members in the snapshot taken at cycle start
    pub checked: usize,
    pub alive: usize,
    pub evicted: usize,
    /// Set size published at cycle end
    pub pool_size: u64,
}

/// Walks the pool once, keeping live proxies and evicting dead ones
pub struct CheckWorker {
    state: PoolState,
    validators: Arc<dyn ValidatorCatalog>,
    validator: Arc<dyn ProxyValidator>,
    concurrency: usize,
}

impl CheckWorker {
    pub fn new(
        state: PoolState,
        validators: Arc<dyn ValidatorCatalog>,
        validator: Arc<dyn ProxyValidator>,
        concurrency: usize,
    ) -> Self {
        Self {
            state,
            validators,
            validator,
            concurrency,
        }
    }

    /// Run one cycle.
    ///
    /// The count is published twice: from the snapshot before any probing,
    /// and from the set cardinality after every verdict has been applied.
    /// A cycle that fails or panics part way leaves the first value in place.
    pub async fn run(&self) -> Result<CheckReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("check", %run_id);
        self.cycle(run_id).instrument(span).await
    }

    async fn cycle(&self, run_id: Uuid) -> Result<CheckReport> {
        let started_at = Utc::now();
        let pool = ValidatorPool::load(self.validators.as_ref()).await?;

        let members = self.state.members().await?;
        self.state.publish_count(members.len() as u64).await?;
        debug!(members = members.len(), validators = pool.len(), "Checking pool");

        let checked = members.len();
        let verdicts = validate_all(
            &self.validator,
            &pool,
            members,
            self.concurrency,
            |member| ProxyParser::parse_url(member),
        )
        .await;

        let mut alive = 0;
        let mut evicted = 0;
        for (member, verdict) in verdicts {
            match verdict {
                Verdict::Valid => {
                    self.state.admit(&member).await?;
                    alive += 1;
                }
                Verdict::Invalid => {
                    if self.state.evict(&member).await? {
                        debug!(%member, "Evicted dead proxy");
                    }
                    evicted += 1;
                }
            }
        }

        let pool_size = self.state.recount().await?;
        info!(checked, alive, evicted, pool_size, "Check cycle complete");

        Ok(CheckReport {
            run_id,
            started_at,
            checked,
            alive,
            evicted,
            pool_size,
        })
    }
}
