//! Pool lifecycle: checking, fetching, replenishment control and supervision

pub mod check;
pub mod controller;
pub mod fetch;
pub mod runner;
pub mod state;
pub mod supervisor;

pub use check::{CheckReport, CheckWorker};
pub use controller::{Decision, Replenisher, ReplenishmentController, TickOutcome};
pub use fetch::{FetchReport, FetchSettings, FetchWorker};
pub use runner::{check_loop, replenish_loop};
pub use state::{Flag, PoolKeys, PoolState, PoolStatus};
pub use supervisor::{Backoff, Immediate, RestartPolicy, Supervisor, TaskFactory, TaskSummary};
