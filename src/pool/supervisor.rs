//! Keeps the long-running pool tasks alive
//!
//! Every poll interval the supervisor looks for tasks that have finished,
//! whether by returning or by panicking, and spawns a fresh instance from the
//! task's factory. Tasks receive a shutdown receiver and are expected to
//! stop at their next cycle boundary once it flips to `true`.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

/// Builds one run of a supervised task
pub type TaskFactory = Arc<dyn Fn(watch::Receiver<bool>) -> BoxFuture<'static, ()> + Send + Sync>;

/// How long to wait before restarting a task that stopped
pub trait RestartPolicy: Send + Sync {
    /// `restarts` counts the restarts already performed for this task
    fn delay(&self, task: &str, restarts: u32) -> Duration;
}

/// Restart straight away
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl RestartPolicy for Immediate {
    fn delay(&self, _task: &str, _restarts: u32) -> Duration {
        Duration::ZERO
    }
}

/// Restart after a delay that doubles with every restart, up to `max`
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl RestartPolicy for Backoff {
    fn delay(&self, _task: &str, restarts: u32) -> Duration {
        let factor = 1u32.checked_shl(restarts.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Restart count for one task after the supervisor stops
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub name: String,
    pub restarts: u32,
}

struct Supervised {
    name: String,
    factory: TaskFactory,
    handle: Option<JoinHandle<()>>,
    restarts: u32,
}

pub struct Supervisor {
    poll: Duration,
    policy: Arc<dyn RestartPolicy>,
    tasks: Vec<Supervised>,
}

impl Supervisor {
    pub fn new(poll: Duration) -> Self {
        Self {
            poll,
            policy: Arc::new(Immediate),
            tasks: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn RestartPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Register a task; it is first spawned when [`Supervisor::run`] starts
    pub fn supervise(&mut self, name: &str, factory: TaskFactory) -> &mut Self {
        self.tasks.push(Supervised {
            name: name.to_string(),
            factory,
            handle: None,
            restarts: 0,
        });
        self
    }

    /// Run until `shutdown` resolves, then stop every task and wait for it
    pub async fn run<S>(mut self, shutdown: S) -> Vec<TaskSummary>
    where
        S: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        for task in &mut self.tasks {
            info!(task = %task.name, "Starting task");
            task.handle = Some(tokio::spawn((task.factory)(stop_rx.clone())));
        }

        let mut ticker = interval(self.poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.restart_finished(&stop_rx).await,
                _ = &mut shutdown => break,
            }
        }

        info!("Stopping supervised tasks");
        let _ = stop_tx.send(true);
        for task in &mut self.tasks {
            if let Some(handle) = task.handle.take() {
                if let Err(e) = handle.await {
                    error!(task = %task.name, error = %e, "Task failed during shutdown");
                }
            }
        }

        self.tasks
            .into_iter()
            .map(|task| TaskSummary {
                name: task.name,
                restarts: task.restarts,
            })
            .collect()
    }

    async fn restart_finished(&mut self, stop_rx: &watch::Receiver<bool>) {
        for task in &mut self.tasks {
            let finished = task.handle.as_ref().map_or(true, JoinHandle::is_finished);
            if !finished {
                continue;
            }

            if let Some(handle) = task.handle.take() {
                match handle.await {
                    Err(e) if e.is_panic() => {
                        error!(task = %task.name, "Task panicked; restarting")
                    }
                    Err(e) => error!(task = %task.name, error = %e, "Task failed; restarting"),
                    Ok(()) => error!(task = %task.name, "Task exited; restarting"),
                }
            }

            let delay = self.policy.delay(&task.name, task.restarts);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            task.restarts += 1;
            task.handle = Some(tokio::spawn((task.factory)(stop_rx.clone())));
        }
    }
}
