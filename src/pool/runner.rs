//! The two long-running pool loops and their wiring under a supervisor

use futures::FutureExt;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};

use crate::config::Intervals;
use crate::error::Error;
use crate::pool::check::CheckWorker;
use crate::pool::controller::ReplenishmentController;
use crate::pool::supervisor::{Supervisor, TaskFactory};

/// Sleep for `period`, returning false if shutdown was requested meanwhile
async fn pause(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sender_gone = tokio::select! {
        _ = tokio::time::sleep(period) => false,
        changed = shutdown.changed() => changed.is_err(),
    };
    !sender_gone && !*shutdown.borrow()
}

/// Transient failures log at warn, anything else at error
fn failure_level(e: &Error) -> Level {
    if e.is_transient() {
        Level::WARN
    } else {
        Level::ERROR
    }
}

fn report_failure(e: &Error, what: &str) {
    if failure_level(e) == Level::WARN {
        warn!(error = %e, "{what} failed; retrying");
    } else {
        error!(error = %e, "{what} failed; retrying next iteration");
    }
}

fn jittered(period: Duration, jitter: Duration) -> Duration {
    let max = jitter.as_millis() as u64;
    if max == 0 {
        return period;
    }
    period + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

/// Check cycles back to back, `interval` apart, until shutdown
pub async fn check_loop(
    worker: Arc<CheckWorker>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        if let Err(e) = worker.run().await {
            report_failure(&e, "Check cycle");
        }
        if !pause(interval, &mut shutdown).await {
            break;
        }
    }
    info!("Check loop stopped");
}

/// Controller ticks every `poll` plus up to `jitter`, until shutdown
pub async fn replenish_loop(
    controller: Arc<ReplenishmentController>,
    poll: Duration,
    jitter: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        if let Err(e) = controller.tick().await {
            report_failure(&e, "Controller tick");
        }
        let period = jittered(poll, jitter);
        if !pause(period, &mut shutdown).await {
            break;
        }
    }
    info!("Replenish loop stopped");
}

/// Register both loops with a supervisor polling at `intervals.supervisor`
pub fn supervisor(
    check: Arc<CheckWorker>,
    controller: Arc<ReplenishmentController>,
    intervals: Intervals,
) -> Supervisor {
    let check_task: TaskFactory = Arc::new(move |shutdown: watch::Receiver<bool>| {
        check_loop(check.clone(), intervals.check(), shutdown).boxed()
    });
    let replenish_task: TaskFactory = Arc::new(move |shutdown: watch::Receiver<bool>| {
        replenish_loop(
            controller.clone(),
            intervals.poll(),
            intervals.jitter(),
            shutdown,
        )
        .boxed()
    });

    let mut supervisor = Supervisor::new(intervals.supervisor());
    supervisor
        .supervise("check", check_task)
        .supervise("replenish", replenish_task);
    supervisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jittered_bounds() {
        let period = Duration::from_secs(20);
        assert_eq!(jittered(period, Duration::ZERO), period);
        for _ in 0..100 {
            let d = jittered(period, Duration::from_millis(500));
            assert!(d >= period && d <= period + Duration::from_millis(500));
        }
    }

    #[test]
    fn test_failure_level() {
        let outage = Error::from(crate::store::StoreError::Unavailable("down".to_string()));
        assert_eq!(failure_level(&outage), Level::WARN);
        assert_eq!(failure_level(&Error::NoValidators), Level::ERROR);
        assert_eq!(failure_level(&Error::config("bad")), Level::ERROR);
    }

    #[tokio::test]
    async fn test_pause_stops_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { pause(Duration::from_secs(60), &mut rx).await });
        tx.send(true).unwrap();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_completes() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(pause(Duration::from_millis(5), &mut rx).await);
    }
}
