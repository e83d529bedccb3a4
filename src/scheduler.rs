//! Periodic task runner shared by the block producer and the block submitter
//!
//! A [`Scheduler`] owns one tokio task that calls [`PeriodicTask::work`] once per
//! tick. Ticks never overlap: the next tick is only awaited after `work` returns, and
//! a stop request is only observed between ticks.

use crate::error::ChainError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

#[async_trait]
pub trait PeriodicTask: Send + 'static {
    fn name(&self) -> &'static str;

    async fn on_start(&mut self) -> Result<(), ChainError> {
        Ok(())
    }

    /// One unit of work. An error is logged and the next tick runs normally.
    async fn work(&mut self) -> Result<(), ChainError>;

    async fn on_stop(&mut self) -> Result<(), ChainError> {
        Ok(())
    }
}

pub struct Scheduler {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns `task` on the current runtime, ticking every `tick`.
    pub fn start<T: PeriodicTask>(mut task: T, tick: Duration) -> Self {
        let name = task.name();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(scheduler = name, "Scheduler started");
            if let Err(e) = task.on_start().await {
                error!(scheduler = name, "on_start failed: {}", e);
            }

            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = task.work().await {
                            error!(scheduler = name, "Failed to execute the scheduler: {}", e);
                        }
                    }
                }
            }

            if let Err(e) = task.on_stop().await {
                error!(scheduler = name, "on_stop failed: {}", e);
            }
            info!(scheduler = name, "Scheduler stopped");
        });

        Scheduler {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Asks the task to stop after the tick in flight, if any.
    pub fn stop(&self) {
        debug!(scheduler = self.name, "Stop requested");
        let _ = self.stop_tx.send(true);
    }

    /// Waits until the task has run `on_stop` and exited.
    pub async fn wait_for_stop(self) -> Result<(), ChainError> {
        self.handle.await.map_err(|e| {
            ChainError::SchedulerError(format!("Scheduler {} did not stop cleanly: {}", self.name, e))
        })
    }
}

/// Fires once each time `floor(timestamp / interval)` moves to a new value.
#[derive(Debug, Clone)]
pub struct PeriodGate {
    interval: u64,
    old_timestamp: u64,
}

impl PeriodGate {
    /// `interval` is in seconds and must be non-zero.
    pub fn new(interval: u64, now: u64) -> Self {
        PeriodGate {
            interval: interval.max(1),
            old_timestamp: now,
        }
    }

    /// Returns true when `now` lies in a different period than the last recorded
    /// timestamp, and records `now` in that case.
    pub fn check(&mut self, now: u64) -> bool {
        let old_period = self.old_timestamp / self.interval;
        let new_period = now / self.interval;
        if old_period == new_period {
            return false;
        }
        self.old_timestamp = now;
        true
    }
}

/// Current unix time in seconds.
pub fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_period_gate_fires_once_per_window() {
        let mut gate = PeriodGate::new(600, 1200);
        let fired = (1201..1200 + 3 * 600).filter(|t| gate.check(*t)).count();
        assert_eq!(fired, 2);
    }

    #[test]
    fn test_period_gate_same_window() {
        let mut gate = PeriodGate::new(10, 11);
        assert!(!gate.check(19));
        assert!(gate.check(20));
        assert!(!gate.check(29));
        assert!(gate.check(45));
    }

    struct Counter {
        starts: Arc<AtomicUsize>,
        ticks: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn on_start(&mut self) -> Result<(), ChainError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn work(&mut self) -> Result<(), ChainError> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst);
            if n % 2 == 0 {
                return Err(ChainError::SchedulerError("even tick".to_string()));
            }
            Ok(())
        }

        async fn on_stop(&mut self) -> Result<(), ChainError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scheduler_runs_hooks_and_survives_errors() {
        let starts = Arc::new(AtomicUsize::new(0));
        let ticks = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let task = Counter {
            starts: starts.clone(),
            ticks: ticks.clone(),
            stops: stops.clone(),
        };

        let scheduler = Scheduler::start(task, Duration::from_millis(10));
        assert_eq!(scheduler.name(), "counter");
        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop();
        scheduler.wait_for_stop().await.unwrap();

        assert_eq!(starts.load(Ordering::SeqCst), 1);
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_ticks_after_stop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let task = Counter {
            starts: Arc::new(AtomicUsize::new(0)),
            ticks: ticks.clone(),
            stops: Arc::new(AtomicUsize::new(0)),
        };

        let scheduler = Scheduler::start(task, Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        scheduler.stop();
        scheduler.wait_for_stop().await.unwrap();

        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }

    struct SlowTask {
        started: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PeriodicTask for SlowTask {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn work(&mut self) -> Result<(), ChainError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_lets_tick_in_flight_finish() {
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let task = SlowTask {
            started: started.clone(),
            finished: finished.clone(),
        };

        let scheduler = Scheduler::start(task, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(finished.load(Ordering::SeqCst), 0);

        scheduler.stop();
        scheduler.wait_for_stop().await.unwrap();

        assert!(finished.load(Ordering::SeqCst) >= 1);
        assert_eq!(started.load(Ordering::SeqCst), finished.load(Ordering::SeqCst));
    }
}
