//! Periodic cycles: ingestion every few minutes, retention once a day.

pub mod ingestion;
pub mod retention;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

pub use ingestion::{IngestionCycle, IngestionReport};
pub use retention::{RetentionCycle, RetentionReport};

/// One unit of periodic work. A tick logs its own failures; the timer keeps
/// going regardless.
#[async_trait]
pub trait Cycle: Send + Sync {
    fn name(&self) -> &'static str;

    async fn tick(&self);
}

/// Runs `cycle` once immediately and then every `period` until `shutdown`
/// flips. A tick that overruns its period swallows the ticks it missed, so
/// runs of the same cycle never overlap.
pub async fn run_timer(cycle: Arc<dyn Cycle>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(cycle = cycle.name(), period_secs = period.as_secs(), "Cycle scheduled");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => break,
        }

        debug!(cycle = cycle.name(), "Cycle tick");
        // An in-progress tick is allowed to finish before shutdown is noticed.
        cycle.tick().await;
    }

    info!(cycle = cycle.name(), "Cycle stopped");
}

pub struct Scheduler {
    ingestion: Arc<IngestionCycle>,
    ingestion_period: Duration,
    retention: Arc<RetentionCycle>,
    retention_period: Duration,
}

impl Scheduler {
    pub fn new(
        ingestion: IngestionCycle,
        ingestion_period: Duration,
        retention: RetentionCycle,
        retention_period: Duration,
    ) -> Self {
        Self {
            ingestion: Arc::new(ingestion),
            ingestion_period,
            retention: Arc::new(retention),
            retention_period,
        }
    }

    /// Starts both timers on their own tasks.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(run_timer(
                self.ingestion,
                self.ingestion_period,
                shutdown.clone(),
            )),
            tokio::spawn(run_timer(self.retention, self.retention_period, shutdown)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        ticks: AtomicUsize,
        work: Duration,
    }

    #[async_trait]
    impl Cycle for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn tick(&self) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.work).await;
        }
    }

    fn counting(work: Duration) -> Arc<Counting> {
        Arc::new(Counting {
            ticks: AtomicUsize::new(0),
            work,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_on_period_until_shutdown() {
        let cycle = counting(Duration::ZERO);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(cycle.clone(), Duration::from_secs(600), rx));

        // First tick fires immediately, then at 600s and 1200s.
        tokio::time::sleep(Duration::from_secs(1_300)).await;
        assert_eq!(cycle.ticks.load(Ordering::SeqCst), 3);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_tick_skips_missed_periods() {
        // Each tick takes 2.5 periods; skipped ticks are not replayed.
        let cycle = counting(Duration::from_secs(25));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_timer(cycle.clone(), Duration::from_secs(10), rx));

        tokio::time::sleep(Duration::from_secs(59)).await;
        let ticks = cycle.ticks.load(Ordering::SeqCst);
        assert!(ticks <= 3, "ticks overlapped or were replayed: {}", ticks);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick() {
        let cycle = counting(Duration::ZERO);
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        run_timer(cycle.clone(), Duration::from_secs(1), rx).await;
        assert_eq!(cycle.ticks.load(Ordering::SeqCst), 0);
    }
}
