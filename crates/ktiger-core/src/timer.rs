//! Per-section countdown clock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::store::PositionCheckpoint;

const TICK: Duration = Duration::from_secs(1);

/// Countdown bound to the active section.
///
/// At most one countdown runs per timer; `start` stops the previous one.
/// Remaining time is mirrored into the position checkpoint every tick and
/// flushed to the store every `checkpoint_every` ticks.
pub struct SectionTimer {
    checkpoint: Arc<PositionCheckpoint>,
    checkpoint_every: u32,
    remaining: Arc<watch::Sender<u64>>,
    task: Option<JoinHandle<()>>,
}

impl SectionTimer {
    pub fn new(checkpoint: Arc<PositionCheckpoint>, checkpoint_every: u32) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            checkpoint,
            checkpoint_every: checkpoint_every.max(1),
            remaining: Arc::new(tx),
            task: None,
        }
    }

    /// Start counting down from `duration_secs`.
    ///
    /// `on_expire` runs exactly once, when the remaining time reaches zero;
    /// it does not run if the timer is stopped first.
    pub fn start<F>(&mut self, duration_secs: u64, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.stop();
        self.remaining.send_replace(duration_secs);
        self.checkpoint.set_time_left(duration_secs);
        debug!(duration_secs, "section timer started");

        let remaining = Arc::clone(&self.remaining);
        let checkpoint = Arc::clone(&self.checkpoint);
        let every = self.checkpoint_every;
        self.task = Some(tokio::spawn(async move {
            if duration_secs == 0 {
                on_expire();
                return;
            }
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            let mut left = duration_secs;
            let mut ticks: u32 = 0;
            loop {
                ticker.tick().await;
                left = left.saturating_sub(1);
                ticks = ticks.wrapping_add(1);
                remaining.send_replace(left);
                checkpoint.set_time_left(left);

                if left == 0 {
                    debug!("section timer expired");
                    on_expire();
                    break;
                }
                if ticks % every == 0 {
                    if let Err(e) = checkpoint.flush().await {
                        warn!("timer checkpoint failed, retrying next cycle: {e}");
                    }
                }
            }
        }));
    }

    /// Cancel the running countdown, if any.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!(remaining = *self.remaining.borrow(), "section timer stopped");
        }
    }

    pub fn remaining(&self) -> u64 {
        *self.remaining.borrow()
    }

    /// Watch remaining seconds; the UI re-renders on change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.remaining.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for SectionTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::model::{AttemptId, PersistedPosition};
    use crate::mock::SlowSessionStore;
    use crate::store::MemorySessionStore;

    fn fixture() -> (Arc<MemorySessionStore>, Arc<PositionCheckpoint>) {
        let store = Arc::new(MemorySessionStore::new());
        let checkpoint = Arc::new(PositionCheckpoint::new(store.clone()));
        checkpoint.install(PersistedPosition::fresh(AttemptId::new(1), "t"));
        (store, checkpoint)
    }

    fn counter() -> (Arc<AtomicU32>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicU32::new(0));
        let f = Arc::clone(&fired);
        (fired, move || {
            f.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn expires_exactly_once_at_zero() {
        let (_store, checkpoint) = fixture();
        let mut timer = SectionTimer::new(checkpoint, 5);
        let (fired, on_expire) = counter();

        timer.start(3, on_expire);
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(timer.remaining(), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining(), 0);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoints_every_fifth_tick() {
        let (store, checkpoint) = fixture();
        let mut timer = SectionTimer::new(checkpoint, 5);
        let (_fired, on_expire) = counter();

        timer.start(60, on_expire);
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        assert_eq!(store.write_count(), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.snapshot().unwrap().time_left_seconds, Some(55));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.snapshot().unwrap().time_left_seconds, Some(50));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_expiry() {
        let (_store, checkpoint) = fixture();
        let mut timer = SectionTimer::new(checkpoint, 5);
        let (fired, on_expire) = counter();

        timer.start(2, on_expire);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        timer.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(timer.remaining(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_countdown() {
        let (_store, checkpoint) = fixture();
        let mut timer = SectionTimer::new(checkpoint, 5);
        let (first, on_first) = counter();
        let (second, on_second) = counter();

        timer.start(2, on_first);
        timer.start(4, on_second);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_immediately() {
        let (_store, checkpoint) = fixture();
        let mut timer = SectionTimer::new(checkpoint, 5);
        let (fired, on_expire) = counter();
        timer.start(0, on_expire);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timer.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_ticks() {
        let (_store, checkpoint) = fixture();
        let mut timer = SectionTimer::new(checkpoint, 5);
        let mut rx = timer.subscribe();
        let (_fired, on_expire) = counter();
        timer.start(10, on_expire);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 10);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_tick_checkpoint_does_not_outlive_clear() {
        let store = Arc::new(SlowSessionStore::new(Duration::from_millis(200)));
        let checkpoint = Arc::new(PositionCheckpoint::new(store.clone()));
        checkpoint.install(PersistedPosition::fresh(AttemptId::new(1), "t"));
        let mut timer = SectionTimer::new(Arc::clone(&checkpoint), 1);
        let (_fired, on_expire) = counter();

        timer.start(60, on_expire);
        // First tick at 1s starts a checkpoint that takes 200ms.
        tokio::time::sleep(Duration::from_millis(1_050)).await;
        timer.stop();
        checkpoint.clear().await.unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.inner().snapshot().is_none());
        assert_eq!(store.inner().write_count(), 1);
    }
}
