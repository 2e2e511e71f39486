//! Countdown timer shared by all displays
//!
//! State lives behind one lock together with the driver handle and an epoch
//! counter. Every start spawns a driver tagged with a new epoch; pause and
//! reset bump the epoch and abort the driver, so a tick that was already in
//! flight sees a stale epoch and does nothing.
//!
//! Each state change is pushed onto an unbounded channel while the lock is
//! held, which keeps publications in mutation order without ever holding the
//! hub's lock at the same time (see `broadcast::spawn_timer_publisher`).

use crate::types::{TimerPhase, TimerState};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const TICK: Duration = Duration::from_secs(1);

struct Inner {
    state: TimerState,
    epoch: u64,
    driver: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct TimerEngine {
    inner: Arc<Mutex<Inner>>,
    updates: mpsc::UnboundedSender<TimerState>,
}

impl TimerEngine {
    /// Create an idle timer; the receiver yields every published state in order
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerState>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let engine = Self {
            inner: Arc::new(Mutex::new(Inner {
                state: TimerState::default(),
                epoch: 0,
                driver: None,
            })),
            updates,
        };
        (engine, rx)
    }

    pub fn snapshot(&self) -> TimerState {
        self.inner.lock().state.clone()
    }

    pub fn phase(&self) -> TimerPhase {
        self.inner.lock().state.phase()
    }

    /// Resume counting down from the current `time_left`.
    ///
    /// No-op while running or when there is nothing left to count.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.state.running || inner.state.time_left == 0 {
            return;
        }

        inner.epoch += 1;
        inner.state.running = true;
        inner.driver = Some(self.spawn_driver(inner.epoch));
        tracing::info!("Timer started at {}s", inner.state.time_left);
        self.publish(&inner.state);
    }

    /// Stop counting, keeping `time_left`. No-op unless running.
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if self.stop_locked(&mut inner) {
            tracing::info!("Timer paused at {}s", inner.state.time_left);
            self.publish(&inner.state);
        }
    }

    /// Stop the timer and set both `total_time` and `time_left` to `seconds`.
    ///
    /// Publishes the paused state first if the timer was running, then the
    /// reset state unconditionally.
    pub fn reset(&self, seconds: u32) {
        let mut inner = self.inner.lock();
        if self.stop_locked(&mut inner) {
            self.publish(&inner.state);
        }
        inner.state.total_time = seconds;
        inner.state.time_left = seconds;
        tracing::info!("Timer reset to {}s", seconds);
        self.publish(&inner.state);
    }

    /// Returns whether the timer was running
    fn stop_locked(&self, inner: &mut Inner) -> bool {
        if !inner.state.running {
            return false;
        }
        inner.state.running = false;
        inner.epoch += 1;
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        true
    }

    fn publish(&self, state: &TimerState) {
        // receiver gone means the server is shutting down
        let _ = self.updates.send(state.clone());
    }

    fn spawn_driver(&self, epoch: u64) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        let engine_updates = self.updates.clone();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK, TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !tick(&inner, epoch, &engine_updates) {
                    return;
                }
            }
        })
    }
}

/// One driver tick. Returns false once the driver should exit.
fn tick(inner: &Weak<Mutex<Inner>>, epoch: u64, updates: &mpsc::UnboundedSender<TimerState>) -> bool {
    let Some(shared) = inner.upgrade() else {
        return false;
    };
    let mut inner = shared.lock();
    if inner.epoch != epoch || !inner.state.running {
        return false;
    }

    inner.state.time_left = inner.state.time_left.saturating_sub(1);
    let keep_running = inner.state.time_left > 0;
    if !keep_running {
        // auto-stop at zero; the driver is this task, so just drop the handle
        inner.state.running = false;
        inner.epoch += 1;
        inner.driver = None;
        tracing::info!("Timer reached zero");
    }

    let _ = updates.send(inner.state.clone());
    keep_running
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(running: bool, time_left: u32, total_time: u32) -> TimerState {
        TimerState {
            running,
            time_left,
            total_time,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_to_zero() {
        let (timer, mut rx) = TimerEngine::new();
        timer.reset(10);
        timer.start();

        assert_eq!(rx.recv().await, Some(state(false, 10, 10)));
        assert_eq!(rx.recv().await, Some(state(true, 10, 10)));

        for left in (1..10).rev() {
            assert_eq!(rx.recv().await, Some(state(true, left, 10)));
        }
        // the tick that reaches zero stops the timer in the same publication
        assert_eq!(rx.recv().await, Some(state(false, 0, 10)));
        assert_eq!(timer.phase(), TimerPhase::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_implies_time_left() {
        let (timer, mut rx) = TimerEngine::new();
        timer.reset(3);
        timer.start();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let mut seen = 0;
        while let Ok(observed) = rx.try_recv() {
            assert!(!observed.running || observed.time_left > 0, "{:?}", observed);
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_driver() {
        let (timer, mut rx) = TimerEngine::new();
        timer.reset(10);
        timer.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        timer.pause();

        let snapshot = timer.snapshot();
        assert_eq!(snapshot, state(false, 8, 10));
        assert_eq!(timer.phase(), TimerPhase::Paused);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(timer.snapshot(), snapshot);

        let mut last = None;
        while let Ok(observed) = rx.try_recv() {
            last = Some(observed);
        }
        assert_eq!(last, Some(snapshot));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_noop_when_running_or_idle() {
        let (timer, mut rx) = TimerEngine::new();

        // idle: nothing to count
        timer.start();
        assert!(rx.try_recv().is_err());
        assert_eq!(timer.phase(), TimerPhase::Idle);

        timer.reset(5);
        timer.start();
        timer.start();
        timer.start();
        while rx.try_recv().is_ok() {}

        // a second driver would make this drop by two per second
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(timer.snapshot().time_left, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_when_not_running_is_silent() {
        let (timer, mut rx) = TimerEngine::new();
        timer.reset(5);
        while rx.try_recv().is_ok() {}

        timer.pause();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_always_publishes_and_stops() {
        let (timer, mut rx) = TimerEngine::new();

        timer.reset(0);
        assert_eq!(rx.try_recv().ok(), Some(state(false, 0, 0)));
        timer.reset(0);
        assert_eq!(rx.try_recv().ok(), Some(state(false, 0, 0)));

        timer.reset(20);
        timer.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        while rx.try_recv().is_ok() {}

        timer.reset(45);
        assert_eq!(rx.try_recv().ok(), Some(state(false, 19, 20)));
        assert_eq!(rx.try_recv().ok(), Some(state(false, 45, 45)));
        assert_eq!(timer.snapshot(), state(false, 45, 45));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(timer.snapshot(), state(false, 45, 45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_pause_resumes() {
        let (timer, _rx) = TimerEngine::new();
        timer.reset(10);
        timer.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        timer.pause();
        assert_eq!(timer.snapshot().time_left, 9);

        timer.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(timer.snapshot(), state(true, 7, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_controls_keep_invariant() {
        let (timer, mut rx) = TimerEngine::new();
        timer.reset(4);

        let mut handles = Vec::new();
        for i in 0..16 {
            let timer = timer.clone();
            handles.push(tokio::spawn(async move {
                match i % 3 {
                    0 => timer.start(),
                    1 => timer.pause(),
                    _ => timer.reset(4),
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        timer.start();
        tokio::time::sleep(Duration::from_secs(10)).await;

        while let Ok(observed) = rx.try_recv() {
            assert!(!observed.running || observed.time_left > 0);
        }
        assert_eq!(timer.phase(), TimerPhase::Idle);
    }
}
