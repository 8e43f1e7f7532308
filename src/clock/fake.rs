//! Test-only clock whose time advances only by explicit `advance`/`set_time`
//! calls. Grounded on `common::runtime::testing::timer::StepTimer`'s
//! binary-heap-of-waiters design, generalized to also support periodic
//! tickers and fire-and-forget callbacks.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{
        atomic::{
            AtomicBool,
            Ordering as AtomicOrdering,
        },
        Arc,
    },
    time::{
        Duration,
        SystemTime,
        UNIX_EPOCH,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{
    mpsc,
    Notify,
};

use super::{
    Clock,
    TickerHandle,
    TimerHandle,
};

/// Arbitrary fixed starting point so fake-clock tests don't depend on wall
/// time and timestamps still print sensibly.
const FAKE_EPOCH_SECS: u64 = 1_700_000_000;

enum WaiterKind {
    Channel {
        tx: mpsc::Sender<()>,
        period: Option<Duration>,
    },
    Callback(Option<Box<dyn FnOnce() + Send>>),
}

struct Waiter {
    target: SystemTime,
    seq: u64,
    active: Arc<AtomicBool>,
    kind: WaiterKind,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        (self.target, self.seq) == (other.target, other.seq)
    }
}
impl Eq for Waiter {}
impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest target sits at the top.
        (other.target, other.seq).cmp(&(self.target, self.seq))
    }
}

struct FakeClockState {
    now: SystemTime,
    waiters: BinaryHeap<Waiter>,
    next_seq: u64,
    inflight: u64,
}

struct FakeClockInner {
    state: Mutex<FakeClockState>,
    idle: Notify,
}

/// Deterministic clock for tests. Time only moves when [`FakeClock::advance`]
/// or [`FakeClock::set_time`] is called.
#[derive(Clone)]
pub struct FakeClock(Arc<FakeClockInner>);

impl std::fmt::Debug for FakeClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeClock")
            .field("now", &self.now())
            .finish()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeClock {
    pub fn new() -> Self {
        Self(Arc::new(FakeClockInner {
            state: Mutex::new(FakeClockState {
                now: UNIX_EPOCH + Duration::from_secs(FAKE_EPOCH_SECS),
                waiters: BinaryHeap::new(),
                next_seq: 0,
                inflight: 0,
            }),
            idle: Notify::new(),
        }))
    }

    fn register(&self, target: SystemTime, kind: WaiterKind) -> Arc<AtomicBool> {
        let active = Arc::new(AtomicBool::new(true));
        let mut state = self.0.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.waiters.push(Waiter {
            target,
            seq,
            active: active.clone(),
            kind,
        });
        active
    }

    /// Advance time by `duration`, synchronously delivering to every waiter
    /// whose target is now in the past, in chronological order, then
    /// spawning any due callbacks. Does not wait for spawned callbacks to
    /// complete; use [`FakeClock::barrier`] for that.
    pub fn advance(&self, duration: Duration) {
        let mut due_callbacks: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
        {
            let mut state = self.0.state.lock();
            let new_now = state
                .now
                .checked_add(duration)
                .expect("FakeClock time overflowed");
            loop {
                let Some(top) = state.waiters.peek() else {
                    break;
                };
                if top.target > new_now {
                    break;
                }
                let waiter = state.waiters.pop().expect("just peeked");
                if !waiter.active.load(AtomicOrdering::SeqCst) {
                    continue;
                }
                match waiter.kind {
                    WaiterKind::Channel { tx, period } => {
                        let _ = tx.try_send(());
                        if let Some(period) = period {
                            let mut next_target = waiter.target + period;
                            while next_target <= new_now {
                                let _ = tx.try_send(());
                                next_target += period;
                            }
                            let seq = state.next_seq;
                            state.next_seq += 1;
                            state.waiters.push(Waiter {
                                target: next_target,
                                seq,
                                active: waiter.active.clone(),
                                kind: WaiterKind::Channel {
                                    tx,
                                    period: Some(period),
                                },
                            });
                        }
                    },
                    WaiterKind::Callback(callback) => {
                        if let Some(callback) = callback {
                            state.inflight += 1;
                            due_callbacks.push(callback);
                        }
                    },
                }
            }
            state.now = new_now;
        }
        for callback in due_callbacks {
            let inner = self.0.clone();
            tokio::spawn(async move {
                callback();
                let mut state = inner.state.lock();
                state.inflight -= 1;
                if state.inflight == 0 {
                    drop(state);
                    inner.idle.notify_waiters();
                }
            });
        }
    }

    /// Jump directly to `time`. Panics if `time` precedes the clock's
    /// current time — time must never move backwards.
    pub fn set_time(&self, time: SystemTime) {
        let current = self.now();
        let duration = time
            .duration_since(current)
            .unwrap_or_else(|_| panic!("FakeClock time must never move backwards ({current:?} -> {time:?})"));
        self.advance(duration);
    }

    /// Registers `callback` to run on a fresh task once `duration` has
    /// elapsed according to this clock.
    pub fn spawn_after(&self, duration: Duration, callback: impl FnOnce() + Send + 'static) {
        let target = self.now() + duration;
        self.register(target, WaiterKind::Callback(Some(Box::new(callback))));
    }

    /// Waits for every callback registered via [`FakeClock::spawn_after`]
    /// and triggered by advancement so far to finish running.
    pub async fn barrier(&self) {
        loop {
            let notified = self.0.idle.notified();
            {
                let state = self.0.state.lock();
                if state.inflight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    pub fn pending_waiters(&self) -> usize {
        self.0.state.lock().waiters.len()
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        self.0.state.lock().now
    }

    async fn after(&self, duration: Duration) {
        let mut timer = self.new_timer(duration);
        timer.fired().await;
    }

    fn new_timer(&self, duration: Duration) -> Box<dyn TimerHandle> {
        let (tx, rx) = mpsc::channel(1);
        let target = self.now() + duration;
        let active = self.register(
            target,
            WaiterKind::Channel {
                tx,
                period: None,
            },
        );
        Box::new(FakeTimer {
            clock: self.clone(),
            rx,
            active,
        })
    }

    fn new_ticker(&self, period: Duration) -> Box<dyn TickerHandle> {
        let (tx, rx) = mpsc::channel(1);
        let target = self.now() + period;
        let active = self.register(
            target,
            WaiterKind::Channel {
                tx,
                period: Some(period),
            },
        );
        Box::new(FakeTicker {
            clock: self.clone(),
            rx,
            active,
        })
    }
}

struct FakeTimer {
    clock: FakeClock,
    rx: mpsc::Receiver<()>,
    active: Arc<AtomicBool>,
}

#[async_trait]
impl TimerHandle for FakeTimer {
    async fn fired(&mut self) {
        match self.rx.recv().await {
            Some(()) => (),
            None => std::future::pending::<()>().await,
        }
    }

    fn stop(&mut self) -> bool {
        self.active.swap(false, AtomicOrdering::SeqCst)
    }

    fn reset(&mut self, duration: Duration) -> bool {
        let was_active = self.stop();
        let (tx, rx) = mpsc::channel(1);
        let target = self.clock.now() + duration;
        self.active = self.clock.register(
            target,
            WaiterKind::Channel {
                tx,
                period: None,
            },
        );
        self.rx = rx;
        was_active
    }
}

struct FakeTicker {
    clock: FakeClock,
    rx: mpsc::Receiver<()>,
    active: Arc<AtomicBool>,
}

#[async_trait]
impl TickerHandle for FakeTicker {
    async fn tick(&mut self) {
        if !self.active.load(AtomicOrdering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match self.rx.recv().await {
            Some(()) => (),
            None => std::future::pending::<()>().await,
        }
    }

    fn stop(&mut self) {
        self.active.store(false, AtomicOrdering::SeqCst);
    }
}

#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{
            AtomicU32,
            Ordering,
        },
        time::Duration,
    };

    use super::*;

    #[tokio::test]
    async fn timer_fires_on_advance() {
        let clock = FakeClock::new();
        let mut timer = clock.new_timer(Duration::from_millis(100));
        let waited = tokio::spawn({
            let mut guard = timer;
            async move {
                guard.fired().await;
            }
        });
        // give the spawned task a chance to register interest (not strictly
        // necessary since delivery is buffered, but mirrors real usage).
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(100));
        waited.await.unwrap();
    }

    #[tokio::test]
    async fn waiters_fire_in_chronological_order() {
        let clock = FakeClock::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (i, ms) in [30u64, 10, 20].into_iter().enumerate() {
            let order = order.clone();
            clock.spawn_after(Duration::from_millis(ms), move || {
                order.lock().push((ms, i));
            });
        }
        clock.advance(Duration::from_millis(30));
        clock.barrier().await;
        let recorded: Vec<u64> = order.lock().iter().map(|(ms, _)| *ms).collect();
        assert_eq!(recorded, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn ticker_rearms_for_every_period_within_one_advance() {
        let clock = FakeClock::new();
        let mut ticker = clock.new_ticker(Duration::from_millis(10));
        clock.advance(Duration::from_millis(35));
        // First tick is buffered; further ticks within the same advance were
        // dropped because the capacity-1 channel was already full.
        ticker.tick().await;
        assert_eq!(clock.pending_waiters(), 1);
    }

    #[tokio::test]
    async fn reset_tombstones_the_old_waiter() {
        let clock = FakeClock::new();
        let mut timer = clock.new_timer(Duration::from_millis(50));
        assert!(timer.reset(Duration::from_millis(10)));
        clock.advance(Duration::from_millis(10));
        timer.fired().await;
    }

    #[tokio::test]
    #[should_panic(expected = "must never move backwards")]
    async fn set_time_backwards_panics() {
        let clock = FakeClock::new();
        let now = clock.now();
        clock.set_time(now - Duration::from_secs(1));
    }

    #[tokio::test]
    async fn barrier_waits_for_callback_completion() {
        let clock = FakeClock::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter2 = counter.clone();
        clock.spawn_after(Duration::from_millis(5), move || {
            counter2.store(1, Ordering::SeqCst);
        });
        clock.advance(Duration::from_millis(5));
        clock.barrier().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
