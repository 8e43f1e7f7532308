//! Pluggable time abstraction, modeled on `common::runtime::Runtime`:
//! processors take their notion of "now" exclusively from an injected
//! `Clock` so that time-dependent behavior (debounce, throttle, batching,
//! windowing) can be driven deterministically under test with [`FakeClock`].

mod fake;
mod real;

use std::time::{
    Duration,
    SystemTime,
};

use async_trait::async_trait;

pub use fake::FakeClock;
pub use real::RealClock;

/// A one-shot delay. Mirrors `time.Timer`: `fired()` completes when the
/// timer elapses, `stop()` cancels it, `reset()` re-arms it.
#[async_trait]
pub trait TimerHandle: Send {
    /// Waits for the timer to fire. Never returns if the timer has been
    /// stopped and not reset.
    async fn fired(&mut self);

    /// Stops the timer, returning whether it was still pending.
    fn stop(&mut self) -> bool;

    /// Re-arms the timer for `duration` from the clock's current time,
    /// returning whether it was still pending before the reset.
    fn reset(&mut self, duration: Duration) -> bool;
}

/// A periodic tick source. Mirrors `time.Ticker`.
#[async_trait]
pub trait TickerHandle: Send {
    /// Waits for the next tick. A consumer that doesn't poll promptly sees
    /// dropped ticks, not a queue of pending ones.
    async fn tick(&mut self);

    fn stop(&mut self);
}

/// Abstraction over wall-clock time, timers, and tickers.
///
/// Implementations must be safe for concurrent use: multiple processors, and
/// multiple concurrent invocations of the same processor, may share a clock.
#[async_trait]
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> SystemTime;

    /// Resolves after `duration` has elapsed according to this clock.
    async fn after(&self, duration: Duration);

    fn new_timer(&self, duration: Duration) -> Box<dyn TimerHandle>;

    fn new_ticker(&self, period: Duration) -> Box<dyn TickerHandle>;
}
