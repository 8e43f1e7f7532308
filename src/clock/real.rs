//! Production implementation of [`Clock`], delegating to `tokio::time`.

use std::{
    pin::Pin,
    time::{
        Duration,
        SystemTime,
    },
};

use async_trait::async_trait;
use tokio::time::{
    Instant,
    Interval,
    MissedTickBehavior,
    Sleep,
};

use super::{
    Clock,
    TickerHandle,
    TimerHandle,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

#[async_trait]
impl Clock for RealClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn after(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn new_timer(&self, duration: Duration) -> Box<dyn TimerHandle> {
        Box::new(RealTimer {
            sleep: Some(Box::pin(tokio::time::sleep(duration))),
        })
    }

    fn new_ticker(&self, period: Duration) -> Box<dyn TickerHandle> {
        // tokio::time::interval panics on a zero period; clamp to the
        // smallest representable duration instead of rejecting construction.
        let period = period.max(Duration::from_nanos(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Box::new(RealTicker {
            interval: Some(interval),
        })
    }
}

struct RealTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

#[async_trait]
impl TimerHandle for RealTimer {
    async fn fired(&mut self) {
        match &mut self.sleep {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending::<()>().await,
        }
    }

    fn stop(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    fn reset(&mut self, duration: Duration) -> bool {
        let was_active = self.sleep.is_some();
        match &mut self.sleep {
            Some(sleep) => sleep.as_mut().reset(Instant::now() + duration),
            None => self.sleep = Some(Box::pin(tokio::time::sleep(duration))),
        }
        was_active
    }
}

struct RealTicker {
    interval: Option<Interval>,
}

#[async_trait]
impl TickerHandle for RealTicker {
    async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            },
            None => std::future::pending::<()>().await,
        }
    }

    fn stop(&mut self) {
        self.interval = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn after_resolves_once_duration_elapses() {
        let clock = RealClock;
        let start = tokio::time::Instant::now();
        clock.after(Duration::from_millis(50)).await;
        assert!(tokio::time::Instant::now() - start >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_stop_prevents_firing() {
        let clock = RealClock;
        let mut timer = clock.new_timer(Duration::from_millis(10));
        assert!(timer.stop());
        assert!(!timer.stop());
    }
}
