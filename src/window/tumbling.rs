use std::{
    sync::Arc,
    time::Duration,
};

use tracing::debug;

use super::metadata::{
    add_window_metadata,
    WindowMetadata,
};
use crate::{
    clock::Clock,
    processor::Processor,
    result::StreamResult,
    scope::{
        coerce_channel_capacity,
        send_best_effort,
        send_or_cancel,
        Scope,
        StreamReceiver,
        DEFAULT_CHANNEL_CAPACITY,
    },
};

/// Fixed, non-overlapping windows of size `size`. A ticker of period `size`
/// closes the current window and opens the next; every result buffered
/// since the previous tick is decorated with the just-closed window's
/// metadata and emitted as a burst.
pub struct TumblingWindow<T> {
    size: Duration,
    clock: Arc<dyn Clock>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> TumblingWindow<T> {
    pub fn new(size: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            size: size.max(Duration::from_nanos(1)),
            clock,
            name: "tumbling_window".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn size(&self) -> Duration {
        self.size
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }
}

impl<T> Processor<T, T> for TumblingWindow<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let size = self.size;
        let clock = self.clock.clone();
        let name = self.name.clone();
        // Sampled here, before the task is spawned: on a current-thread
        // runtime the spawned task may not run until the caller first awaits
        // something pending, by which point a test driving a fake clock with
        // synchronous `advance()` calls could have moved `now` well past the
        // window's true origin.
        let mut ticker = clock.new_ticker(size);
        let mut window_start = clock.now();

        tokio::spawn(async move {
            let mut window_end = window_start + size;
            let mut buffer: Vec<StreamResult<T>> = Vec::new();

            loop {
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => {
                        flush(&tx, buffer, WindowMetadata::tumbling(window_start, window_end, size)).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        let closed = std::mem::take(&mut buffer);
                        let meta = WindowMetadata::tumbling(window_start, window_end, size);
                        if send_burst(&tx, &scope, closed, meta).await {
                            return;
                        }
                        window_start = window_end;
                        window_end = window_start + size;
                    }
                    item = input.recv() => {
                        match item {
                            Some(result) => buffer.push(result),
                            None => {
                                debug!(processor = %name, "input closed, flushing partial tumbling window");
                                flush(&tx, buffer, WindowMetadata::tumbling(window_start, window_end, size)).await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        rx
    }
}

async fn send_burst<T: Send>(
    tx: &crate::scope::StreamSender<T>,
    scope: &Scope,
    items: Vec<StreamResult<T>>,
    meta: WindowMetadata,
) -> bool {
    for item in items {
        if send_or_cancel(tx, scope, add_window_metadata(item, meta.clone())).await {
            return true;
        }
    }
    false
}

async fn flush<T: Send>(tx: &crate::scope::StreamSender<T>, items: Vec<StreamResult<T>>, meta: WindowMetadata) {
    for item in items {
        if send_best_effort(tx, add_window_metadata(item, meta.clone())).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::FakeClock;

    #[tokio::test]
    async fn buckets_items_by_scheduled_window_boundaries() {
        let clock = Arc::new(FakeClock::new());
        let start = clock.now();
        let window = TumblingWindow::new(Duration::from_secs(1), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        clock.advance(Duration::from_millis(200));
        tx.send(StreamResult::success(2)).await.unwrap();
        clock.advance(Duration::from_millis(200));
        tx.send(StreamResult::success(3)).await.unwrap();
        // advance past the first window boundary (1s) and into the next item
        clock.advance(Duration::from_millis(800));

        let first = out.recv().await.unwrap();
        assert_eq!(first.value(), Some(&1));
        let meta = super::super::get_window_metadata(&first).unwrap();
        assert_eq!(meta.start, start);
        assert_eq!(meta.end, start + Duration::from_secs(1));

        let second = out.recv().await.unwrap();
        assert_eq!(second.value(), Some(&2));

        tx.send(StreamResult::success(4)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let third = out.recv().await.unwrap();
        assert_eq!(third.value(), Some(&3));

        drop(tx);
        let fourth = out.recv().await.unwrap();
        assert_eq!(fourth.value(), Some(&4));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_flushes_partial_window() {
        let clock = Arc::new(FakeClock::new());
        let window = TumblingWindow::new(Duration::from_secs(1), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tokio::task::yield_now().await;
        scope.cancel();

        let item = out.recv().await.unwrap();
        assert_eq!(item.value(), Some(&1));
        assert!(out.recv().await.is_none());
    }
}
