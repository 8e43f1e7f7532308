use std::{
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
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

struct ActiveWindow<T> {
    start: SystemTime,
    end: SystemTime,
    items: Vec<StreamResult<T>>,
}

/// Overlapping windows of size `size`, opening every `slide`. When
/// `slide == size` at most one window is ever active at a time, which
/// degenerates to tumbling behavior without a separate code path.
pub struct SlidingWindow<T> {
    size: Duration,
    slide: Duration,
    clock: Arc<dyn Clock>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> SlidingWindow<T> {
    pub fn new(size: Duration, clock: Arc<dyn Clock>) -> Self {
        let size = size.max(Duration::from_nanos(1));
        Self {
            size,
            slide: size,
            clock,
            name: "sliding_window".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_slide(mut self, slide: Duration) -> Self {
        self.slide = slide.max(Duration::from_nanos(1));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for SlidingWindow<T>
where
    T: Clone + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let size = self.size;
        let slide = self.slide;
        let clock = self.clock.clone();
        let name = self.name.clone();
        // Sampled here, before the task is spawned: on a current-thread
        // runtime the spawned task may not run until the caller first awaits
        // something pending, by which point a test driving a fake clock with
        // synchronous `advance()` calls could have moved `now` well past
        // process-entry time.
        let mut ticker = clock.new_ticker(slide);
        let start_now = clock.now();

        tokio::spawn(async move {
            // Windows open every `slide`, starting from process entry, so a
            // window already covers items that arrive before the first tick.
            let mut windows: Vec<ActiveWindow<T>> = vec![ActiveWindow {
                start: start_now,
                end: start_now + size,
                items: Vec::new(),
            }];

            loop {
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => {
                        flush_all(&tx, windows, size, slide).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        let now = clock.now();
                        let mut still_open = Vec::with_capacity(windows.len());
                        for window in windows.into_iter() {
                            if window.end <= now {
                                let meta = WindowMetadata::sliding(window.start, window.end, size, slide);
                                if send_burst(&tx, &scope, window.items, meta).await {
                                    return;
                                }
                            } else {
                                still_open.push(window);
                            }
                        }
                        still_open.push(ActiveWindow { start: now, end: now + size, items: Vec::new() });
                        windows = still_open;
                    }
                    item = input.recv() => {
                        match item {
                            Some(result) => {
                                for window in &mut windows {
                                    window.items.push(result.clone());
                                }
                            }
                            None => {
                                debug!(processor = %name, "input closed, flushing partial sliding windows");
                                flush_all(&tx, windows, size, slide).await;
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

async fn flush_all<T: Send>(
    tx: &crate::scope::StreamSender<T>,
    windows: Vec<ActiveWindow<T>>,
    size: Duration,
    slide: Duration,
) {
    for window in windows {
        let meta = WindowMetadata::sliding(window.start, window.end, size, slide);
        for item in window.items {
            if send_best_effort(tx, add_window_metadata(item, meta.clone())).await {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        clock::FakeClock,
        window::get_window_metadata,
    };

    #[tokio::test]
    async fn each_item_appears_once_per_overlapping_window() {
        let clock = Arc::new(FakeClock::new());
        let window = SlidingWindow::new(Duration::from_secs(2), clock.clone()).with_slide(Duration::from_secs(1));
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        // Let the window set reach steady state (two overlapping windows
        // active at any instant, since ceil(S/R) = 2) before sending, so the
        // item lands in exactly two windows rather than being skewed by the
        // startup edge effect.
        clock.advance(Duration::from_secs(3));
        tx.send(StreamResult::success("a")).await.unwrap();
        clock.advance(Duration::from_secs(2));

        let mut seen = 0;
        while let Ok(Some(item)) = tokio::time::timeout(Duration::from_millis(50), out.recv()).await {
            assert_eq!(item.value(), Some(&"a"));
            assert!(get_window_metadata(&item).is_some());
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn slide_equal_to_size_behaves_like_tumbling() {
        let clock = Arc::new(FakeClock::new());
        let window = SlidingWindow::new(Duration::from_secs(1), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));

        let item = out.recv().await.unwrap();
        assert_eq!(item.value(), Some(&1));
        // exactly one emission: at most one window is ever active when slide == size.
        assert!(tokio::time::timeout(Duration::from_millis(20), out.recv())
            .await
            .is_err());
    }
}
