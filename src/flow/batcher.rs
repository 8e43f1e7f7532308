use std::{
    sync::Arc,
    time::Duration,
};

use tracing::debug;

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

/// Groups successes into `Vec<T>` batches, emitted when `max_size` is
/// reached or `max_latency` has elapsed since the oldest buffered item
/// arrived, whichever comes first. Errors pass through individually,
/// interleaved with batches in arrival order. A partial batch is emitted on
/// cancellation or input close.
pub struct Batcher<T> {
    max_size: usize,
    max_latency: Duration,
    clock: Arc<dyn Clock>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Batcher<T> {
    pub fn new(max_size: usize, max_latency: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            max_size: max_size.max(1),
            max_latency,
            clock,
            name: "batcher".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, Vec<T>> for Batcher<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<Vec<T>> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let max_size = self.max_size;
        let max_latency = self.max_latency;
        let clock = self.clock.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut batch: Vec<T> = Vec::new();
            let mut timer = None;

            loop {
                tokio::select! {
                    biased;
                    _ = async {
                        match timer.as_mut() {
                            Some(t) => t.fired().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        timer = None;
                        let ready = std::mem::take(&mut batch);
                        if send_or_cancel(&tx, &scope, StreamResult::success(ready)).await {
                            return;
                        }
                    }
                    _ = scope.cancelled() => {
                        if !batch.is_empty() {
                            send_best_effort(&tx, StreamResult::success(std::mem::take(&mut batch))).await;
                        }
                        return;
                    }
                    item = input.recv() => {
                        match item {
                            Some(result) => {
                                if result.is_error() {
                                    if !batch.is_empty() {
                                        timer = None;
                                        let ready = std::mem::take(&mut batch);
                                        if send_or_cancel(&tx, &scope, StreamResult::success(ready)).await {
                                            return;
                                        }
                                    }
                                    let retyped = result.retag(name.clone()).map(|_| Vec::new());
                                    if send_or_cancel(&tx, &scope, retyped).await {
                                        return;
                                    }
                                    continue;
                                }
                                if batch.is_empty() {
                                    timer = Some(clock.new_timer(max_latency));
                                }
                                if let Some(value) = result.into_value() {
                                    batch.push(value);
                                }
                                if batch.len() >= max_size {
                                    timer = None;
                                    let ready = std::mem::take(&mut batch);
                                    if send_or_cancel(&tx, &scope, StreamResult::success(ready)).await {
                                        return;
                                    }
                                }
                            }
                            None => {
                                debug!(processor = %name, "input closed, flushing partial batch");
                                if !batch.is_empty() {
                                    send_best_effort(&tx, StreamResult::success(std::mem::take(&mut batch))).await;
                                }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;

    #[tokio::test]
    async fn emits_on_reaching_max_size() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Batcher::new(2, Duration::from_secs(10), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = batcher.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        drop(tx);

        let batch = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(batch, vec![1, 2]);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn emits_on_latency_trigger_before_size_reached() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Batcher::new(10, Duration::from_millis(100), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = batcher.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(100));

        let batch = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(batch, vec![1]);
    }

    #[tokio::test]
    async fn errors_pass_through_individually() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Batcher::new(10, Duration::from_secs(10), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = batcher.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::error(2, anyhow::anyhow!("boom"), "source")).await.unwrap();
        drop(tx);

        // The partial batch buffered ahead of the error flushes first, in
        // arrival order; the error follows.
        let batch = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(batch, vec![1]);

        let error_item = out.recv().await.unwrap();
        assert!(error_item.is_error());
    }

    #[tokio::test]
    async fn cancellation_flushes_partial_batch() {
        let clock = Arc::new(FakeClock::new());
        let batcher = Batcher::new(10, Duration::from_secs(10), clock.clone());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = batcher.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tokio::task::yield_now().await;
        scope.cancel();

        let batch = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(batch, vec![1]);
        assert!(out.recv().await.is_none());
    }
}
