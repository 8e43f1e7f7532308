use std::{
    collections::VecDeque,
    sync::Arc,
};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

use crate::{
    processor::Processor,
    result::StreamResult,
    scope::{
        recv_or_cancel,
        Scope,
        StreamReceiver,
    },
};

/// Fixed-capacity ring of buffered-but-not-yet-forwarded items: admitting
/// past capacity evicts the oldest. `tokio::sync::mpsc::Receiver` has no
/// in-place random-access eviction once handed to a consumer, so the bound
/// lives here rather than in the output channel itself; a second task
/// forwards from this ring to a minimal handoff channel as the consumer
/// makes room.
struct Ring<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    input_closed: std::sync::atomic::AtomicBool,
}

/// Output of fixed `size`; when full, the oldest buffered item is evicted to
/// admit the new one (FIFO eviction). Never blocks the producer.
pub struct SlidingBuffer<T> {
    size: usize,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> SlidingBuffer<T> {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            name: "sliding_buffer".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for SlidingBuffer<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let name = self.name.clone();
        let ring: Arc<Ring<StreamResult<T>>> = Arc::new(Ring {
            items: Mutex::new(VecDeque::with_capacity(self.size)),
            capacity: self.size,
            notify: Notify::new(),
            input_closed: std::sync::atomic::AtomicBool::new(false),
        });

        let producer_ring = ring.clone();
        let producer_scope = scope.clone();
        let producer_name = name.clone();
        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &producer_scope).await {
                    Some(item) => item,
                    None => {
                        producer_ring.input_closed.store(true, std::sync::atomic::Ordering::SeqCst);
                        producer_ring.notify.notify_one();
                        return;
                    }
                };
                let mut items = producer_ring.items.lock();
                if items.len() >= producer_ring.capacity {
                    items.pop_front();
                    debug!(processor = %producer_name, "sliding buffer full, evicted oldest item");
                }
                items.push_back(item);
                drop(items);
                producer_ring.notify.notify_one();
            }
        });

        // Forwards from the ring to the external handoff channel as the
        // consumer makes room; cancellation stops it without draining the
        // ring (no flush guarantee for buffers, unlike Batcher/windows).
        // Closes once the producer has closed and the ring has drained.
        tokio::spawn(async move {
            loop {
                loop {
                    let next = ring.items.lock().pop_front();
                    let Some(item) = next else { break };
                    tokio::select! {
                        biased;
                        _ = scope.cancelled() => return,
                        result = tx.send(item) => {
                            if result.is_err() {
                                return;
                            }
                        }
                    }
                }
                if ring.input_closed.load(std::sync::atomic::Ordering::SeqCst) {
                    return;
                }
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => return,
                    _ = ring.notify.notified() => {}
                }
            }
        });

        rx
    }
}

/// Output channel of fixed `size`; when full, the incoming item is dropped
/// (never the producer blocked) and `on_drop`, if set, is invoked.
pub struct DroppingBuffer<T> {
    size: usize,
    on_drop: Option<Arc<dyn Fn(&StreamResult<T>) + Send + Sync>>,
    name: String,
}

impl<T> DroppingBuffer<T> {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            on_drop: None,
            name: "dropping_buffer".to_string(),
        }
    }

    pub fn with_on_drop(mut self, on_drop: impl Fn(&StreamResult<T>) + Send + Sync + 'static) -> Self {
        self.on_drop = Some(Arc::new(on_drop));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for DroppingBuffer<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(self.size);
        let on_drop = self.on_drop.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                if let Err(tokio::sync::mpsc::error::TrySendError::Full(item)) = tx.try_send(item) {
                    debug!(processor = %name, "dropping buffer full, discarding item");
                    if let Some(on_drop) = &on_drop {
                        on_drop(&item);
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use super::*;
    use crate::result::StreamResult;

    #[tokio::test]
    async fn sliding_buffer_evicts_oldest_on_overflow() {
        let buffer = SlidingBuffer::new(2);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = buffer.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        tx.send(StreamResult::success(3)).await.unwrap();
        tokio::task::yield_now().await;
        drop(tx);

        let mut seen = vec![];
        while let Some(item) = out.recv().await {
            seen.push(item.into_value().unwrap());
        }
        assert_eq!(seen, vec![2, 3]);
    }

    #[tokio::test]
    async fn dropping_buffer_invokes_callback_on_overflow() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let dropped2 = dropped.clone();
        let buffer = DroppingBuffer::new(1).with_on_drop(move |_: &StreamResult<i32>| {
            dropped2.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = buffer.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        tokio::task::yield_now().await;
        drop(tx);

        let first = out.recv().await.unwrap();
        assert_eq!(first.value(), Some(&1));
        assert!(out.recv().await.is_none());
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
