use std::sync::{
    atomic::{
        AtomicU64,
        Ordering,
    },
    Arc,
};

use crate::{
    result::StreamResult,
    scope::{
        coerce_channel_capacity,
        recv_or_cancel,
        send_or_cancel,
        Scope,
        StreamReceiver,
    },
};

/// Snapshot of a [`Split`]'s cumulative routing counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitStats {
    pub total: u64,
    pub true_count: u64,
    pub false_count: u64,
}

impl SplitStats {
    pub fn true_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.true_count as f64 / self.total as f64
        }
    }

    pub fn false_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.false_count as f64 / self.total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    true_count: AtomicU64,
    false_count: AtomicU64,
}

/// Routes each success to one of two outputs by `predicate`; errors always
/// route to the `false` (non-matching) output. Both outputs close together.
pub struct Split<T, P> {
    predicate: Arc<P>,
    buffer_size: usize,
    name: String,
    counters: Arc<Counters>,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, P> Split<T, P>
where
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    pub fn new(predicate: P) -> Self {
        Self {
            predicate: Arc::new(predicate),
            buffer_size: 0,
            name: "split".to_string(),
            counters: Arc::new(Counters::default()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn stats(&self) -> SplitStats {
        SplitStats {
            total: self.counters.total.load(Ordering::Relaxed),
            true_count: self.counters.true_count.load(Ordering::Relaxed),
            false_count: self.counters.false_count.load(Ordering::Relaxed),
        }
    }

    /// Splits `input` into `(matches, non_matches)`. Not a [`crate::processor::Processor`]
    /// implementation since that trait is single-output; this is the 1→2 shape.
    pub fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> (StreamReceiver<T>, StreamReceiver<T>)
    where
        T: Send + 'static,
    {
        let capacity = coerce_channel_capacity(self.buffer_size);
        let (true_tx, true_rx) = tokio::sync::mpsc::channel(capacity);
        let (false_tx, false_rx) = tokio::sync::mpsc::channel(capacity);
        let predicate = self.predicate.clone();
        let counters = self.counters.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                let item: StreamResult<T> = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };
                let item = item.retag(name.clone());
                counters.total.fetch_add(1, Ordering::Relaxed);
                let goes_true = item.value().map(|v| predicate(v)).unwrap_or(false);
                if goes_true {
                    counters.true_count.fetch_add(1, Ordering::Relaxed);
                    if send_or_cancel(&true_tx, &scope, item).await {
                        return;
                    }
                } else {
                    counters.false_count.fetch_add(1, Ordering::Relaxed);
                    if send_or_cancel(&false_tx, &scope, item).await {
                        return;
                    }
                }
            }
        });

        (true_rx, false_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_predicate_and_sends_errors_to_false() {
        let split = Split::new(|n: &i32| *n % 2 == 0);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let (mut true_rx, mut false_rx) = split.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(2)).await.unwrap();
        tx.send(StreamResult::success(3)).await.unwrap();
        tx.send(StreamResult::error(5, anyhow::anyhow!("boom"), "source")).await.unwrap();
        drop(tx);

        assert_eq!(true_rx.recv().await.unwrap().value(), Some(&2));
        assert!(true_rx.recv().await.is_none());

        assert_eq!(false_rx.recv().await.unwrap().value(), Some(&3));
        assert!(false_rx.recv().await.unwrap().is_error());
        assert!(false_rx.recv().await.is_none());

        let stats = split.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.true_count, 1);
        assert_eq!(stats.false_count, 2);
    }
}
