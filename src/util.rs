//! Small single-purpose processors: flattening, slicing, sampling, chunking.

use rand::Rng;

use crate::{
    processor::Processor,
    result::StreamResult,
    scope::{
        coerce_channel_capacity,
        recv_or_cancel,
        send_best_effort,
        send_or_cancel,
        Scope,
        StreamReceiver,
        DEFAULT_CHANNEL_CAPACITY,
    },
};

/// `Stream<Vec<T>> -> Stream<T>`, preserving order within and across
/// batches. A batch-level error is retyped and forwarded as a single error
/// carrying no items.
pub struct Flatten<T> {
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Flatten<T> {
    pub fn new() -> Self {
        Self {
            name: "flatten".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Default for Flatten<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Processor<Vec<T>, T> for Flatten<T>
where
    T: Default + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<Vec<T>>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                if item.is_error() {
                    let retyped = item.retag(name.clone()).map(|_| T::default());
                    if send_or_cancel(&tx, &scope, retyped).await {
                        return;
                    }
                    continue;
                }

                let Some(values) = item.into_value() else { continue };
                for value in values {
                    if send_or_cancel(&tx, &scope, StreamResult::success(value)).await {
                        return;
                    }
                }
            }
        });

        rx
    }
}

/// Alias of [`Flatten`], named for its common use unbatching `Batcher` output.
pub type Unbatcher<T> = Flatten<T>;

/// Drops the first `n` successes; errors always pass through and do not
/// count against `n`.
pub struct Skip<T> {
    n: usize,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Skip<T> {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            name: "skip".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for Skip<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let mut remaining = self.n;

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                if item.is_success() && remaining > 0 {
                    remaining -= 1;
                    continue;
                }

                if send_or_cancel(&tx, &scope, item).await {
                    return;
                }
            }
        });

        rx
    }
}

/// Forwards the first `n` successes, then closes its output promptly without
/// waiting for upstream to close. Errors pass through but do not count
/// toward `n`.
pub struct Take<T> {
    n: usize,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Take<T> {
    pub fn new(n: usize) -> Self {
        Self {
            n,
            name: "take".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for Take<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let mut remaining = self.n;

        tokio::spawn(async move {
            if remaining == 0 {
                return;
            }
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                let is_success = item.is_success();
                if send_or_cancel(&tx, &scope, item).await {
                    return;
                }
                if is_success {
                    remaining -= 1;
                    if remaining == 0 {
                        return;
                    }
                }
            }
        });

        rx
    }
}

/// Forwards each success independently with probability `p` (clamped to
/// `[0, 1]`). Errors always pass through unsampled.
pub struct Sample<T> {
    p: f64,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Sample<T> {
    pub fn new(p: f64) -> Self {
        Self {
            p: p.clamp(0.0, 1.0),
            name: "sample".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for Sample<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let p = self.p;

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                let forward = if item.is_error() {
                    true
                } else {
                    rand::rng().random_bool(p)
                };

                if forward && send_or_cancel(&tx, &scope, item).await {
                    return;
                }
            }
        });

        rx
    }
}

/// Fixed-size non-overlapping grouping of successes into `Vec<T>`. The last
/// chunk may be short. An error flushes the in-progress chunk through
/// unchanged (the same convention `Batcher` follows), then passes through.
pub struct Chunk<T> {
    size: usize,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Chunk<T> {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            name: "chunk".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, Vec<T>> for Chunk<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<Vec<T>> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let size = self.size;
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut batch: Vec<T> = Vec::with_capacity(size);
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => {
                        if !batch.is_empty() {
                            send_best_effort(&tx, StreamResult::success(std::mem::take(&mut batch))).await;
                        }
                        return;
                    }
                };

                if item.is_error() {
                    if !batch.is_empty() {
                        let flushed = std::mem::take(&mut batch);
                        if send_or_cancel(&tx, &scope, StreamResult::success(flushed)).await {
                            return;
                        }
                    }
                    let retyped = item.retag(name.clone()).map(|_| Vec::new());
                    if send_or_cancel(&tx, &scope, retyped).await {
                        return;
                    }
                    continue;
                }

                let Some(value) = item.into_value() else { continue };
                batch.push(value);
                if batch.len() >= size {
                    let flushed = std::mem::take(&mut batch);
                    if send_or_cancel(&tx, &scope, StreamResult::success(flushed)).await {
                        return;
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

    #[tokio::test]
    async fn flatten_preserves_order_across_batches() {
        let flatten = Flatten::new();
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = flatten.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(vec![1, 2])).await.unwrap();
        tx.send(StreamResult::success(vec![3])).await.unwrap();
        drop(tx);

        let mut seen = vec![];
        while let Some(item) = out.recv().await {
            seen.push(item.into_value().unwrap());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn skip_drops_the_first_n_successes() {
        let skip = Skip::new(2);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = skip.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        tx.send(StreamResult::success(3)).await.unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().value(), Some(&3));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn take_closes_after_n_successes_without_draining_upstream() {
        let take = Take::new(2);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = take.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();

        assert_eq!(out.recv().await.unwrap().value(), Some(&1));
        assert_eq!(out.recv().await.unwrap().value(), Some(&2));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn sample_zero_drops_all_successes_but_keeps_errors() {
        let sample = Sample::new(0.0);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = sample.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::error(2, anyhow::anyhow!("boom"), "source")).await.unwrap();
        drop(tx);

        let first = out.recv().await.unwrap();
        assert!(first.is_error());
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn sample_one_keeps_every_success() {
        let sample = Sample::new(1.0);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = sample.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().value(), Some(&1));
        assert_eq!(out.recv().await.unwrap().value(), Some(&2));
    }

    #[tokio::test]
    async fn chunk_groups_into_fixed_size_vecs_with_a_short_last_chunk() {
        let chunk = Chunk::new(2);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = chunk.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        tx.send(StreamResult::success(3)).await.unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().into_value().unwrap(), vec![1, 2]);
        assert_eq!(out.recv().await.unwrap().into_value().unwrap(), vec![3]);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn chunk_flushes_partial_batch_on_error() {
        let chunk = Chunk::new(5);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = chunk.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::error(2, anyhow::anyhow!("boom"), "source")).await.unwrap();
        drop(tx);

        assert_eq!(out.recv().await.unwrap().into_value().unwrap(), vec![1]);
        assert!(out.recv().await.unwrap().is_error());
        assert!(out.recv().await.is_none());
    }
}
