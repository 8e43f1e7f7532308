use std::sync::Arc;

use tracing::error;

use crate::{
    processor::Processor,
    result::StreamResult,
    scope::{
        coerce_channel_capacity,
        recv_or_cancel,
        send_or_cancel,
        Scope,
        StreamReceiver,
        DEFAULT_CHANNEL_CAPACITY,
    },
};

/// Invokes `f` for every item (success or error) and forwards it unchanged.
/// A panic inside `f` is caught, logged, and does not drop the item or
/// bring down the pipeline.
pub struct Tap<T, F> {
    f: Arc<F>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, F> Tap<T, F>
where
    F: Fn(&StreamResult<T>) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            name: "tap".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, F> Processor<T, T> for Tap<T, F>
where
    T: Send + 'static,
    F: Fn(&StreamResult<T>) + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let name = self.name.clone();
        let f = self.f.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };
                let f = f.clone();
                if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(&item))) {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(processor = %name, panic = %message, "tap callback panicked");
                }
                if send_or_cancel(&tx, &scope, item).await {
                    return;
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

    #[tokio::test]
    async fn invokes_callback_and_forwards_unchanged() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let tap = Tap::new(move |_: &StreamResult<i32>| {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = tap.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        drop(tx);

        let item = out.recv().await.unwrap();
        assert_eq!(item.value(), Some(&1));
        assert!(out.recv().await.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn panicking_callback_does_not_drop_the_item_or_the_pipeline() {
        let tap = Tap::new(|_: &StreamResult<i32>| panic!("boom"));
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = tap.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        drop(tx);

        let first = out.recv().await.unwrap();
        assert_eq!(first.value(), Some(&1));
        let second = out.recv().await.unwrap();
        assert_eq!(second.value(), Some(&2));
        assert!(out.recv().await.is_none());
    }
}
