use std::sync::Arc;

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

/// Forwards successes for which `predicate` holds; forwards every error
/// unchanged (re-tagged with this processor's name). The predicate never
/// sees errors.
pub struct Filter<T, P> {
    predicate: Arc<P>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, P> Filter<T, P>
where
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    pub fn new(predicate: P) -> Self {
        Self {
            predicate: Arc::new(predicate),
            name: "filter".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, P> Processor<T, T> for Filter<T, P>
where
    T: Send + 'static,
    P: Fn(&T) -> bool + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let name = self.name.clone();
        let predicate = self.predicate.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };
                let item = item.retag(name.clone());
                let forward = match item.value() {
                    Some(value) => predicate(value),
                    None => true,
                };
                if forward && send_or_cancel(&tx, &scope, item).await {
                    return;
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
    async fn keeps_successes_matching_predicate_and_all_errors() {
        let filter = Filter::new(|n: &i32| *n % 2 == 0);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = filter.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        tx.send(StreamResult::error(3, anyhow::anyhow!("boom"), "source")).await.unwrap();
        drop(tx);

        let first = out.recv().await.unwrap();
        assert_eq!(first.value(), Some(&2));

        let second = out.recv().await.unwrap();
        assert!(second.is_error());
        assert_eq!(second.error_envelope().unwrap().processor_name(), "filter");

        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_stops_forwarding() {
        let filter = Filter::new(|_: &i32| true);
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = filter.process(scope.clone(), input_rx);

        scope.cancel();
        tx.send(StreamResult::success(1)).await.unwrap();
        assert!(out.recv().await.is_none());
    }
}
