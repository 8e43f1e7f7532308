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

/// Applies a total function to successes; errors pass through with their
/// payload retyped to `Out::default()`, cause/origin/timestamp preserved.
pub struct Mapper<In, Out, F> {
    f: Arc<F>,
    name: String,
    _marker: std::marker::PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> Mapper<In, Out, F>
where
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            name: "mapper".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<In, Out, F> Processor<In, Out> for Mapper<In, Out, F>
where
    In: Send + 'static,
    Out: Default + Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<In>) -> StreamReceiver<Out> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let name = self.name.clone();
        let f = self.f.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };
                let mapped = item.retag(name.clone()).map(|v| f(v));
                if send_or_cancel(&tx, &scope, mapped).await {
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
    async fn maps_successes_and_retypes_errors() {
        let mapper = Mapper::new(|n: i32| n.to_string());
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = mapper.process(scope.clone(), input_rx);

        tx.send(StreamResult::success(41)).await.unwrap();
        tx.send(StreamResult::error(7, anyhow::anyhow!("boom"), "source")).await.unwrap();
        drop(tx);

        let first = out.recv().await.unwrap();
        assert_eq!(first.value(), Some(&"41".to_string()));

        let second = out.recv().await.unwrap();
        assert!(second.is_error());
        let env = second.error_envelope().unwrap();
        assert_eq!(env.item(), "");
        assert_eq!(env.processor_name(), "mapper");

        assert!(out.recv().await.is_none());
    }
}
