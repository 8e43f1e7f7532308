use tracing::debug;

use super::{
    get_window_metadata,
    Window,
};
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

/// Folds a window-decorated stream (the output of a window processor) into
/// materialized [`Window`] buckets. Relies on the window processors' emission
/// contract — every window's items arrive as a contiguous burst — so a
/// change in window key is sufficient to detect a boundary; no heartbeat
/// flush is needed.
pub struct WindowCollector<T> {
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Default for WindowCollector<T> {
    fn default() -> Self {
        Self {
            name: "window_collector".to_string(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> WindowCollector<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, Window<T>> for WindowCollector<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<Window<T>> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut current: Option<Window<T>> = None;
            let mut current_key = None;

            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => {
                        if let Some(window) = current.take() {
                            send_best_effort(&tx, StreamResult::success(window)).await;
                        }
                        debug!(processor = %name, "input closed, collector flushed");
                        return;
                    }
                };

                let meta = match get_window_metadata(&item) {
                    Some(meta) => meta.clone(),
                    None => {
                        // Undecorated items have nowhere to belong; drop them
                        // rather than guessing a window.
                        continue;
                    }
                };
                let key = meta.group_key();

                if current_key.as_ref() != Some(&key) {
                    if let Some(window) = current.take() {
                        if send_or_cancel(&tx, &scope, StreamResult::success(window)).await {
                            return;
                        }
                    }
                    current = Some(Window {
                        start: meta.start,
                        end: meta.end,
                        kind: meta.kind,
                        items: Vec::new(),
                    });
                    current_key = Some(key);
                }

                if let Some(window) = current.as_mut() {
                    window.items.push(item);
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use std::time::{
        Duration,
        UNIX_EPOCH,
    };

    use super::*;
    use crate::window::{
        add_window_metadata,
        WindowMetadata,
    };

    #[tokio::test]
    async fn groups_contiguous_same_key_items_into_one_window() {
        let meta = WindowMetadata::tumbling(UNIX_EPOCH, UNIX_EPOCH + Duration::from_secs(1), Duration::from_secs(1));
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let collector = WindowCollector::new();
        let mut out = collector.process(scope.clone(), input_rx);

        tx.send(add_window_metadata(StreamResult::success(1), meta.clone()))
            .await
            .unwrap();
        tx.send(add_window_metadata(StreamResult::success(2), meta.clone()))
            .await
            .unwrap();
        drop(tx);

        let window = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(window.items.len(), 2);
        assert_eq!(window.items[0].value(), Some(&1));
        assert_eq!(window.items[1].value(), Some(&2));
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn a_new_window_key_closes_the_previous_bucket() {
        let first = WindowMetadata::tumbling(UNIX_EPOCH, UNIX_EPOCH + Duration::from_secs(1), Duration::from_secs(1));
        let second = WindowMetadata::tumbling(
            UNIX_EPOCH + Duration::from_secs(1),
            UNIX_EPOCH + Duration::from_secs(2),
            Duration::from_secs(1),
        );
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let collector = WindowCollector::new();
        let mut out = collector.process(scope.clone(), input_rx);

        tx.send(add_window_metadata(StreamResult::success(1), first)).await.unwrap();
        tx.send(add_window_metadata(StreamResult::success(2), second)).await.unwrap();
        drop(tx);

        let first_window = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(first_window.items.len(), 1);
        let second_window = out.recv().await.unwrap().into_value().unwrap();
        assert_eq!(second_window.items.len(), 1);
        assert!(out.recv().await.is_none());
    }
}
