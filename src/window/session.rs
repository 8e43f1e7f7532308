use std::{
    collections::HashMap,
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

const DEFAULT_GAP: Duration = Duration::from_secs(30 * 60);
const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

struct Session<T> {
    start: SystemTime,
    current_end: SystemTime,
    last_activity: SystemTime,
    items: Vec<StreamResult<T>>,
}

/// Groups results by a user-supplied key into windows that close after `gap`
/// of inactivity on that key, rather than at a fixed boundary.
pub struct SessionWindow<T, K, F> {
    gap: Duration,
    clock: Arc<dyn Clock>,
    key_fn: Arc<F>,
    name: String,
    _marker: std::marker::PhantomData<fn(T) -> K>,
}

impl<T, K, F> SessionWindow<T, K, F>
where
    F: Fn(&StreamResult<T>) -> K + Send + Sync + 'static,
    K: std::hash::Hash + Eq + std::fmt::Display + Clone + Send + 'static,
{
    pub fn new(key_fn: F, clock: Arc<dyn Clock>) -> Self {
        Self {
            gap: DEFAULT_GAP,
            clock,
            key_fn: Arc::new(key_fn),
            name: "session_window".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_gap(mut self, gap: Duration) -> Self {
        self.gap = gap.max(Duration::from_nanos(1));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, K, F> Processor<T, T> for SessionWindow<T, K, F>
where
    T: Clone + Send + 'static,
    K: std::hash::Hash + Eq + std::fmt::Display + Clone + Send + 'static,
    F: Fn(&StreamResult<T>) -> K + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let gap = self.gap;
        let clock = self.clock.clone();
        let name = self.name.clone();
        let key_fn = self.key_fn.clone();

        tokio::spawn(async move {
            let check_interval = (gap / 4).max(MIN_CHECK_INTERVAL);
            let mut ticker = clock.new_ticker(check_interval);
            let mut sessions: HashMap<K, Session<T>> = HashMap::new();

            loop {
                tokio::select! {
                    biased;
                    _ = scope.cancelled() => {
                        flush_all(&tx, sessions, gap).await;
                        return;
                    }
                    _ = ticker.tick() => {
                        let now = clock.now();
                        let expired: Vec<K> = sessions
                            .iter()
                            .filter(|(_, s)| now.duration_since(s.last_activity).unwrap_or_default() >= gap)
                            .map(|(k, _)| k.clone())
                            .collect();
                        for key in expired {
                            if let Some(session) = sessions.remove(&key) {
                                let meta = WindowMetadata::session(session.start, session.current_end, gap, key.to_string());
                                if send_burst(&tx, &scope, session.items, meta).await {
                                    return;
                                }
                            }
                        }
                    }
                    item = input.recv() => {
                        match item {
                            Some(result) => {
                                let now = clock.now();
                                let key = key_fn(&result);
                                let session = sessions.entry(key).or_insert_with(|| Session {
                                    start: now,
                                    current_end: now + gap,
                                    last_activity: now,
                                    items: Vec::new(),
                                });
                                session.last_activity = now;
                                session.current_end = now + gap;
                                session.items.push(result);
                            }
                            None => {
                                debug!(processor = %name, "input closed, flushing open sessions");
                                flush_all(&tx, sessions, gap).await;
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

async fn flush_all<T: Send, K: std::fmt::Display>(
    tx: &crate::scope::StreamSender<T>,
    sessions: HashMap<K, Session<T>>,
    gap: Duration,
) -> bool {
    for (key, session) in sessions {
        let meta = WindowMetadata::session(session.start, session.current_end, gap, key.to_string());
        for item in session.items {
            if send_best_effort(tx, add_window_metadata(item, meta.clone())).await {
                return true;
            }
        }
    }
    false
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
    async fn inactivity_gap_closes_a_session() {
        let clock = Arc::new(FakeClock::new());
        let window = SessionWindow::new(|r: &StreamResult<&str>| *r.value().unwrap(), clock.clone())
            .with_gap(Duration::from_secs(1));
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        tx.send(StreamResult::success("a")).await.unwrap();
        tokio::task::yield_now().await;
        clock.advance(Duration::from_millis(1500));

        let item = out.recv().await.unwrap();
        assert_eq!(item.value(), Some(&"a"));
        let meta = get_window_metadata(&item).unwrap();
        assert_eq!(meta.session_key.as_deref(), Some("a"));

        drop(tx);
        assert!(out.recv().await.is_none());
    }

    #[tokio::test]
    async fn distinct_keys_form_separate_sessions() {
        let clock = Arc::new(FakeClock::new());
        let window = SessionWindow::new(|r: &StreamResult<&str>| *r.value().unwrap(), clock.clone())
            .with_gap(Duration::from_secs(1));
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        tx.send(StreamResult::success("a")).await.unwrap();
        tx.send(StreamResult::success("b")).await.unwrap();
        tokio::task::yield_now().await;
        drop(tx);

        let mut seen = vec![];
        while let Some(item) = out.recv().await {
            seen.push(item.value().copied().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancellation_flushes_open_sessions() {
        let clock = Arc::new(FakeClock::new());
        let window = SessionWindow::new(|r: &StreamResult<&str>| *r.value().unwrap(), clock.clone())
            .with_gap(Duration::from_secs(30));
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut out = window.process(scope.clone(), input_rx);

        tx.send(StreamResult::success("a")).await.unwrap();
        tokio::task::yield_now().await;
        scope.cancel();

        let item = out.recv().await.unwrap();
        assert_eq!(item.value(), Some(&"a"));
        assert!(out.recv().await.is_none());
    }
}
