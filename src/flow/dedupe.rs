use std::{
    collections::HashMap,
    hash::Hash,
    sync::Arc,
    time::{
        Duration,
        SystemTime,
    },
};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    clock::Clock,
    processor::Processor,
    scope::{
        coerce_channel_capacity,
        recv_or_cancel,
        send_or_cancel,
        Scope,
        StreamReceiver,
        DEFAULT_CHANNEL_CAPACITY,
    },
};

/// Drops successes whose key (from a user-supplied `Fn(&T) -> K`) was seen
/// within the last `ttl`. `ttl = None` means infinite retention: a key, once
/// seen, is never re-admitted. Errors always pass through.
pub struct Dedupe<T, K, F> {
    key_fn: Arc<F>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    name: String,
    _marker: std::marker::PhantomData<fn(T) -> K>,
}

impl<T, K, F> Dedupe<T, K, F>
where
    F: Fn(&T) -> K + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(key_fn: F, clock: Arc<dyn Clock>) -> Self {
        Self {
            key_fn: Arc::new(key_fn),
            ttl: None,
            clock,
            name: "dedupe".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T, K, F> Processor<T, T> for Dedupe<T, K, F>
where
    T: Send + 'static,
    K: Eq + Hash + Clone + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let key_fn = self.key_fn.clone();
        let ttl = self.ttl;
        let clock = self.clock.clone();
        let name = self.name.clone();
        let seen: Arc<Mutex<HashMap<K, SystemTime>>> = Arc::new(Mutex::new(HashMap::new()));

        let cleanup_seen = seen.clone();
        let cleanup_clock = clock.clone();
        let cleanup_scope = scope.clone();
        let cleanup_name = name.clone();
        if let Some(ttl) = ttl {
            tokio::spawn(async move {
                let mut ticker = cleanup_clock.new_ticker(ttl / 2);
                loop {
                    tokio::select! {
                        biased;
                        _ = cleanup_scope.cancelled() => return,
                        _ = ticker.tick() => {
                            let now = cleanup_clock.now();
                            let mut guard = cleanup_seen.lock();
                            let before = guard.len();
                            guard.retain(|_, last_seen| now.duration_since(*last_seen).unwrap_or_default() < ttl);
                            if guard.len() != before {
                                debug!(processor = %cleanup_name, evicted = before - guard.len(), "dedupe cleanup evicted stale keys");
                            }
                        }
                    }
                }
            });
        }

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                let forward = if item.is_error() {
                    true
                } else {
                    let key = item.value().map(&*key_fn);
                    match key {
                        Some(key) => {
                            let now = clock.now();
                            let mut guard = seen.lock();
                            let admit = match guard.get(&key) {
                                Some(last_seen) => match ttl {
                                    Some(ttl) => now.duration_since(*last_seen).unwrap_or_default() > ttl,
                                    None => false,
                                },
                                None => true,
                            };
                            if admit {
                                guard.insert(key, now);
                            }
                            admit
                        }
                        None => true,
                    }
                };

                if forward && send_or_cancel(&tx, &scope, item).await {
                    return;
                }
            }
        });

        rx
    }
}
