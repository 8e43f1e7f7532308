use std::{
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;

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

/// Leading-edge throttle: emits a success immediately if at least `d` has
/// elapsed since the last emitted success, otherwise drops it. Errors always
/// pass through. `last_emit` is shared across every concurrent `process`
/// call on the same instance, matching a single physical rate limit rather
/// than one per invocation.
pub struct Throttle<T> {
    duration: Duration,
    clock: Arc<dyn Clock>,
    last_emit: Arc<Mutex<Option<std::time::SystemTime>>>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Throttle<T> {
    pub fn new(duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            duration,
            clock,
            last_emit: Arc::new(Mutex::new(None)),
            name: "throttle".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for Throttle<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let duration = self.duration;
        let clock = self.clock.clone();
        let last_emit = self.last_emit.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                let forward = if item.is_error() || duration.is_zero() {
                    true
                } else {
                    let now = clock.now();
                    let mut guard = last_emit.lock();
                    let allow = guard.map(|last| now.duration_since(last).unwrap_or_default() >= duration).unwrap_or(true);
                    if allow {
                        *guard = Some(now);
                    }
                    allow
                };

                if forward && send_or_cancel(&tx, &scope, item).await {
                    return;
                }
            }
        });

        rx
    }
}
