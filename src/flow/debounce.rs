use tracing::debug;

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

/// Emits the most recent success only after a quiet period `d` with no new
/// successes; errors bypass the delay. A fresh timer is created per arrival
/// (rather than reusing `TimerHandle::reset`) because `FakeClock`'s
/// tombstone-based reset can't guarantee a previously armed tick is cleanly
/// replaced against a concurrent `advance`. The select below is `biased`
/// with the timer branch listed first, so a timer that fires in the same
/// poll as a new input arrival is never starved by the input.
pub struct Debounce<T> {
    delay: std::time::Duration,
    clock: std::sync::Arc<dyn Clock>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T> Debounce<T> {
    pub fn new(delay: std::time::Duration, clock: std::sync::Arc<dyn Clock>) -> Self {
        Self {
            delay,
            clock,
            name: "debounce".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Processor<T, T> for Debounce<T>
where
    T: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let delay = self.delay;
        let clock = self.clock.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut pending: Option<StreamResult<T>> = None;
            let mut timer = None;

            loop {
                tokio::select! {
                    biased;
                    _ = async {
                        match timer.as_mut() {
                            Some(t) => t.fired().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        if let Some(item) = pending.take() {
                            if send_or_cancel(&tx, &scope, item).await {
                                return;
                            }
                        }
                        timer = None;
                    }
                    _ = scope.cancelled() => {
                        return;
                    }
                    item = input.recv() => {
                        match item {
                            Some(result) => {
                                if result.is_error() {
                                    if send_or_cancel(&tx, &scope, result).await {
                                        return;
                                    }
                                    continue;
                                }
                                pending = Some(result);
                                timer = Some(clock.new_timer(delay));
                            }
                            None => {
                                debug!(processor = %name, "input closed, flushing pending debounce item");
                                if let Some(item) = pending.take() {
                                    send_best_effort(&tx, item).await;
                                }
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
