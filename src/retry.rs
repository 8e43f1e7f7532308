//! Wraps a `Processor<T, T>`, retrying failed invocations with exponential
//! backoff before giving up and dropping the item.

use std::{
    sync::Arc,
    time::Duration,
};

use rand::Rng;
use tracing::warn;

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

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const INVOCATION_TIMEOUT: Duration = Duration::from_millis(100);

/// Wraps `inner`, retrying each item against a fresh one-shot invocation of
/// the wrapped processor on failure or timeout. `classifier`, if set, can
/// veto a retry for a given cause and attempt number (returning `false`
/// gives up immediately, the same as exhausting `max_attempts`).
pub struct Retry<T, P> {
    inner: Arc<P>,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    classifier: Option<Arc<dyn Fn(&anyhow::Error, u32) -> bool + Send + Sync>>,
    name: String,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<T, P> Retry<T, P>
where
    P: Processor<T, T> + 'static,
{
    pub fn new(inner: P) -> Self {
        Self {
            inner: Arc::new(inner),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            classifier: None,
            name: "retry".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_classifier(
        mut self,
        classifier: impl Fn(&anyhow::Error, u32) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

fn backoff_for(base: Duration, max: Duration, jitter: bool, attempt: u32) -> Duration {
    let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
    let scaled = base.saturating_mul(exp).min(max);
    if jitter {
        let factor = rand::rng().random_range(0.5..1.0);
        scaled.mul_f64(factor)
    } else {
        scaled
    }
}

/// Runs one one-shot invocation of `inner` over a single item: a length-1
/// input channel, a send, and a single timed receive of the first output.
async fn invoke_once<T, P>(
    inner: &P,
    parent_scope: &Scope,
    value: T,
) -> Result<StreamResult<T>, anyhow::Error>
where
    T: Send + 'static,
    P: Processor<T, T>,
{
    let invocation_scope = parent_scope.child();
    let (invoke_tx, invoke_rx) = tokio::sync::mpsc::channel(1);
    let mut output = inner.process(invocation_scope.clone(), invoke_rx);

    if invoke_tx.send(StreamResult::success(value)).await.is_err() {
        invocation_scope.cancel();
        return Err(anyhow::anyhow!("wrapped processor dropped its input"));
    }
    drop(invoke_tx);

    let outcome = tokio::time::timeout(INVOCATION_TIMEOUT, output.recv()).await;
    invocation_scope.cancel();

    match outcome {
        Ok(Some(result)) => Ok(result),
        Ok(None) => Err(anyhow::anyhow!("wrapped processor closed without a result")),
        Err(_) => Err(anyhow::anyhow!("wrapped processor invocation timed out")),
    }
}

impl<T, P> Processor<T, T> for Retry<T, P>
where
    T: Clone + Send + 'static,
    P: Processor<T, T> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<T>) -> StreamReceiver<T> {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let inner = self.inner.clone();
        let max_attempts = self.max_attempts;
        let base_delay = self.base_delay;
        let max_delay = self.max_delay;
        let jitter = self.jitter;
        let classifier = self.classifier.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            loop {
                let item = match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => item,
                    None => return,
                };

                if item.is_error() {
                    if send_or_cancel(&tx, &scope, item).await {
                        return;
                    }
                    continue;
                }
                let Some(mut current) = item.into_value() else { continue };

                let mut attempt: u32 = 1;
                loop {
                    match invoke_once(&*inner, &scope, current.clone()).await {
                        Ok(result) if result.is_success() => {
                            if send_or_cancel(&tx, &scope, result).await {
                                return;
                            }
                            break;
                        }
                        Ok(result) => {
                            let env = result.into_error().expect("checked success above");
                            let keep_going = attempt < max_attempts
                                && classifier.as_ref().map(|c| c(env.cause(), attempt)).unwrap_or(true);
                            if !keep_going {
                                warn!(processor = %name, attempt, cause = %env.cause(), "retry exhausted, dropping item");
                                break;
                            }
                            current = env.into_item();
                        }
                        Err(cause) => {
                            let keep_going = attempt < max_attempts
                                && classifier.as_ref().map(|c| c(&cause, attempt)).unwrap_or(true);
                            if !keep_going {
                                warn!(processor = %name, attempt, %cause, "retry exhausted, dropping item");
                                break;
                            }
                        }
                    }

                    if scope.is_cancelled() {
                        return;
                    }
                    let delay = backoff_for(base_delay, max_delay, jitter, attempt);
                    tokio::select! {
                        biased;
                        _ = scope.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
            }
        });

        rx
    }
}
