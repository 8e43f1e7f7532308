//! The value carried on every processor channel: a tagged success/error
//! result, optionally decorated with window metadata.

use std::{
    fmt,
    sync::Arc,
    time::SystemTime,
};

use crate::window::WindowMetadata;

/// Envelope around a failure flowing through a pipeline.
///
/// Carries the offending item, the underlying cause, the name of the
/// processor that produced the error, and the time it was produced. The
/// item is retained (rather than discarded) so that downstream consumers
/// and retry logic can inspect what failed.
#[derive(Debug, Clone)]
pub struct StreamError<T> {
    item: T,
    cause: Arc<anyhow::Error>,
    processor_name: Arc<str>,
    timestamp: SystemTime,
}

impl<T> StreamError<T> {
    pub fn new(item: T, cause: impl Into<anyhow::Error>, processor_name: impl Into<String>) -> Self {
        Self {
            item,
            cause: Arc::new(cause.into()),
            processor_name: Arc::from(processor_name.into()),
            timestamp: SystemTime::now(),
        }
    }

    fn from_parts(
        item: T,
        cause: Arc<anyhow::Error>,
        processor_name: Arc<str>,
        timestamp: SystemTime,
    ) -> Self {
        Self {
            item,
            cause,
            processor_name,
            timestamp,
        }
    }

    pub fn item(&self) -> &T {
        &self.item
    }

    pub fn into_item(self) -> T {
        self.item
    }

    /// The underlying cause of the failure.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// The name of the processor that originated (or last re-tagged) this error.
    pub fn processor_name(&self) -> &str {
        &self.processor_name
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Re-tag the error's origin, keeping the item, cause, and timestamp.
    pub fn retag(self, processor_name: impl Into<String>) -> Self {
        Self {
            processor_name: Arc::from(processor_name.into()),
            ..self
        }
    }

    /// Rebuild this envelope around a different item type, replacing the
    /// payload with `U::default()` while carrying the cause, origin, and
    /// timestamp through unchanged.
    pub fn retype<U: Default>(self) -> StreamError<U> {
        StreamError::from_parts(U::default(), self.cause, self.processor_name, self.timestamp)
    }
}

impl<T: fmt::Debug> fmt::Display for StreamError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] error processing {:?}: {}",
            self.processor_name, self.item, self.cause
        )
    }
}

impl<T: fmt::Debug> std::error::Error for StreamError<T> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.cause)
    }
}

#[derive(Debug, Clone)]
enum ResultInner<T> {
    Success(T),
    Error(StreamError<T>),
}

/// A single item flowing through a pipeline: either a success payload or a
/// [`StreamError`], plus an optional [`WindowMetadata`] decoration.
///
/// `StreamResult` is immutable after construction except for the metadata
/// slot, which [`crate::window::add_window_metadata`] replaces wholesale.
#[derive(Debug, Clone)]
pub struct StreamResult<T> {
    inner: ResultInner<T>,
    pub(crate) window_metadata: Option<Arc<WindowMetadata>>,
}

impl<T> StreamResult<T> {
    pub fn success(value: T) -> Self {
        Self {
            inner: ResultInner::Success(value),
            window_metadata: None,
        }
    }

    pub fn error(item: T, cause: impl Into<anyhow::Error>, processor_name: impl Into<String>) -> Self {
        Self {
            inner: ResultInner::Error(StreamError::new(item, cause, processor_name)),
            window_metadata: None,
        }
    }

    pub fn from_error(err: StreamError<T>) -> Self {
        Self {
            inner: ResultInner::Error(err),
            window_metadata: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.inner, ResultInner::Success(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.inner, ResultInner::Error(_))
    }

    pub fn value(&self) -> Option<&T> {
        match &self.inner {
            ResultInner::Success(v) => Some(v),
            ResultInner::Error(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self.inner {
            ResultInner::Success(v) => Some(v),
            ResultInner::Error(_) => None,
        }
    }

    pub fn error_envelope(&self) -> Option<&StreamError<T>> {
        match &self.inner {
            ResultInner::Success(_) => None,
            ResultInner::Error(e) => Some(e),
        }
    }

    pub fn into_error(self) -> Option<StreamError<T>> {
        match self.inner {
            ResultInner::Success(_) => None,
            ResultInner::Error(e) => Some(e),
        }
    }

    /// Re-tag an error's origin, leaving successes untouched. Used by
    /// stateless transformers that forward errors unchanged except for
    /// attribution.
    pub fn retag(self, processor_name: impl Into<String>) -> Self {
        let window_metadata = self.window_metadata.clone();
        let inner = match self.inner {
            ResultInner::Success(v) => ResultInner::Success(v),
            ResultInner::Error(e) => ResultInner::Error(e.retag(processor_name)),
        };
        Self {
            inner,
            window_metadata,
        }
    }

    /// Apply `f` to a success payload; retype an error's payload to
    /// `U::default()` while carrying the cause/origin/timestamp through.
    /// Window metadata, if present, is preserved.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StreamResult<U>
    where
        U: Default,
    {
        let window_metadata = self.window_metadata.clone();
        let inner = match self.inner {
            ResultInner::Success(v) => ResultInner::Success(f(v)),
            ResultInner::Error(e) => ResultInner::Error(e.retype()),
        };
        StreamResult {
            inner,
            window_metadata,
        }
    }
}
