use std::time::{
    Duration,
    SystemTime,
};

use crate::result::StreamResult;

/// Which window processor produced a [`WindowMetadata`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Tumbling,
    Sliding,
    Session,
}

impl WindowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowKind::Tumbling => "tumbling",
            WindowKind::Sliding => "sliding",
            WindowKind::Session => "session",
        }
    }
}

/// Describes the window a decorated [`StreamResult`] belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowMetadata {
    pub start: SystemTime,
    pub end: SystemTime,
    pub kind: WindowKind,
    pub size: Option<Duration>,
    pub slide: Option<Duration>,
    pub gap: Option<Duration>,
    pub session_key: Option<String>,
}

impl WindowMetadata {
    pub fn tumbling(start: SystemTime, end: SystemTime, size: Duration) -> Self {
        Self {
            start,
            end,
            kind: WindowKind::Tumbling,
            size: Some(size),
            slide: None,
            gap: None,
            session_key: None,
        }
    }

    pub fn sliding(start: SystemTime, end: SystemTime, size: Duration, slide: Duration) -> Self {
        Self {
            start,
            end,
            kind: WindowKind::Sliding,
            size: Some(size),
            slide: Some(slide),
            gap: None,
            session_key: None,
        }
    }

    pub fn session(start: SystemTime, end: SystemTime, gap: Duration, key: impl Into<String>) -> Self {
        Self {
            start,
            end,
            kind: WindowKind::Session,
            size: None,
            slide: None,
            gap: Some(gap),
            session_key: Some(key.into()),
        }
    }

    /// A grouping key distinguishing this window instance from any other,
    /// used by [`crate::window::collector::WindowCollector`] to detect a
    /// window boundary.
    pub(crate) fn group_key(&self) -> (SystemTime, SystemTime, WindowKind, Option<String>) {
        (self.start, self.end, self.kind, self.session_key.clone())
    }
}

/// Decorates `result` with `meta`, replacing any prior decoration.
/// Idempotent: re-decorating a `StreamResult` simply overwrites the slot.
pub fn add_window_metadata<T>(mut result: StreamResult<T>, meta: WindowMetadata) -> StreamResult<T> {
    result.window_metadata = Some(std::sync::Arc::new(meta));
    result
}

/// Reads back the window decoration attached by [`add_window_metadata`], if any.
pub fn get_window_metadata<T>(result: &StreamResult<T>) -> Option<&WindowMetadata> {
    result.window_metadata.as_deref()
}
