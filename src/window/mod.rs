//! Time-bounded (tumbling, sliding) and activity-bounded (session) grouping
//! of results, plus the metadata decoration they share and the collector
//! that folds a decorated stream into materialized buckets.

mod collector;
mod metadata;
mod session;
mod sliding;
mod tumbling;

use std::time::SystemTime;

pub use collector::WindowCollector;
pub use metadata::{
    add_window_metadata,
    get_window_metadata,
    WindowKind,
    WindowMetadata,
};
pub use session::SessionWindow;
pub use sliding::SlidingWindow;
pub use tumbling::TumblingWindow;

use crate::result::StreamResult;

/// A materialized bucket of results that all fell within the same window,
/// in arrival order. This is the output of [`WindowCollector`]; the window
/// processors themselves emit a flat, metadata-decorated stream instead
/// (see module docs) so that composition with non-window-aware downstream
/// processors keeps working.
#[derive(Debug, Clone)]
pub struct Window<T> {
    pub start: SystemTime,
    pub end: SystemTime,
    pub kind: WindowKind,
    pub items: Vec<StreamResult<T>>,
}
