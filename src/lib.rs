//! Composable, cancellation-safe stream-processing primitives for Tokio.
//!
//! A [`processor::Processor`] consumes a sequence of [`result::StreamResult`]
//! values and produces another such sequence; processors compose by piping
//! one's output into the next's input. The [`scope::Scope`] threaded through
//! every `process` call is how a pipeline shuts down without leaks.

pub mod async_mapper;
pub mod clock;
pub mod fan;
pub mod flow;
pub mod processor;
pub mod result;
pub mod retry;
pub mod scope;
pub mod transform;
pub mod util;
pub mod window;


pub use async_mapper::AsyncMapper;
pub use clock::{
    Clock,
    FakeClock,
    RealClock,
};
pub use fan::{
    fan_in,
    fan_out,
    Split,
    SplitStats,
};
pub use flow::{
    Batcher,
    Debounce,
    Dedupe,
    DroppingBuffer,
    SlidingBuffer,
    Throttle,
};
pub use processor::Processor;
pub use result::{
    StreamError,
    StreamResult,
};
pub use retry::Retry;
pub use scope::{
    Scope,
    StreamReceiver,
    StreamSender,
};
pub use transform::{
    Filter,
    Mapper,
    Tap,
};
pub use util::{
    Chunk,
    Flatten,
    Sample,
    Skip,
    Take,
    Unbatcher,
};
pub use window::{
    SessionWindow,
    SlidingWindow,
    TumblingWindow,
    Window,
    WindowCollector,
    WindowKind,
    WindowMetadata,
};
