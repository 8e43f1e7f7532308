//! Time- and state-driven flow control: Debounce, Throttle, Batcher, Dedupe,
//! SlidingBuffer, DroppingBuffer.

mod batcher;
mod buffer;
mod debounce;
mod dedupe;
mod throttle;

pub use batcher::Batcher;
pub use buffer::{
    DroppingBuffer,
    SlidingBuffer,
};
pub use debounce::Debounce;
pub use dedupe::Dedupe;
pub use throttle::Throttle;
