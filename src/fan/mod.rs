//! Fan primitives: FanIn (N→1), FanOut (1→N), Split (1→2 by predicate).

mod fan_in;
mod fan_out;
mod split;

pub use fan_in::fan_in;
pub use fan_out::fan_out;
pub use split::{
    Split,
    SplitStats,
};
