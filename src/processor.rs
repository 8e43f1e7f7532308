//! The uniform processor contract every single-input/single-output stage in
//! this crate implements.

use crate::scope::{
    Scope,
    StreamReceiver,
};

/// A stream-processing stage: given a cancellation [`Scope`] and an input
/// sequence, returns an output sequence.
///
/// `process` itself does not block — it spawns whatever tasks it needs and
/// returns the output receiver immediately, the way `SubscriptionsWorker::start`
/// spawns a worker loop and hands back a client handle. The output channel
/// closes exactly when the input is exhausted and drained, or the scope is
/// canceled.
pub trait Processor<In, Out>: Send + Sync
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str;

    fn process(&self, scope: Scope, input: StreamReceiver<In>) -> StreamReceiver<Out>;
}
