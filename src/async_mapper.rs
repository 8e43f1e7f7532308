//! Order-preserving (or not) concurrent transformer: dispatches to a worker
//! pool, a reassembler reorders completions back into input order.

use std::{
    collections::BTreeMap,
    sync::Arc,
};

use tokio::sync::Mutex as AsyncMutex;
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

const DEFAULT_REORDER_BUFFER: usize = 100;

/// Concurrent transformer over a fallible `fn(In) -> Result<Out, anyhow::Error>`.
/// Ordered mode (the default) guarantees the k-th output corresponds to the
/// k-th input; unordered mode emits as soon as each worker finishes.
pub struct AsyncMapper<In, Out, F> {
    f: Arc<F>,
    workers: usize,
    ordered: bool,
    reorder_buffer_size: usize,
    name: String,
    _marker: std::marker::PhantomData<fn(In) -> Out>,
}

impl<In, Out, F> AsyncMapper<In, Out, F>
where
    F: Fn(In) -> Result<Out, anyhow::Error> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            workers: num_cpus::get().max(1),
            ordered: true,
            reorder_buffer_size: DEFAULT_REORDER_BUFFER,
            name: "async_mapper".to_string(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_reorder_buffer_size(mut self, size: usize) -> Self {
        self.reorder_buffer_size = size.max(1);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

struct Dispatched<In> {
    seq: u64,
    result: StreamResult<In>,
}

impl<In, Out, F> Processor<In, Out> for AsyncMapper<In, Out, F>
where
    In: Send + 'static,
    Out: Default + Send + 'static,
    F: Fn(In) -> Result<Out, anyhow::Error> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&self, scope: Scope, mut input: StreamReceiver<In>) -> StreamReceiver<Out> {
        let (out_tx, out_rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        let f = self.f.clone();
        let name = self.name.clone();
        let ordered = self.ordered;
        let reorder_buffer_size = self.reorder_buffer_size;

        let (work_tx, work_rx) = tokio::sync::mpsc::channel::<StreamResult<Dispatched<In>>>(
            coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY),
        );
        let work_rx = Arc::new(AsyncMutex::new(work_rx));
        let (result_tx, mut result_rx) = tokio::sync::mpsc::channel::<(u64, StreamResult<Out>)>(
            coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY),
        );

        // Dispatcher: tags each input with a sequence number and hands it to
        // the shared work queue.
        let dispatch_scope = scope.clone();
        tokio::spawn(async move {
            let mut seq: u64 = 0;
            loop {
                let item = match recv_or_cancel(&mut input, &dispatch_scope).await {
                    Some(item) => item,
                    None => return,
                };
                if send_or_cancel(&work_tx, &dispatch_scope, StreamResult::success(Dispatched { seq, result: item }))
                    .await
                {
                    return;
                }
                seq += 1;
            }
        });

        // Worker pool: each worker pulls the next dispatched item from the
        // shared queue (guarded by an async mutex, since multiple workers
        // race to pull from one `Receiver`) and applies `f` to successes.
        for _ in 0..self.workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            let f = f.clone();
            let name = name.clone();
            let scope = scope.clone();
            tokio::spawn(async move {
                loop {
                    let dispatched = {
                        let mut guard = work_rx.lock().await;
                        guard.recv().await
                    };
                    let Some(envelope) = dispatched else { return };
                    let Some(dispatched) = envelope.into_value() else {
                        continue;
                    };
                    let seq = dispatched.seq;
                    let item = dispatched.result;

                    let output = if item.is_error() {
                        item.retag(name.clone()).map(|_| Out::default())
                    } else {
                        match item.into_value() {
                            Some(value) => match f(value) {
                                Ok(out) => StreamResult::success(out),
                                Err(err) => StreamResult::error(Out::default(), err, name.clone()),
                            },
                            None => continue,
                        }
                    };

                    if scope.is_cancelled() {
                        return;
                    }
                    if result_tx.send((seq, output)).await.is_err() {
                        return;
                    }
                }
            });
        }
        drop(result_tx);

        if ordered {
            let scope = scope.clone();
            let name = name.clone();
            tokio::spawn(async move {
                let mut next_seq: u64 = 0;
                let mut pending: BTreeMap<u64, StreamResult<Out>> = BTreeMap::new();
                loop {
                    let received = tokio::select! {
                        biased;
                        _ = scope.cancelled() => return,
                        received = result_rx.recv() => received,
                    };
                    let Some((seq, result)) = received else {
                        // Flush whatever prefix happens to be contiguous;
                        // anything left was never completed.
                        return;
                    };
                    pending.insert(seq, result);
                    if pending.len() > reorder_buffer_size {
                        warn!(processor = %name, size = pending.len(), "async mapper reorder buffer exceeded soft bound");
                    }
                    while let Some(result) = pending.remove(&next_seq) {
                        if send_or_cancel(&out_tx, &scope, result).await {
                            return;
                        }
                        next_seq += 1;
                    }
                }
            });
        } else {
            tokio::spawn(async move {
                loop {
                    let received = tokio::select! {
                        biased;
                        _ = scope.cancelled() => return,
                        received = result_rx.recv() => received,
                    };
                    let Some((_, result)) = received else { return };
                    if send_or_cancel(&out_tx, &scope, result).await {
                        return;
                    }
                }
            });
        }

        out_rx
    }
}
