use crate::scope::{
    coerce_channel_capacity,
    recv_or_cancel,
    send_or_cancel,
    Scope,
    StreamReceiver,
    DEFAULT_CHANNEL_CAPACITY,
};

/// Merges `inputs` into a single output sequence. Each input is drained by
/// its own task; ordering across inputs is unspecified, ordering within a
/// single input is preserved. The output closes once every input has
/// closed, or immediately on cancellation.
pub fn fan_in<T>(scope: Scope, inputs: Vec<StreamReceiver<T>>) -> StreamReceiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));

    let mut handles = Vec::with_capacity(inputs.len());
    for mut input in inputs {
        let tx = tx.clone();
        let scope = scope.clone();
        handles.push(tokio::spawn(async move {
            loop {
                match recv_or_cancel(&mut input, &scope).await {
                    Some(item) => {
                        if send_or_cancel(&tx, &scope, item).await {
                            return;
                        }
                    }
                    None => return,
                }
            }
        }));
    }
    drop(tx);

    // The spawned readers each hold their own clone of `tx`; the output
    // closes once every one of them has exited and dropped its clone.
    // No join is needed here: we don't own a reference that must outlive
    // the readers beyond that.
    let _ = handles;

    rx
}
