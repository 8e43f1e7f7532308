use crate::{
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

/// Broadcasts each input item to `count` output sequences in lock-step: an
/// item is pulled from the input only after it has been offered to every
/// output, so a slow output backpressures all the others. Every output sees
/// an identical sequence in an identical order.
pub fn fan_out<T>(scope: Scope, mut input: StreamReceiver<T>, count: usize) -> Vec<StreamReceiver<T>>
where
    T: Clone + Send + 'static,
{
    let count = count.max(1);
    let mut senders = Vec::with_capacity(count);
    let mut receivers = Vec::with_capacity(count);
    for _ in 0..count {
        let (tx, rx) = tokio::sync::mpsc::channel(coerce_channel_capacity(DEFAULT_CHANNEL_CAPACITY));
        senders.push(tx);
        receivers.push(rx);
    }

    tokio::spawn(async move {
        loop {
            let item: StreamResult<T> = match recv_or_cancel(&mut input, &scope).await {
                Some(item) => item,
                None => return,
            };
            for tx in &senders {
                if send_or_cancel(tx, &scope, item.clone()).await {
                    return;
                }
            }
        }
    });

    receivers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_output_sees_the_same_sequence() {
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut outs = fan_out(scope.clone(), input_rx, 3);

        tx.send(StreamResult::success(1)).await.unwrap();
        tx.send(StreamResult::success(2)).await.unwrap();
        drop(tx);

        for out in &mut outs {
            let first = out.recv().await.unwrap();
            assert_eq!(first.value(), Some(&1));
            let second = out.recv().await.unwrap();
            assert_eq!(second.value(), Some(&2));
            assert!(out.recv().await.is_none());
        }
    }

    #[tokio::test]
    async fn zero_requested_outputs_coerces_to_one() {
        let (tx, input_rx) = tokio::sync::mpsc::channel(16);
        let scope = Scope::new();
        let mut outs = fan_out(scope, input_rx, 0);
        assert_eq!(outs.len(), 1);

        tx.send(StreamResult::success(1)).await.unwrap();
        drop(tx);
        assert_eq!(outs[0].recv().await.unwrap().value(), Some(&1));
    }
}
