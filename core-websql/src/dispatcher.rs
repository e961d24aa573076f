//! Outbound callback delivery.
//!
//! Producers (the endpoint and the batch runner) hand finished batches to a
//! [`Dispatcher`]; a single pump task forwards them to the
//! [`JavascriptRuntime`] one at a time. Every batch goes through the same
//! channel, so the runtime sees batches in the order they were produced and
//! no producer ever awaits the host while holding a lock.

use bridge_traits::{CallbackBatch, CallbackInvocation, JavascriptRuntime};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: mpsc::UnboundedSender<CallbackBatch>,
}

impl Dispatcher {
    /// Start the pump task on `handle`.
    ///
    /// When `cancel` fires the pump flushes whatever was already queued and
    /// exits.
    pub fn spawn(
        runtime: Arc<dyn JavascriptRuntime>,
        handle: &Handle,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = handle.spawn(pump(runtime, receiver, cancel));
        (Self { sender }, task)
    }

    /// Queue a batch; empty batches are dropped.
    pub fn send(&self, batch: CallbackBatch) {
        if batch.is_empty() {
            return;
        }

        if let Err(e) = self.sender.send(batch) {
            warn!(
                callbacks = ?e.0.callback_ids(),
                "Dispatcher stopped, dropping callback batch"
            );
        }
    }

    pub fn success(&self, callback_id: &str, payload: Option<Value>) {
        self.send(CallbackBatch::single(CallbackInvocation::success(
            callback_id,
            payload,
        )));
    }

    pub fn error(&self, callback_id: &str, payload: Option<Value>) {
        self.send(CallbackBatch::single(CallbackInvocation::error(
            callback_id,
            payload,
        )));
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

async fn pump(
    runtime: Arc<dyn JavascriptRuntime>,
    mut receiver: mpsc::UnboundedReceiver<CallbackBatch>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            batch = receiver.recv() => match batch {
                Some(batch) => deliver(runtime.as_ref(), batch).await,
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }

    receiver.close();
    while let Ok(batch) = receiver.try_recv() {
        deliver(runtime.as_ref(), batch).await;
    }
    debug!("Callback dispatcher stopped");
}

async fn deliver(runtime: &dyn JavascriptRuntime, batch: CallbackBatch) {
    if !runtime.is_available() {
        warn!(
            callbacks = ?batch.callback_ids(),
            "JavaScript runtime unavailable, dropping callback batch"
        );
        return;
    }

    let count = batch.len();
    match runtime.deliver(batch).await {
        Ok(()) => trace!(invocations = count, "Delivered callback batch"),
        Err(e) => warn!(error = %e, invocations = count, "Failed to deliver callback batch"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::{mock, Sequence};

    mock! {
        Runtime {}

        #[async_trait]
        impl JavascriptRuntime for Runtime {
            async fn deliver(&self, batch: CallbackBatch) -> BridgeResult<()>;
            fn is_available(&self) -> bool;
        }
    }

    fn ids(batch: &CallbackBatch) -> Vec<String> {
        batch.callback_ids().into_iter().map(String::from).collect()
    }

    #[tokio::test]
    async fn test_batches_delivered_in_order() {
        let mut runtime = MockRuntime::new();
        let mut seq = Sequence::new();
        runtime.expect_is_available().return_const(true);
        runtime
            .expect_deliver()
            .withf(|batch| ids(batch) == vec!["a", "b"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        runtime
            .expect_deliver()
            .withf(|batch| ids(batch) == vec!["c"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let cancel = CancellationToken::new();
        let (dispatcher, task) =
            Dispatcher::spawn(Arc::new(runtime), &Handle::current(), cancel.clone());

        let mut first = CallbackBatch::new();
        first.push(CallbackInvocation::success("a", None));
        first.push(CallbackInvocation::success("b", None));
        dispatcher.send(first);
        dispatcher.success("c", None);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batch_is_not_delivered() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_available().return_const(true);
        runtime.expect_deliver().times(0);

        let cancel = CancellationToken::new();
        let (dispatcher, task) =
            Dispatcher::spawn(Arc::new(runtime), &Handle::current(), cancel.clone());
        dispatcher.send(CallbackBatch::new());

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_runtime_drops_batches() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_available().return_const(false);
        runtime.expect_deliver().times(0);

        let cancel = CancellationToken::new();
        let (dispatcher, task) =
            Dispatcher::spawn(Arc::new(runtime), &Handle::current(), cancel.clone());
        dispatcher.error("e", None);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_delivery_failure_does_not_stop_pump() {
        let mut runtime = MockRuntime::new();
        let mut seq = Sequence::new();
        runtime.expect_is_available().return_const(true);
        runtime
            .expect_deliver()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(BridgeError::DeliveryFailed("view busy".to_string())));
        runtime
            .expect_deliver()
            .withf(|batch| ids(batch) == vec!["second"])
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let cancel = CancellationToken::new();
        let (dispatcher, task) =
            Dispatcher::spawn(Arc::new(runtime), &Handle::current(), cancel.clone());
        dispatcher.success("first", None);
        dispatcher.success("second", None);

        cancel.cancel();
        task.await.unwrap();
        assert!(dispatcher.is_closed());
    }
}
