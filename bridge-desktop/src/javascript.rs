//! Desktop JavaScript runtimes

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    javascript::{CallbackBatch, JavascriptRuntime},
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// Forwards every batch into an unbounded channel.
///
/// The receiving half belongs to the host, which typically serializes the
/// batch and posts it to the renderer process. Once the receiver is dropped
/// the runtime reports itself unavailable.
#[derive(Clone)]
pub struct ChannelJavascriptRuntime {
    sender: mpsc::UnboundedSender<CallbackBatch>,
}

impl ChannelJavascriptRuntime {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallbackBatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl JavascriptRuntime for ChannelJavascriptRuntime {
    async fn deliver(&self, batch: CallbackBatch) -> Result<()> {
        trace!(invocations = batch.len(), "Forwarding callback batch");
        self.sender
            .send(batch)
            .map_err(|_| BridgeError::DeliveryFailed("receiver dropped".to_string()))
    }

    fn is_available(&self) -> bool {
        !self.sender.is_closed()
    }
}

type ScriptEvaluator = dyn Fn(String) -> Result<()> + Send + Sync;

/// Renders batches to script text for a webview `eval`.
pub struct ScriptJavascriptRuntime {
    namespace: String,
    evaluate: Arc<ScriptEvaluator>,
    attached: AtomicBool,
}

impl ScriptJavascriptRuntime {
    pub fn new<F>(namespace: impl Into<String>, evaluate: F) -> Self
    where
        F: Fn(String) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            namespace: namespace.into(),
            evaluate: Arc::new(evaluate),
            attached: AtomicBool::new(true),
        }
    }

    /// Mark the view as gone; later batches are refused.
    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl JavascriptRuntime for ScriptJavascriptRuntime {
    async fn deliver(&self, batch: CallbackBatch) -> Result<()> {
        if !self.is_available() {
            return Err(BridgeError::NotAvailable("view detached".to_string()));
        }
        (self.evaluate)(batch.to_script(&self.namespace))
    }

    fn is_available(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }
}
