//! Test harness: a bridge on a temp directory whose callback batches are
//! captured through a `ChannelJavascriptRuntime`.

#![allow(dead_code)]

use bridge_desktop::{AppDataStorage, ChannelJavascriptRuntime};
use bridge_traits::{CallbackBatch, CallbackInvocation};
use core_runtime::config::BridgeConfigBuilder;
use core_runtime::BridgeConfig;
use core_websql::WebSqlBridge;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub struct Harness {
    pub bridge: WebSqlBridge,
    receiver: UnboundedReceiver<CallbackBatch>,
    /// Every batch delivered so far, in delivery order
    pub batches: Vec<CallbackBatch>,
    dir: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|builder| builder).await
    }

    pub async fn with_config(
        configure: impl FnOnce(BridgeConfigBuilder) -> BridgeConfigBuilder,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(AppDataStorage::with_directory(dir.path()));
        Self::with_storage(dir, storage, configure)
    }

    pub fn with_storage(
        dir: TempDir,
        storage: Arc<AppDataStorage>,
        configure: impl FnOnce(BridgeConfigBuilder) -> BridgeConfigBuilder,
    ) -> Self {
        let (runtime, receiver) = ChannelJavascriptRuntime::new();
        let builder = BridgeConfig::builder()
            .javascript_runtime(Arc::new(runtime))
            .storage(storage);
        let config = configure(builder).build().unwrap();

        Self {
            bridge: WebSqlBridge::new(config).unwrap(),
            receiver,
            batches: Vec::new(),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Open `db_name` and wait for the acknowledgement.
    pub async fn open(&mut self, db_name: &str) {
        let callback = format!("open-{}", db_name);
        self.bridge.open(db_name, &callback);
        let ack = self.wait_for(&callback).await;
        assert!(!ack.is_error, "open failed: {:?}", ack.payload);
    }

    /// Receive batches until one contains `callback_id`.
    pub async fn wait_for(&mut self, callback_id: &str) -> CallbackInvocation {
        self.wait_until(callback_id, |h| h.find(callback_id).cloned())
            .await
    }

    /// Wait for the end of a transaction started with `success_id` and
    /// `error_id`.
    ///
    /// The end callback reuses the ids given to `start_transaction`: it is
    /// the second invocation of `success_id` (the first acknowledged the
    /// start) or an invocation of `error_id`.
    pub async fn wait_for_end(&mut self, success_id: &str, error_id: &str) -> CallbackInvocation {
        self.wait_until(success_id, |h| {
            h.nth(success_id, 1).or_else(|| h.find(error_id)).cloned()
        })
        .await
    }

    async fn wait_until(
        &mut self,
        what: &str,
        done: impl Fn(&Self) -> Option<CallbackInvocation>,
    ) -> CallbackInvocation {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(hit) = done(self) {
                return hit;
            }
            let batch = tokio::time::timeout_at(deadline, self.receiver.recv())
                .await
                .unwrap_or_else(|_| {
                    panic!("timed out waiting for {}; seen {:?}", what, self.seen_ids())
                })
                .expect("runtime channel closed");
            self.batches.push(batch);
        }
    }

    /// Collect whatever arrives during `period`.
    pub async fn settle(&mut self, period: Duration) {
        let deadline = tokio::time::Instant::now() + period;
        while let Ok(Some(batch)) = tokio::time::timeout_at(deadline, self.receiver.recv()).await {
            self.batches.push(batch);
        }
    }

    pub fn find(&self, callback_id: &str) -> Option<&CallbackInvocation> {
        self.nth(callback_id, 0)
    }

    /// The `n`th (zero-based) invocation of `callback_id`.
    pub fn nth(&self, callback_id: &str, n: usize) -> Option<&CallbackInvocation> {
        self.batches
            .iter()
            .flat_map(|batch| batch.iter())
            .filter(|invocation| invocation.callback_id == callback_id)
            .nth(n)
    }

    pub fn count(&self, callback_id: &str) -> usize {
        self.positions(callback_id).len()
    }

    /// Position of the first `callback_id` across all received invocations.
    pub fn position(&self, callback_id: &str) -> Option<usize> {
        self.positions(callback_id).first().copied()
    }

    /// Position of a transaction's end callback on its start `success_id`.
    pub fn end_position(&self, success_id: &str) -> Option<usize> {
        self.positions(success_id).get(1).copied()
    }

    pub fn positions(&self, callback_id: &str) -> Vec<usize> {
        self.batches
            .iter()
            .flat_map(|batch| batch.iter())
            .enumerate()
            .filter(|(_, invocation)| invocation.callback_id == callback_id)
            .map(|(position, _)| position)
            .collect()
    }

    /// Index of the first batch that carried `callback_id`.
    pub fn batch_index(&self, callback_id: &str) -> Option<usize> {
        self.batch_indices(callback_id).first().copied()
    }

    pub fn batch_indices(&self, callback_id: &str) -> Vec<usize> {
        self.batches
            .iter()
            .enumerate()
            .flat_map(|(index, batch)| {
                batch
                    .iter()
                    .filter(move |invocation| invocation.callback_id == callback_id)
                    .map(move |_| index)
            })
            .collect()
    }

    pub fn seen_ids(&self) -> Vec<String> {
        self.batches
            .iter()
            .flat_map(|batch| batch.iter())
            .map(|invocation| invocation.callback_id.clone())
            .collect()
    }

    /// Run `sql` in its own committed transaction and return its payload.
    pub async fn query(&mut self, tx_id: i64, db_name: &str, sql: &str) -> Value {
        let ok = format!("tx{}-query", tx_id);
        let err = format!("tx{}-query-err", tx_id);
        let start = format!("tx{}-start", tx_id);
        let start_err = format!("tx{}-start-err", tx_id);
        self.bridge.start_transaction(tx_id, db_name, &start, &start_err);
        self.bridge.execute_sql(tx_id, db_name, sql, None, &ok, &err);
        self.bridge.end_transaction(
            tx_id,
            db_name,
            &format!("tx{}-end", tx_id),
            &format!("tx{}-end-err", tx_id),
            true,
        );

        self.wait_for_end(&start, &start_err).await;
        let result = self
            .find(&ok)
            .or_else(|| self.find(&err))
            .cloned()
            .unwrap_or_else(|| panic!("no result for {}", sql));
        assert!(!result.is_error, "{} failed: {:?}", sql, result.payload);
        result.payload.unwrap_or(Value::Null)
    }
}

pub fn error_message(invocation: &CallbackInvocation) -> String {
    invocation
        .payload
        .as_ref()
        .and_then(|payload| payload.get("result"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
