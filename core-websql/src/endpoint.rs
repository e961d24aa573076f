//! Inbound message surface.
//!
//! [`WebSqlBridge`] is what the host wires to its JavaScript binding. Every
//! method returns immediately: it records the message, acknowledges what can
//! be acknowledged at once, and leaves SQL work to the batch runner. Replies
//! reach JavaScript only through the callback ids passed in.

use bridge_traits::CallbackBatch;
use core_runtime::events::{BridgeEvent, DatabaseEvent, EventBus, EventStream};
use core_runtime::logging::truncate_sql;
use core_runtime::BridgeConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{Result, WebSqlError};
use crate::executor::error_payload;
use crate::queue::TransactionQueue;
use crate::records::{QueryRecord, TransactionRecord};
use crate::registry::DatabaseRegistry;
use crate::runner::{BatchRunner, Kicker, RunnerSettings};
use crate::value::parse_bind_args;

/// Handle to a running bridge. Cheap to clone; all clones share one queue,
/// one registry and one runner.
#[derive(Clone)]
pub struct WebSqlBridge {
    inner: Arc<Inner>,
}

struct Inner {
    config: BridgeConfig,
    queue: Arc<TransactionQueue>,
    registry: Arc<DatabaseRegistry>,
    dispatcher: Dispatcher,
    kicker: Kicker,
    events: EventBus,
    runtime: Handle,
    runner_cancel: CancellationToken,
    dispatcher_cancel: CancellationToken,
    runner_task: Mutex<Option<JoinHandle<()>>>,
    dispatcher_task: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl WebSqlBridge {
    /// Start a bridge on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails when called outside a tokio runtime or when `config` does not
    /// validate.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            WebSqlError::Runtime(core_runtime::Error::CapabilityMissing {
                capability: "tokio runtime".to_string(),
                message: e.to_string(),
            })
        })?;
        Self::with_handle(config, runtime)
    }

    /// Start a bridge whose tasks run on `runtime`.
    pub fn with_handle(config: BridgeConfig, runtime: Handle) -> Result<Self> {
        config.validate()?;

        let queue = Arc::new(TransactionQueue::new());
        let registry = Arc::new(DatabaseRegistry::new(
            Arc::clone(&config.storage),
            config.file_suffix.clone(),
            config.busy_timeout,
        ));
        let events = EventBus::new(config.event_buffer_size);

        let dispatcher_cancel = CancellationToken::new();
        let (dispatcher, dispatcher_task) = Dispatcher::spawn(
            Arc::clone(&config.javascript_runtime),
            &runtime,
            dispatcher_cancel.clone(),
        );

        let settings = RunnerSettings {
            row_encoding: config.row_encoding,
            begin_mode: config.begin_mode,
            remove_on_begin_failure: config.remove_on_begin_failure,
            idle_timeout: config.idle_timeout,
        };
        let runner_cancel = CancellationToken::new();
        let (kicker, runner_task) = BatchRunner::new(
            Arc::clone(&queue),
            Arc::clone(&registry),
            dispatcher.clone(),
            events.clone(),
            settings,
        )
        .spawn(&runtime, runner_cancel.clone());

        info!(
            batch_window = ?config.batch_window,
            idle_timeout = ?config.idle_timeout,
            "WebSQL bridge started"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                queue,
                registry,
                dispatcher,
                kicker,
                events,
                runtime,
                runner_cancel,
                dispatcher_cancel,
                runner_task: Mutex::new(Some(runner_task)),
                dispatcher_task: Mutex::new(Some(dispatcher_task)),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    /// Subscribe to database and transaction events.
    pub fn events(&self) -> EventStream {
        EventStream::new(self.inner.events.subscribe())
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Transactions accepted and not yet finalized, in queue order.
    pub fn pending_transactions(&self) -> Vec<i64> {
        self.inner.queue.ids()
    }

    pub fn open_databases(&self) -> usize {
        self.inner.registry.len()
    }

    /// Render `batch` as a script for hosts that evaluate JavaScript text.
    pub fn callback_script(&self, batch: &CallbackBatch) -> String {
        batch.to_script(&self.inner.config.callback_namespace)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    fn refuse_after_shutdown(&self, operation: &str) -> bool {
        if self.is_shut_down() {
            warn!(operation, error = %WebSqlError::ShutDown, "Ignoring message");
            return true;
        }
        false
    }

    /// Make sure a handle exists for `db_name` and acknowledge on
    /// `callback_id` once its file is open.
    #[instrument(skip(self))]
    pub fn open(&self, db_name: &str, callback_id: &str) {
        if self.refuse_after_shutdown("open") {
            return;
        }

        let (handle, created) = self.inner.registry.get_or_create(db_name);
        let inner = Arc::clone(&self.inner);
        let callback_id = callback_id.to_string();

        self.inner.runtime.spawn(async move {
            let opened = handle.connection().await.map(|_| ());
            match opened {
                Ok(()) => {
                    inner.dispatcher.success(&callback_id, None);
                    if created {
                        let _ = inner.events.emit(BridgeEvent::Database(DatabaseEvent::Opened {
                            db_name: handle.name().to_string(),
                            file_name: handle.file_name().to_string(),
                        }));
                    }
                }
                Err(e) => {
                    error!(db_name = %handle.name(), error = %e, "Failed to open database");
                    let _ = inner.events.emit(BridgeEvent::Database(DatabaseEvent::OpenFailed {
                        db_name: handle.name().to_string(),
                        message: e.to_string(),
                    }));
                    if inner.config.report_open_errors {
                        inner
                            .dispatcher
                            .error(&callback_id, Some(error_payload(&e)));
                    }
                }
            }
        });
    }

    /// Queue a new transaction and acknowledge it as accepted.
    #[instrument(skip(self))]
    pub fn start_transaction(&self, tx_id: i64, db_name: &str, success_id: &str, error_id: &str) {
        if self.refuse_after_shutdown("startTransaction") {
            return;
        }

        if self.inner.queue.contains(tx_id) {
            warn!("Transaction id already queued; messages go to the earlier one");
        }

        self.inner
            .queue
            .push(TransactionRecord::new(tx_id, db_name, success_id, error_id));
        self.inner.dispatcher.success(success_id, None);
        self.inner.kicker.kick(Duration::ZERO);
    }

    /// Append a statement to transaction `tx_id`.
    ///
    /// A statement for an unknown transaction is answered right away with
    /// a "transaction was invalidated" error on `error_id`. Sending a
    /// statement also resumes a transaction halted by an earlier failure.
    #[instrument(skip(self, sql, bind_args_json), fields(sql = %truncate_sql(sql)))]
    pub fn execute_sql(
        &self,
        tx_id: i64,
        db_name: &str,
        sql: &str,
        bind_args_json: Option<&str>,
        success_id: &str,
        error_id: &str,
    ) {
        if self.refuse_after_shutdown("executeSql") {
            return;
        }

        let query = QueryRecord::new(sql, parse_bind_args(bind_args_json), success_id, error_id);
        let accepted = self
            .inner
            .queue
            .update(tx_id, move |record| {
                record.queries.push_back(query);
                record.halted = false;
                record.touch();
            })
            .is_some();

        if !accepted {
            debug!("Statement for unknown transaction");
            self.inner.dispatcher.error(
                error_id,
                Some(error_payload(&WebSqlError::TransactionNotFound(tx_id))),
            );
            return;
        }

        self.inner.kicker.kick(self.inner.config.batch_window);
    }

    /// Ask the runner to commit (`mark_successful`) or roll back `tx_id`.
    ///
    /// The outcome is reported on the ids the transaction was started with.
    /// `success_id` and `error_id` are only used to reject an unknown `tx_id`.
    #[instrument(skip(self))]
    pub fn end_transaction(
        &self,
        tx_id: i64,
        db_name: &str,
        success_id: &str,
        error_id: &str,
        mark_successful: bool,
    ) {
        if self.refuse_after_shutdown("endTransaction") {
            return;
        }

        let found = self
            .inner
            .queue
            .update(tx_id, |record| {
                record.mark_successful = mark_successful;
                record.should_end = true;
                record.touch();
            })
            .is_some();

        if !found {
            debug!("End requested for unknown transaction");
            self.inner.dispatcher.error(
                error_id,
                Some(error_payload(&WebSqlError::TransactionNotFound(tx_id))),
            );
            return;
        }

        self.inner.kicker.kick(self.inner.config.batch_window);
    }

    /// Release every database handle. Safe to call repeatedly.
    pub fn close(&self) {
        let handles = self.inner.registry.drain();
        if handles.is_empty() {
            debug!("No open databases to close");
            return;
        }

        let count = handles.len();
        info!(count, "Closing databases");
        self.inner.runtime.spawn(async move {
            for handle in handles {
                handle.close().await;
            }
        });
        let _ = self
            .inner
            .events
            .emit(BridgeEvent::Database(DatabaseEvent::Closed { count }));
    }

    /// Stop the runner, flush pending callbacks and close every database.
    ///
    /// Transactions still queued are dropped; SQLite rolls back any that had
    /// begun when its connection closes.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.runner_cancel.cancel();
        join(take_task(&self.inner.runner_task), "batch runner").await;

        let dropped = self.inner.queue.clear();
        if dropped > 0 {
            warn!(dropped, "Dropping unfinished transactions at shutdown");
        }

        self.inner.dispatcher_cancel.cancel();
        join(take_task(&self.inner.dispatcher_task), "callback dispatcher").await;

        let handles = self.inner.registry.drain();
        let count = handles.len();
        for handle in handles {
            handle.close().await;
        }
        if count > 0 {
            let _ = self
                .inner
                .events
                .emit(BridgeEvent::Database(DatabaseEvent::Closed { count }));
        }
        info!("WebSQL bridge shut down");
    }
}

impl std::fmt::Debug for WebSqlBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSqlBridge")
            .field("pending_transactions", &self.inner.queue.len())
            .field("open_databases", &self.inner.registry.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn take_task(slot: &Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().take()
}

async fn join(task: Option<JoinHandle<()>>, name: &str) {
    if let Some(task) = task {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_desktop::{AppDataStorage, ChannelJavascriptRuntime};

    fn config(dir: &std::path::Path) -> BridgeConfig {
        let (runtime, _receiver) = ChannelJavascriptRuntime::new();
        BridgeConfig::builder()
            .javascript_runtime(Arc::new(runtime))
            .storage(Arc::new(AppDataStorage::with_directory(dir)))
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let err = WebSqlBridge::new(config(tmp.path())).unwrap_err();

        assert!(matches!(
            err,
            WebSqlError::Runtime(core_runtime::Error::CapabilityMissing { ref capability, .. })
                if capability == "tokio runtime"
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = config(tmp.path());
        config.file_suffix = "_nwebsql.sqlite".to_string();

        let err = WebSqlBridge::new(config).unwrap_err();
        assert!(matches!(err, WebSqlError::Runtime(core_runtime::Error::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = WebSqlBridge::new(config(tmp.path())).unwrap();

        bridge.shutdown().await;
        bridge.shutdown().await;

        assert!(bridge.is_shut_down());
        bridge.start_transaction(1, "db", "ok", "err");
        assert!(bridge.pending_transactions().is_empty());
    }

    #[tokio::test]
    async fn test_callback_script_uses_namespace() {
        let tmp = tempfile::tempdir().unwrap();
        let bridge = WebSqlBridge::new(config(tmp.path())).unwrap();

        let script = bridge.callback_script(&CallbackBatch::single(
            bridge_traits::CallbackInvocation::success("cb1", None),
        ));
        assert!(script.contains("SQLiteNativeDB.callbacks"));
        assert!(script.contains("cb1"));

        bridge.shutdown().await;
    }
}
