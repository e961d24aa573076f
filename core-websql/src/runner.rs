//! Batch runner: the serial task that drives the head transaction.
//!
//! The endpoint never touches SQLite. It records work in the
//! [`TransactionQueue`] and kicks the runner with a delay; kicks that arrive
//! before the pending one fires replace it, so a burst of messages inside one
//! batch window collapses into a single pass.
//!
//! A pass only ever looks at the head of the queue:
//!
//! 1. an idle head (no inbound message for `idle_timeout`) is rolled back
//!    and dropped;
//! 2. a queued head gets its `BEGIN`;
//! 3. runnable statements are executed in order until the first failure,
//!    which halts the transaction until the host reacts;
//! 4. the statement results go out as one callback batch;
//! 5. a head that was asked to end and has nothing left to run is
//!    committed or rolled back, removed, and its end callback sent on the
//!    ids it was started with. A head that saw a failed statement is always
//!    rolled back.
//!
//! When the head leaves the queue and followers remain, the next pass is
//! scheduled immediately.

use bridge_traits::{CallbackBatch, CallbackInvocation};
use core_runtime::events::{BridgeEvent, EventBus, TransactionEvent};
use core_runtime::logging::truncate_sql;
use core_runtime::{BeginMode, RowEncoding};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{Result, WebSqlError};
use crate::executor::{error_payload, execute_query};
use crate::queue::TransactionQueue;
use crate::records::HeadSnapshot;
use crate::registry::{DatabaseHandle, DatabaseRegistry};

/// Runner knobs taken from `BridgeConfig`.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub row_encoding: RowEncoding,
    pub begin_mode: BeginMode,
    pub remove_on_begin_failure: bool,
    pub idle_timeout: Option<Duration>,
}

/// Schedules runner passes.
#[derive(Debug, Clone)]
pub struct Kicker {
    sender: mpsc::UnboundedSender<Duration>,
}

impl Kicker {
    /// Request a pass after `delay`, replacing any pass already pending.
    pub fn kick(&self, delay: Duration) {
        if self.sender.send(delay).is_err() {
            debug!("Batch runner stopped, ignoring kick");
        }
    }
}

#[derive(Debug, Default)]
struct PassOutcome {
    /// Head left the queue and followers are waiting
    continue_now: bool,
    /// When the current head will have been idle for `idle_timeout`
    watchdog: Option<Instant>,
}

enum Ending {
    Committed,
    RolledBack { requested: bool },
}

pub struct BatchRunner {
    queue: Arc<TransactionQueue>,
    registry: Arc<DatabaseRegistry>,
    dispatcher: Dispatcher,
    events: EventBus,
    settings: RunnerSettings,
}

impl BatchRunner {
    pub fn new(
        queue: Arc<TransactionQueue>,
        registry: Arc<DatabaseRegistry>,
        dispatcher: Dispatcher,
        events: EventBus,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            queue,
            registry,
            dispatcher,
            events,
            settings,
        }
    }

    /// Start the runner loop on `handle`; it stops when `cancel` fires.
    pub fn spawn(self, handle: &Handle, cancel: CancellationToken) -> (Kicker, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = handle.spawn(self.run(receiver, cancel));
        (Kicker { sender }, task)
    }

    async fn run(self, mut kicks: mpsc::UnboundedReceiver<Duration>, cancel: CancellationToken) {
        let mut deadline: Option<Instant> = None;
        let mut watchdog: Option<Instant> = None;

        loop {
            let wake = next_wake(deadline, watchdog);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                kick = kicks.recv() => match kick {
                    Some(delay) => deadline = Some(Instant::now() + delay),
                    None => break,
                },
                _ = sleep_until_opt(wake) => {
                    let outcome = self.run_pass().await;
                    let now = Instant::now();
                    // A watchdog wake-up leaves a later kick in place.
                    deadline = deadline.filter(|at| *at > now);
                    watchdog = outcome.watchdog;
                    if outcome.continue_now {
                        deadline = Some(now);
                    }
                }
            }
        }

        debug!(pending = self.queue.len(), "Batch runner stopped");
    }

    async fn run_pass(&self) -> PassOutcome {
        let Some(head) = self.queue.head() else {
            return PassOutcome::default();
        };

        let left_queue = self.process(head).await;
        if left_queue {
            self.promote_next_head();
        }

        PassOutcome {
            continue_now: left_queue && !self.queue.is_empty(),
            watchdog: self.watchdog(),
        }
    }

    /// Advance `head` by one pass; returns whether it left the queue.
    #[instrument(level = "debug", skip(self, head), fields(tx_id = head.tx_id, db_name = %head.db_name))]
    async fn process(&self, head: HeadSnapshot) -> bool {
        if let Some(timeout) = self.settings.idle_timeout {
            if head.last_activity.elapsed() >= timeout {
                self.expire(&head).await;
                return true;
            }
        }

        let handle = self.registry.get(&head.db_name);

        if !head.begun {
            let begun = match &handle {
                Some(handle) => {
                    self.control(handle, self.settings.begin_mode.statement())
                        .await
                }
                None => Err(WebSqlError::DatabaseNotOpen(head.db_name.clone())),
            };

            if let Err(e) = begun {
                warn!(error = %e, "Could not begin transaction");
                let drop_record = self.settings.remove_on_begin_failure || head.should_end;
                if drop_record {
                    self.queue.remove(head.tx_id);
                }
                self.dispatcher.error(&head.error_id, Some(error_payload(&e)));
                return drop_record;
            }

            self.queue.update(head.tx_id, |record| record.begun = true);
            debug!("Transaction begun");
            self.emit(TransactionEvent::Begun {
                tx_id: head.tx_id,
                db_name: head.db_name.clone(),
            });
        }

        let Some(handle) = handle else {
            let e = WebSqlError::DatabaseNotOpen(head.db_name.clone());
            warn!(error = %e, "Database closed under a running transaction");
            self.queue.remove(head.tx_id);
            self.dispatcher.error(&head.error_id, Some(error_payload(&e)));
            return true;
        };

        self.drain(&handle, &head).await;

        let Some(current) = self.queue.snapshot(head.tx_id) else {
            return true;
        };
        if current.should_end && (current.pending == 0 || current.halted) {
            self.finalize(&handle, &current).await;
            return true;
        }
        false
    }

    /// Run the head's runnable statements and dispatch their callbacks as
    /// one batch.
    async fn drain(&self, handle: &DatabaseHandle, head: &HeadSnapshot) {
        let mut batch = CallbackBatch::new();

        while let Some(query) = self.queue.next_query(head.tx_id) {
            let result = match handle.connection().await {
                Ok(mut connection) => {
                    execute_query(&mut *connection, &query, self.settings.row_encoding).await
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(payload) => {
                    batch.push(CallbackInvocation::success(query.success_id, Some(payload)));
                }
                Err(e) => {
                    let message = e.js_message();
                    debug!(
                        sql = %truncate_sql(&query.sql),
                        error = %message,
                        "Statement failed, halting transaction"
                    );
                    batch.push(CallbackInvocation::error(query.error_id, Some(error_payload(&e))));
                    self.queue
                        .update(head.tx_id, |record| record.fail(message.clone()));
                    self.emit(TransactionEvent::QueryFailed {
                        tx_id: head.tx_id,
                        db_name: head.db_name.clone(),
                        message,
                    });
                    break;
                }
            }
        }

        if !batch.is_empty() {
            debug!(callbacks = batch.len(), "Dispatching statement results");
            self.dispatcher.send(batch);
        }
    }

    /// COMMIT or ROLLBACK the head, remove it and send its end callback.
    ///
    /// A transaction with a failed statement is rolled back whatever the
    /// host asked for, no matter which pass the failure happened in.
    async fn finalize(&self, handle: &DatabaseHandle, tx: &HeadSnapshot) {
        let ending = if tx.mark_successful && tx.failure.is_none() {
            match self.control(handle, "COMMIT").await {
                Ok(()) => Ok(Ending::Committed),
                Err(e) => {
                    if let Err(rollback) = self.control(handle, "ROLLBACK").await {
                        debug!(error = %rollback, "Rollback after failed commit");
                    }
                    Err(e)
                }
            }
        } else {
            self.control(handle, "ROLLBACK")
                .await
                .map(|()| Ending::RolledBack {
                    requested: !tx.mark_successful,
                })
        };

        if let Some(record) = self.queue.remove(tx.tx_id) {
            if !record.queries.is_empty() {
                debug!(
                    discarded = record.queries.len(),
                    "Dropping statements queued behind a failure"
                );
            }
        }

        let db_name = tx.db_name.clone();
        match ending {
            Ok(Ending::Committed) => {
                info!("Transaction committed");
                self.dispatcher.success(&tx.success_id, None);
                self.emit(TransactionEvent::Committed {
                    tx_id: tx.tx_id,
                    db_name,
                });
            }
            Ok(Ending::RolledBack { requested }) => {
                info!(requested, "Transaction rolled back");
                match &tx.failure {
                    Some(message) if tx.mark_successful => self.dispatcher.error(
                        &tx.error_id,
                        Some(error_payload(&WebSqlError::RolledBack(message.clone()))),
                    ),
                    _ => self.dispatcher.success(&tx.success_id, None),
                }
                self.emit(TransactionEvent::RolledBack {
                    tx_id: tx.tx_id,
                    db_name,
                    requested,
                });
            }
            Err(e) => {
                warn!(error = %e, "Could not end transaction");
                self.dispatcher.error(&tx.error_id, Some(error_payload(&e)));
                self.emit(TransactionEvent::RolledBack {
                    tx_id: tx.tx_id,
                    db_name,
                    requested: false,
                });
            }
        }
    }

    async fn expire(&self, head: &HeadSnapshot) {
        warn!(idle = ?head.last_activity.elapsed(), "Transaction idle too long, rolling back");

        if head.begun {
            if let Some(handle) = self.registry.get(&head.db_name) {
                if let Err(e) = self.control(&handle, "ROLLBACK").await {
                    warn!(error = %e, "Rollback of idle transaction failed");
                }
            }
        }

        self.queue.remove(head.tx_id);
        self.dispatcher.error(
            &head.error_id,
            Some(error_payload(&WebSqlError::TimedOut(head.tx_id))),
        );
        self.emit(TransactionEvent::TimedOut {
            tx_id: head.tx_id,
            db_name: head.db_name.clone(),
        });
    }

    async fn control(&self, handle: &DatabaseHandle, statement: &str) -> Result<()> {
        let mut connection = handle.connection().await?;
        sqlx::query(statement).execute(&mut *connection).await?;
        Ok(())
    }

    /// A follower waited behind the previous head; its idle clock starts now.
    fn promote_next_head(&self) {
        if let Some(next) = self.queue.head() {
            self.queue.update(next.tx_id, |record| record.touch());
        }
    }

    fn watchdog(&self) -> Option<Instant> {
        let timeout = self.settings.idle_timeout?;
        self.queue.head().map(|head| head.last_activity + timeout)
    }

    fn emit(&self, event: TransactionEvent) {
        // No subscribers is fine.
        let _ = self.events.emit(BridgeEvent::Transaction(event));
    }
}

fn next_wake(deadline: Option<Instant>, watchdog: Option<Instant>) -> Option<Instant> {
    match (deadline, watchdog) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
