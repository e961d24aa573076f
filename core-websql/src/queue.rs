//! FIFO of transaction records shared by the endpoint and the runner.
//!
//! Every operation takes the lock for a short, synchronous critical section;
//! no SQL runs and no callback is dispatched while it is held.

use std::collections::VecDeque;
use parking_lot::{Mutex, MutexGuard};

use crate::records::{HeadSnapshot, QueryRecord, TransactionRecord};

#[derive(Debug, Default)]
pub struct TransactionQueue {
    records: Mutex<VecDeque<TransactionRecord>>,
}

impl TransactionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<TransactionRecord>> {
        self.records.lock()
    }

    pub fn push(&self, record: TransactionRecord) {
        self.lock().push_back(record);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, tx_id: i64) -> bool {
        self.lock().iter().any(|record| record.tx_id == tx_id)
    }

    /// Run `f` on the first record with `tx_id`.
    pub fn update<R>(&self, tx_id: i64, f: impl FnOnce(&mut TransactionRecord) -> R) -> Option<R> {
        self.lock()
            .iter_mut()
            .find(|record| record.tx_id == tx_id)
            .map(f)
    }

    /// Ids in queue order.
    pub fn ids(&self) -> Vec<i64> {
        self.lock().iter().map(|record| record.tx_id).collect()
    }

    pub(crate) fn head(&self) -> Option<HeadSnapshot> {
        self.lock().front().map(TransactionRecord::snapshot)
    }

    pub(crate) fn snapshot(&self, tx_id: i64) -> Option<HeadSnapshot> {
        self.update(tx_id, |record| record.snapshot())
    }

    /// Pop the next statement of `tx_id` unless its queue is halted.
    pub fn next_query(&self, tx_id: i64) -> Option<QueryRecord> {
        self.update(tx_id, |record| {
            if record.halted {
                None
            } else {
                record.queries.pop_front()
            }
        })
        .flatten()
    }

    /// Remove the record with `tx_id`, returning it with any statements it
    /// still held.
    pub fn remove(&self, tx_id: i64) -> Option<TransactionRecord> {
        let mut records = self.lock();
        let position = records.iter().position(|record| record.tx_id == tx_id)?;
        records.remove(position)
    }

    pub fn clear(&self) -> usize {
        let mut records = self.lock();
        let count = records.len();
        records.clear();
        count
    }
}
