//! Cursor iteration
//!
//! A cursor yields records one at a time, ascending, with a cooperative
//! suspension point between records. It holds an in-flight request slot on
//! its transaction for its entire lifetime, so the transaction cannot
//! auto-commit mid-iteration.

use crate::error::{HostError, HostResult};
use crate::transaction::{RequestGuard, Status, TxnInner};
use std::collections::VecDeque;
use std::sync::Arc;
use stow_core::Record;

/// Ascending iterator over the records of a store or index
pub struct Cursor {
    inner: Arc<TxnInner>,
    items: VecDeque<Record>,
    _req: RequestGuard,
}

impl Cursor {
    pub(crate) fn new(inner: Arc<TxnInner>, req: RequestGuard, items: Vec<Record>) -> Self {
        Cursor {
            inner,
            items: items.into(),
            _req: req,
        }
    }

    /// Advance to the next record; `None` once exhausted.
    ///
    /// Fails if the transaction was aborted underneath the cursor, or when
    /// a cursor fault is injected.
    pub async fn next(&mut self) -> HostResult<Option<Record>> {
        tokio::task::yield_now().await;
        if self.inner.state.lock().status == Status::Aborted {
            return Err(HostError::TransactionFinished);
        }
        if self.items.is_empty() {
            return Ok(None);
        }
        {
            let mut db = self.inner.db.lock();
            db.faults.cursor_count += 1;
            if db.faults.fail_cursor_at == Some(db.faults.cursor_count) {
                return Err(HostError::Injected("cursor failure".to_string()));
            }
        }
        Ok(self.items.pop_front())
    }
}
