//! Transaction scope coordinator
//!
//! [`Connection::run_scoped`] brackets one asynchronous unit of work with a
//! single transaction. The transaction is installed in the connection's
//! active slot before the work runs, so every repository operation issued
//! inside the closure reuses it, and the slot is cleared as soon as the
//! work settles. The scope resolves only after the host reports a terminal
//! phase for the transaction, never merely after the closure returns.
//!
//! Scope lifecycle:
//!
//! ```text
//! Open -> WorkSettled -> CommitPending -> Committed
//!                     \> AbortRequested -> Aborted
//! ```
//!
//! `CommitPending -> Aborted` is also legal: the host may refuse the commit
//! after the work itself succeeded.

use crate::connection::{ActiveTxn, Connection};
use std::future::Future;
use stow_core::{DomainError, Mode, Result};
use stow_engine::Phase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Open,
    WorkSettled,
    CommitPending,
    AbortRequested,
    Committed,
    Aborted,
}

impl ScopeState {
    fn permits(self, to: ScopeState) -> bool {
        use ScopeState::*;
        matches!(
            (self, to),
            (Open, WorkSettled)
                | (WorkSettled, CommitPending)
                | (WorkSettled, AbortRequested)
                | (CommitPending, Committed)
                | (CommitPending, Aborted)
                | (AbortRequested, Aborted)
        )
    }
}

struct Scope {
    state: ScopeState,
}

impl Scope {
    fn new() -> Self {
        Scope {
            state: ScopeState::Open,
        }
    }

    fn advance(&mut self, to: ScopeState) {
        debug_assert!(
            self.state.permits(to),
            "illegal scope transition {:?} -> {:?}",
            self.state,
            to
        );
        self.state = to;
    }
}

/// Clears the active slot when dropped, so the slot never outlives the
/// work even if it panics.
struct SlotGuard<'a> {
    conn: &'a Connection,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.conn.clear_active();
    }
}

impl Connection {
    /// Run `work` inside one transaction covering `stores`.
    ///
    /// The work closure receives a connection clone; every repository or
    /// store operation made through it participates in the scope's
    /// transaction. When the closure returns `Ok`, the scope waits for the
    /// host's commit signal and only then resolves; a commit-time abort
    /// turns the successful work into a `TRANSACTION` error. When the
    /// closure returns `Err`, the transaction is aborted and the error is
    /// returned wrapped, with the original preserved as the cause.
    ///
    /// Nested invocation on a connection whose slot is occupied reuses the
    /// outer transaction when `stores` is a subset of the outer scope and
    /// `mode` does not escalate read to write; otherwise it fails fast with
    /// a `TRANSACTION` error rather than stacking transactions.
    pub async fn run_scoped<T, F, Fut>(&self, stores: &[&str], mode: Mode, work: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if stores.is_empty() {
            return Err(DomainError::validation(
                "scoped unit of work requires at least one store",
            ));
        }
        if let Some(active) = self.active_snapshot() {
            return self.run_nested(stores, mode, &active, work).await;
        }

        let txn = self.transaction(stores, mode)?;
        let hold = txn
            .hold()
            .map_err(|err| DomainError::transaction_with("failed to hold transaction", err))?;
        let installed = ActiveTxn {
            txn: txn.clone(),
            stores: txn.store_names().to_vec(),
            mode,
        };
        if let Err(err) = self.install_active(installed) {
            // Lost the slot race; release the transaction we created.
            drop(hold);
            if let Err(abort_err) = txn.abort() {
                tracing::debug!(error = %abort_err, "abort of unused transaction ignored");
            }
            return Err(err);
        }

        let mut scope = Scope::new();
        let result = {
            let slot = SlotGuard { conn: self };
            let result = work(self.clone()).await;
            drop(slot);
            result
        };
        scope.advance(ScopeState::WorkSettled);

        match result {
            Ok(value) => {
                scope.advance(ScopeState::CommitPending);
                // Releasing the hold lets the transaction cross its
                // auto-commit boundary once in-flight requests drain.
                drop(hold);
                match txn.completion().await {
                    Phase::Committed => {
                        scope.advance(ScopeState::Committed);
                        tracing::debug!(txn = txn.id(), "scoped unit of work committed");
                        Ok(value)
                    }
                    Phase::Aborted(reason) => {
                        scope.advance(ScopeState::Aborted);
                        Err(DomainError::transaction(format!(
                            "transaction aborted: {}",
                            reason
                        )))
                    }
                    Phase::Pending => Err(DomainError::transaction(
                        "transaction completion signal closed before a terminal phase",
                    )),
                }
            }
            Err(err) => {
                scope.advance(ScopeState::AbortRequested);
                if let Err(abort_err) = txn.abort() {
                    // Already finalized underneath us; nothing left to undo.
                    tracing::debug!(error = %abort_err, "abort on finished transaction ignored");
                }
                drop(hold);
                scope.advance(ScopeState::Aborted);
                Err(DomainError::transaction_with(
                    "scoped unit of work failed",
                    err,
                ))
            }
        }
    }

    async fn run_nested<T, F, Fut>(
        &self,
        stores: &[&str],
        mode: Mode,
        active: &ActiveTxn,
        work: F,
    ) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let missing: Vec<&str> = stores
            .iter()
            .filter(|name| !active.stores.iter().any(|held| held == **name))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(DomainError::transaction(format!(
                "nested scope requests stores outside the active transaction: {:?}",
                missing
            )));
        }
        if mode.is_write() && !active.mode.is_write() {
            return Err(DomainError::transaction(
                "nested scope requires write access but the active transaction is read-only",
            ));
        }
        // Compatible: run directly inside the outer scope. The outer
        // coordinator owns install, clear, and finalization.
        tracing::debug!(txn = active.txn.id(), "nested scope reusing active transaction");
        work(self.clone()).await
    }
}
