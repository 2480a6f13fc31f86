//! Fault injection and instrumentation for tests
//!
//! These controls let tests stand in for host-level behavior the in-memory
//! engine would otherwise never exhibit: delayed commit signals, request
//! failures, and commit-time aborts. They are public because downstream
//! crates drive their integration suites through them.

use crate::database::Database;
use tokio::sync::watch;

/// Handle returned by [`Database::pause_commits`]; commits queued while the
/// gate is closed finalize when it is released (or dropped)
pub struct CommitGate {
    tx: watch::Sender<bool>,
}

impl CommitGate {
    /// Open the gate, letting paused commits finalize
    pub fn release(&self) {
        let _ = self.tx.send(true);
    }
}

impl Drop for CommitGate {
    fn drop(&mut self) {
        let _ = self.tx.send(true);
    }
}

impl Database {
    /// Number of transactions created so far on this database
    pub fn transactions_opened(&self) -> u64 {
        self.state.lock().txns_opened
    }

    /// Delay every subsequent commit's terminal signal until the returned
    /// gate is released
    pub fn pause_commits(&self) -> CommitGate {
        let (tx, rx) = watch::channel(false);
        self.state.lock().faults.commit_gate = Some(rx);
        CommitGate { tx }
    }

    /// Make the `n`th write request (1-based, counted across the database)
    /// fail with an injected error
    pub fn fail_write_at(&self, n: u64) {
        let mut state = self.state.lock();
        state.faults.write_count = 0;
        state.faults.fail_write_at = Some(n);
    }

    /// Make the `n`th cursor advance (1-based, counted across the database)
    /// fail with an injected error
    pub fn fail_cursor_at(&self, n: u64) {
        let mut state = self.state.lock();
        state.faults.cursor_count = 0;
        state.faults.fail_cursor_at = Some(n);
    }

    /// Make the next transaction that reaches its commit point abort with
    /// `reason` instead of committing
    pub fn fail_commit(&self, reason: impl Into<String>) {
        self.state.lock().faults.fail_commit = Some(reason.into());
    }
}
