//! Process-wide single-flight lock table keyed by `run_hash` (spec §4.8).
//!
//! Only the first submitter for a given hash runs the orchestration;
//! concurrent submitters block on the same per-hash lock and, once it's
//! released, re-check the registry for the now-cached record rather than
//! recomputing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Default)]
pub struct SingleFlight {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch-or-create the per-hash lock, without holding it.
    fn lock_for(&self, run_hash: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(run_hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `f` under the exclusive per-hash lock. Concurrent callers for
    /// the same hash serialize here; the caller is expected to re-check
    /// the registry for a cached record immediately after acquiring.
    pub fn run<T>(&self, run_hash: &str, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(run_hash);
        let _guard = lock.lock();
        f()
    }
}
