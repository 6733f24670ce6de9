//! Named worker pools for resuming suspended scopes.
//!
//! The scope core never schedules anything: a suspended instance is just
//! a claim that some continuation will eventually resume or release. This
//! module supplies the threads those continuations run on — named
//! [`ContinuationPool`]s collected in an [`ExecutorRegistry`] that owns
//! their orderly shutdown.
//!
//! Nothing here is required by the scope core and nothing in the core
//! assumes which thread a continuation runs on; the coupling is one-way.
//!
//! # Example
//!
//! ```
//! use reqscope::{ContinuationPool, ExecutorRegistry, RequestScope, ScopeKey};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let registry = ExecutorRegistry::new();
//! registry.register(ContinuationPool::new("async-response", 0, 4));
//!
//! let scope = Arc::new(RequestScope::new());
//! let key: ScopeKey<u32> = ScopeKey::new("status");
//!
//! let suspended = scope.run_in_new_scope(|| {
//!     scope.with_current(|inst| inst.put(key, 202)).unwrap().unwrap();
//!     scope.suspend_current().unwrap()
//! });
//!
//! let pool = registry.lookup("async-response").unwrap();
//! let continuation = {
//!     let scope = Arc::clone(&scope);
//!     let resumed = suspended.clone();
//!     pool.spawn(move || {
//!         scope.run_in_scope(resumed.clone(), || {
//!             assert_eq!(*resumed.get(key).unwrap(), 202);
//!         });
//!         resumed.release().unwrap();
//!     })
//!     .unwrap()
//! };
//! assert!(continuation.wait_timeout(Duration::from_secs(5)));
//! assert!(registry.shutdown_all(Duration::from_secs(5)));
//! ```

mod pool;

use core::fmt;
use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;

use crate::tracing_compat::{debug, warn};

pub use pool::{ContinuationPool, PoolClosed, PoolHandle, PoolOptions, SpawnHandle};

/// Owns named pools and their orderly shutdown.
///
/// Registration is first-wins: a second pool under an existing name is
/// rejected (and shut down, since the registry takes ownership of every
/// pool passed in).
pub struct ExecutorRegistry {
    pools: Mutex<BTreeMap<String, ContinuationPool>>,
}

impl ExecutorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pools: Mutex::new(BTreeMap::new()),
        }
    }

    /// Takes ownership of `pool`, filing it under its name.
    ///
    /// Returns `true` when the name was free. A colliding registration
    /// keeps the first pool, shuts the new one down, and returns `false`.
    pub fn register(&self, pool: ContinuationPool) -> bool {
        let mut pools = self.pools.lock();
        if pools.contains_key(pool.name()) {
            warn!(pool = pool.name(), "pool name already registered; keeping the first");
            drop(pools);
            // Dropping shuts the rejected pool down.
            drop(pool);
            return false;
        }
        debug!(pool = pool.name(), "pool registered");
        pools.insert(pool.name().to_string(), pool);
        true
    }

    /// Returns a handle to the pool registered under `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<PoolHandle> {
        self.pools.lock().get(name).map(ContinuationPool::handle)
    }

    /// Shuts every registered pool down, draining in-flight work.
    ///
    /// `timeout` bounds the whole drain. Returns `true` when every pool
    /// drained in time.
    pub fn shutdown_all(&self, timeout: Duration) -> bool {
        let pools = std::mem::take(&mut *self.pools.lock());
        let deadline = std::time::Instant::now() + timeout;

        let mut all_drained = true;
        for (name, pool) in pools {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if !pool.shutdown_and_wait(remaining) {
                warn!(pool = %name, "pool did not drain before the deadline");
                all_drained = false;
            }
        }
        all_drained
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.pools.lock().keys().cloned().collect();
        f.debug_struct("ExecutorRegistry")
            .field("pools", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn register_and_lookup() {
        let registry = ExecutorRegistry::new();
        assert!(registry.register(ContinuationPool::new("io", 0, 2)));
        assert!(registry.lookup("io").is_some());
        assert!(registry.lookup("cpu").is_none());
        assert!(registry.shutdown_all(WAIT));
    }

    #[test]
    fn first_registration_wins() {
        let registry = ExecutorRegistry::new();
        assert!(registry.register(ContinuationPool::new("io", 1, 1)));
        assert!(!registry.register(ContinuationPool::new("io", 1, 1)));

        let handle = registry.lookup("io").expect("first pool kept");
        assert!(!handle.is_shutdown());
        assert!(registry.shutdown_all(WAIT));
    }

    #[test]
    fn shutdown_all_rejects_later_spawns() {
        let registry = ExecutorRegistry::new();
        registry.register(ContinuationPool::new("io", 0, 1));
        let handle = registry.lookup("io").expect("registered");

        assert!(registry.shutdown_all(WAIT));
        assert!(handle.spawn(|| ()).is_err());
    }
}
