//! The scope instance: a reference-counted, thread-bindable container of
//! request-lifetime values.

use core::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::error::ScopeError;
use crate::scope::store::{AnyValue, Entry, ProviderSet, ScopeStore};
use crate::scope::ScopeKey;
use crate::tracing_compat::{debug, trace};
use crate::types::RequestId;

/// Lifecycle of a scope instance.
///
/// All transitions happen under the instance mutex, which removes the
/// race between "claim count reached zero" and "still bound somewhere":
/// both facts are read in the same critical section.
#[derive(Debug)]
enum Lifecycle {
    /// Not installed on any thread. `claims` may be zero only
    /// transiently: the zero-crossing decrement destroys the instance in
    /// the same critical section.
    Unbound {
        /// Outstanding claims.
        claims: u32,
    },
    /// Installed as current on exactly one thread.
    Bound {
        /// Outstanding claims. May legitimately be zero: a claim released
        /// mid-request defers destruction to the unbind step.
        claims: u32,
        /// The thread holding the binding.
        thread: ThreadId,
    },
    /// The store has been cleared and release hooks have run.
    Destroyed,
}

struct Inner {
    id: RequestId,
    /// Lifecycle and store under one lock, so the destroy transition is
    /// atomic to concurrent readers.
    state: Mutex<State>,
    providers: Arc<ProviderSet>,
}

struct State {
    lifecycle: Lifecycle,
    store: ScopeStore,
}

/// A shared handle to one scope instance.
///
/// Cloning the handle is cheap and does **not** mint a claim; claims are
/// created only by
/// [`create_context`](crate::RequestScope::create_context) and
/// [`suspend_current`](crate::RequestScope::suspend_current), and each
/// must be retired by exactly one [`release`](Self::release) call.
#[derive(Clone)]
pub struct ScopeInstance {
    inner: Arc<Inner>,
}

impl ScopeInstance {
    /// Creates a fresh instance: one claim, unbound, empty store.
    pub(crate) fn new(providers: Arc<ProviderSet>) -> Self {
        let id = RequestId::new();
        trace!(scope = %id, "scope instance created");
        Self {
            inner: Arc::new(Inner {
                id,
                state: Mutex::new(State {
                    lifecycle: Lifecycle::Unbound { claims: 1 },
                    store: ScopeStore::default(),
                }),
                providers,
            }),
        }
    }

    /// Returns the instance's identity.
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    /// Returns `true` if both handles alias the same instance.
    #[must_use]
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Returns `true` once the store has been cleared.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        matches!(self.inner.state.lock().lifecycle, Lifecycle::Destroyed)
    }

    /// Returns the number of outstanding claims (diagnostic).
    #[must_use]
    pub fn claims(&self) -> u32 {
        match self.inner.state.lock().lifecycle {
            Lifecycle::Unbound { claims } | Lifecycle::Bound { claims, .. } => claims,
            Lifecycle::Destroyed => 0,
        }
    }

    /// Stores `value` under `key`, overwriting any previous entry (whose
    /// release hook runs).
    ///
    /// # Errors
    ///
    /// [`ScopeError::Released`] once the instance is destroyed.
    pub fn put<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        value: T,
    ) -> Result<(), ScopeError> {
        self.insert(key, Arc::new(value), None)
    }

    /// Stores `value` under `key` with a release hook that runs when the
    /// entry leaves the store (overwrite, [`remove`](Self::remove), or
    /// destroy).
    pub fn put_disposable<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        value: T,
        dispose: impl FnOnce(Arc<T>) + Send + 'static,
    ) -> Result<(), ScopeError> {
        let hook = Box::new(move |erased: AnyValue| {
            if let Ok(typed) = erased.downcast::<T>() {
                dispose(typed);
            }
        });
        self.insert(key, Arc::new(value), Some(hook))
    }

    fn insert<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        value: AnyValue,
        dispose: Option<Box<dyn FnOnce(AnyValue) + Send>>,
    ) -> Result<(), ScopeError> {
        let previous = {
            let mut state = self.inner.state.lock();
            if matches!(state.lifecycle, Lifecycle::Destroyed) {
                return Err(ScopeError::Released { id: self.inner.id });
            }
            state.store.insert(key, value, dispose)
        };
        // Hook runs outside the lock so it may touch this instance.
        if let Some(entry) = previous {
            entry.dispose();
        }
        Ok(())
    }

    /// Returns the memoized value for `key`, computing and caching it via
    /// the bound provider on first access.
    ///
    /// # Errors
    ///
    /// - [`ScopeError::Released`] once the instance is destroyed.
    /// - [`ScopeError::UnknownKey`] when no value is memoized and no
    ///   provider is bound.
    /// - [`ScopeError::Provider`] when the lazy computation fails;
    ///   nothing is cached and the instance stays alive.
    pub fn get<T: Send + Sync + 'static>(&self, key: ScopeKey<T>) -> Result<Arc<T>, ScopeError> {
        // Fast path: memoized value.
        {
            let state = self.inner.state.lock();
            if matches!(state.lifecycle, Lifecycle::Destroyed) {
                return Err(ScopeError::Released { id: self.inner.id });
            }
            if let Some(value) = state.store.get(key.id()) {
                return Ok(Self::downcast(value));
            }
        }

        let Some(provider) = self.inner.providers.lookup(key.id()) else {
            return Err(ScopeError::UnknownKey {
                id: self.inner.id,
                name: key.name(),
            });
        };

        // Compute outside the lock: providers may read other scoped
        // values through this same instance.
        let value = provider.produce().map_err(|source| ScopeError::Provider {
            name: key.name(),
            source,
        })?;

        let (value, stale) = {
            let mut state = self.inner.state.lock();
            match state.lifecycle {
                Lifecycle::Destroyed => {
                    // The scope died while we computed. Hand the fresh
                    // value to its own hook rather than leaking it.
                    drop(state);
                    if let Some(hook) = provider.dispose_hook() {
                        hook(value);
                    }
                    return Err(ScopeError::Released { id: self.inner.id });
                }
                Lifecycle::Unbound { .. } | Lifecycle::Bound { .. } => {
                    if let Some(existing) = state.store.get(key.id()) {
                        // Lost a compute race; keep the first value so
                        // memoization stays stable.
                        (existing, Some(value))
                    } else {
                        state.store.insert(key, Arc::clone(&value), provider.dispose_hook());
                        (value, None)
                    }
                }
            }
        };
        if let Some(fresh) = stale {
            if let Some(hook) = provider.dispose_hook() {
                hook(fresh);
            }
        }
        trace!(scope = %self.inner.id, key = key.name(), "scoped value computed");
        Ok(Self::downcast(value))
    }

    /// Returns the memoized value for `key` without computing, or `None`
    /// when the entry is absent or the instance is destroyed.
    #[must_use]
    pub fn find<T: Send + Sync + 'static>(&self, key: ScopeKey<T>) -> Option<Arc<T>> {
        let state = self.inner.state.lock();
        if matches!(state.lifecycle, Lifecycle::Destroyed) {
            return None;
        }
        state.store.get(key.id()).map(Self::downcast)
    }

    /// Drops the entry for `key` early, running its release hook.
    ///
    /// Returns `true` if an entry was removed. Removing from a destroyed
    /// instance is a no-op returning `false`.
    pub fn remove<T: Send + Sync + 'static>(&self, key: ScopeKey<T>) -> bool {
        let removed = self.inner.state.lock().store.remove(key.id());
        match removed {
            Some(entry) => {
                entry.dispose();
                true
            }
            None => false,
        }
    }

    /// Retires one claim.
    ///
    /// The decrement that brings the claim count to zero while the
    /// instance is unbound destroys it: the store is cleared and every
    /// release hook runs, exactly once. A zero-crossing while bound
    /// defers destruction to the unbind step of
    /// [`run_in_scope`](crate::RequestScope::run_in_scope).
    ///
    /// # Errors
    ///
    /// - [`ScopeError::Released`] when the instance is already destroyed.
    /// - [`ScopeError::ReleaseUnderflow`] when no claim is outstanding.
    ///   Both leave the instance untouched — the store is never cleared
    ///   twice.
    pub fn release(&self) -> Result<(), ScopeError> {
        let drained = {
            let mut state = self.inner.state.lock();
            match state.lifecycle {
                Lifecycle::Destroyed => {
                    return Err(ScopeError::Released { id: self.inner.id });
                }
                Lifecycle::Unbound { claims: 0 } | Lifecycle::Bound { claims: 0, .. } => {
                    return Err(ScopeError::ReleaseUnderflow { id: self.inner.id });
                }
                Lifecycle::Unbound { claims: 1 } => {
                    state.lifecycle = Lifecycle::Destroyed;
                    state.store.drain()
                }
                Lifecycle::Unbound { ref mut claims } | Lifecycle::Bound { ref mut claims, .. } => {
                    *claims -= 1;
                    return Ok(());
                }
            }
        };
        self.run_release_hooks(drained);
        Ok(())
    }

    /// Installs this instance as bound to the calling thread.
    pub(crate) fn bind(&self) -> Result<(), ScopeError> {
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            Lifecycle::Unbound { claims } => {
                state.lifecycle = Lifecycle::Bound {
                    claims,
                    thread: thread::current().id(),
                };
                Ok(())
            }
            Lifecycle::Bound { thread, .. } => Err(ScopeError::AlreadyBound {
                id: self.inner.id,
                thread,
            }),
            Lifecycle::Destroyed => Err(ScopeError::Released { id: self.inner.id }),
        }
    }

    /// Detaches this instance from its thread binding, minting one new
    /// claim for the caller of suspend.
    pub(crate) fn suspend(&self) {
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            Lifecycle::Bound { claims, .. } => {
                state.lifecycle = Lifecycle::Unbound { claims: claims + 1 };
            }
            // The binding registry said we were bound on this thread;
            // anything else is an internal bookkeeping bug.
            Lifecycle::Unbound { .. } | Lifecycle::Destroyed => {
                debug_assert!(false, "suspend on an instance that is not bound");
            }
        }
    }

    /// Unbinds at scope exit, destroying the instance if no claim
    /// remains.
    pub(crate) fn unbind_for_exit(&self) {
        let drained = {
            let mut state = self.inner.state.lock();
            match state.lifecycle {
                Lifecycle::Bound { claims: 0, .. } => {
                    state.lifecycle = Lifecycle::Destroyed;
                    state.store.drain()
                }
                Lifecycle::Bound { claims, .. } => {
                    state.lifecycle = Lifecycle::Unbound { claims };
                    return;
                }
                Lifecycle::Unbound { .. } | Lifecycle::Destroyed => {
                    debug_assert!(false, "unbind on an instance that is not bound");
                    return;
                }
            }
        };
        self.run_release_hooks(drained);
    }

    fn run_release_hooks(&self, drained: Vec<Entry>) {
        debug!(scope = %self.inner.id, entries = drained.len(), "scope destroyed");
        for entry in drained {
            entry.dispose();
        }
    }

    fn downcast<T: Send + Sync + 'static>(value: AnyValue) -> Arc<T> {
        value
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!("key identity guarantees the stored type"))
    }
}

impl fmt::Debug for ScopeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        let mut s = f.debug_struct("ScopeInstance");
        s.field("id", &self.inner.id);
        match state.lifecycle {
            Lifecycle::Unbound { claims } => {
                s.field("state", &"unbound").field("claims", &claims);
            }
            Lifecycle::Bound { claims, thread } => {
                s.field("state", &"bound")
                    .field("claims", &claims)
                    .field("thread", &thread);
            }
            Lifecycle::Destroyed => {
                s.field("state", &"destroyed");
            }
        }
        s.field("entries", &state.store.len()).finish()
    }
}
