//! The scope manager: create, run-in-scope, suspend, and resume.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::BoxError;
use crate::scope::{BindingRegistry, ProviderSet, ScopeInstance, ScopeKey};
use crate::tracing_compat::{debug, trace};

/// The public facade over the scope core.
///
/// One manager typically exists per request pipeline. It creates scope
/// instances, runs work inside a bound instance, and exposes the
/// suspend/resume primitives that carry a request across threads.
///
/// # Claims
///
/// [`create_context`](Self::create_context) and
/// [`suspend_current`](Self::suspend_current) each mint one claim on the
/// returned instance; every claim must be retired by exactly one
/// [`ScopeInstance::release`] call. [`run_in_scope`](Self::run_in_scope)
/// borrows a claim without retiring it;
/// [`run_in_new_scope`](Self::run_in_new_scope) owns the creation claim
/// and retires it itself.
pub struct RequestScope {
    registry: BindingRegistry,
    providers: Mutex<Arc<ProviderSet>>,
}

impl RequestScope {
    /// Creates a manager with its own binding registry.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(BindingRegistry::new())
    }

    /// Creates a manager over an explicit binding registry.
    ///
    /// Sharing one registry between two managers makes their bindings
    /// visible to each other; the usual arrangement is one registry per
    /// manager, which [`new`](Self::new) provides.
    #[must_use]
    pub fn with_registry(registry: BindingRegistry) -> Self {
        Self {
            registry,
            providers: Mutex::new(Arc::new(ProviderSet::default())),
        }
    }

    /// Binds a lazy computation for `key`.
    ///
    /// Instances created from now on compute the value on first
    /// [`get`](ScopeInstance::get) and memoize it. Instances created
    /// earlier keep the provider set they were created with.
    pub fn bind_provider<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        produce: impl Fn() -> T + Send + Sync + 'static,
    ) {
        self.bind_try_provider(key, move || Ok(produce()));
    }

    /// Binds a fallible lazy computation for `key`.
    ///
    /// A computation failure reaches the caller of `get` as
    /// [`ScopeError::Provider`](crate::ScopeError::Provider); nothing is
    /// cached.
    pub fn bind_try_provider<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        produce: impl Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    ) {
        self.install_provider(key, produce, None);
    }

    /// Binds a lazy computation whose values carry a release hook.
    ///
    /// The hook runs once per computed value, when the value leaves the
    /// store (overwrite, removal, or scope destruction).
    pub fn bind_disposable_provider<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        produce: impl Fn() -> T + Send + Sync + 'static,
        dispose: impl Fn(Arc<T>) + Send + Sync + 'static,
    ) {
        self.install_provider(key, move || Ok(produce()), Some(Arc::new(dispose)));
    }

    fn install_provider<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        produce: impl Fn() -> Result<T, BoxError> + Send + Sync + 'static,
        dispose: Option<Arc<dyn Fn(Arc<T>) + Send + Sync>>,
    ) {
        let mut providers = self.providers.lock();
        if providers.contains(key.id()) {
            debug!(key = key.name(), "provider rebound");
        }
        *providers = Arc::new(providers.with_provider(key, produce, dispose));
    }

    /// Creates a fresh scope instance: one claim, unbound, empty store.
    ///
    /// The calling thread's binding is untouched. Never fails.
    #[must_use]
    pub fn create_context(&self) -> ScopeInstance {
        let providers = Arc::clone(&self.providers.lock());
        ScopeInstance::new(providers)
    }

    /// Detaches the instance bound to the calling thread, minting one new
    /// claim on it for the caller.
    ///
    /// Returns `None` — with no state touched — when nothing is bound
    /// here. On success the caller owes exactly one
    /// [`release`](ScopeInstance::release) for the returned instance, or
    /// one resume via [`run_in_scope`](Self::run_in_scope) followed by
    /// that release.
    pub fn suspend_current(&self) -> Option<ScopeInstance> {
        let instance = self.registry.take()?;
        instance.suspend();
        debug!(scope = %instance.id(), "scope suspended");
        Some(instance)
    }

    /// Runs `task` with `instance` bound to the calling thread.
    ///
    /// When `task` finishes — normally or by panic — the instance is
    /// unbound, destroyed if no claim remains, and the thread's previous
    /// binding is restored; a panic then propagates. If `task` detached
    /// the instance via [`suspend_current`](Self::suspend_current), the
    /// exit step leaves it alone: the suspender's claim now owns
    /// destruction.
    ///
    /// Passing a previously suspended instance is the *resume*
    /// operation. At most one thread may hold a given instance bound; a
    /// concurrent second resume panics.
    ///
    /// # Panics
    ///
    /// Panics when `instance` cannot be bound: it is bound to another
    /// thread, or already destroyed. Either means a collaborator broke
    /// the claim protocol, which is not a recoverable condition.
    pub fn run_in_scope<T>(&self, instance: ScopeInstance, task: impl FnOnce() -> T) -> T {
        self.enter(instance, false, task)
    }

    /// Creates a fresh instance and runs `task` inside it, retiring the
    /// creation claim on exit.
    ///
    /// If `task` suspends the instance, the suspender's claim survives
    /// the exit and the scope with it.
    pub fn run_in_new_scope<T>(&self, task: impl FnOnce() -> T) -> T {
        let instance = self.create_context();
        self.enter(instance, true, task)
    }

    /// Runs `f` against the instance bound to the calling thread, if any.
    ///
    /// No claim is minted: the handle must not outlive `f`. This is how
    /// injected providers reach the current store.
    pub fn with_current<R>(&self, f: impl FnOnce(&ScopeInstance) -> R) -> Option<R> {
        self.registry.current().as_ref().map(f)
    }

    fn enter<T>(&self, instance: ScopeInstance, owns_claim: bool, task: impl FnOnce() -> T) -> T {
        if let Err(err) = instance.bind() {
            panic!("cannot enter scope: {err}");
        }
        trace!(scope = %instance.id(), "scope bound");

        let guard = ExitGuard {
            registry: &self.registry,
            installed: instance.clone(),
            previous: self.registry.replace(Some(instance)),
            owns_claim,
        };
        let result = task();
        drop(guard);
        result
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Exit bookkeeping for `enter`, run on drop so a panicking task cannot
/// skip it: unbind-and-maybe-destroy, then restore the previous binding.
struct ExitGuard<'a> {
    registry: &'a BindingRegistry,
    installed: ScopeInstance,
    previous: Option<ScopeInstance>,
    owns_claim: bool,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        match self.registry.take() {
            Some(current) if ScopeInstance::same(&current, &self.installed) => {
                current.unbind_for_exit();
                trace!(scope = %current.id(), "scope unbound");
            }
            // The task suspended the instance (slot empty) — the
            // suspender's claim owns destruction now. A foreign binding
            // in the slot cannot happen through this API; put it back.
            Some(foreign) => {
                self.registry.replace(Some(foreign));
            }
            None => {}
        }
        if self.owns_claim {
            // Retiring the creation claim of `run_in_new_scope`. The only
            // possible error is a double release, which the claim
            // protocol rules out for a claim we minted ourselves.
            let _ = self.installed.release();
        }
        if let Some(previous) = self.previous.take() {
            self.registry.replace(Some(previous));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScopeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn create_context_does_not_bind() {
        let scope = RequestScope::new();
        let _instance = scope.create_context();
        assert!(scope.with_current(|_| ()).is_none());
    }

    #[test]
    fn run_in_scope_binds_and_restores() {
        let scope = RequestScope::new();
        let instance = scope.create_context();

        let bound_id = scope.run_in_scope(instance.clone(), || {
            scope.with_current(ScopeInstance::id).expect("bound")
        });
        assert_eq!(bound_id, instance.id());
        assert!(scope.with_current(|_| ()).is_none());

        instance.release().expect("creator claim");
    }

    #[test]
    fn suspend_with_nothing_bound_is_a_noop() {
        let scope = RequestScope::new();
        assert!(scope.suspend_current().is_none());
    }

    #[test]
    fn run_in_new_scope_destroys_on_exit() {
        let scope = RequestScope::new();
        let key: ScopeKey<u32> = ScopeKey::new("k");

        let instance = scope.run_in_new_scope(|| {
            let instance = scope.with_current(Clone::clone).expect("bound");
            instance.put(key, 5).expect("live scope");
            instance
        });
        assert!(instance.is_destroyed());
        assert!(instance.find(key).is_none());
    }

    #[test]
    fn run_in_new_scope_survives_suspend() {
        let scope = RequestScope::new();
        let key: ScopeKey<u32> = ScopeKey::new("k");

        let suspended = scope.run_in_new_scope(|| {
            scope
                .with_current(|inst| inst.put(key, 11))
                .expect("bound")
                .expect("live scope");
            scope.suspend_current().expect("bound")
        });
        // The creation claim was retired on exit; the suspend claim keeps
        // the scope alive.
        assert!(!suspended.is_destroyed());
        assert_eq!(*suspended.get(key).expect("alive"), 11);

        suspended.release().expect("suspend claim");
        assert!(suspended.is_destroyed());
    }

    #[test]
    fn exit_bookkeeping_runs_on_panic() {
        let scope = RequestScope::new();
        let instance = scope.create_context();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope.run_in_scope(instance.clone(), || panic!("handler failure"));
        }));
        assert!(result.is_err());
        // Unbound on the way out; the creator claim still holds it alive.
        assert!(!instance.is_destroyed());
        assert!(scope.with_current(|_| ()).is_none());

        instance.release().expect("creator claim");
        assert!(instance.is_destroyed());
    }

    #[test]
    fn entering_a_destroyed_scope_panics() {
        let scope = RequestScope::new();
        let instance = scope.create_context();
        instance.release().expect("creator claim");

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            scope.run_in_scope(instance, || ());
        }));
        assert!(result.is_err());
    }

    #[test]
    fn provider_snapshot_is_per_instance() {
        let scope = RequestScope::new();
        let key: ScopeKey<&'static str> = ScopeKey::new("greeting");

        let before = scope.create_context();
        scope.bind_provider(key, || "hello");
        let after = scope.create_context();

        assert!(matches!(
            before.get(key),
            Err(ScopeError::UnknownKey { .. })
        ));
        assert_eq!(*after.get(key).expect("bound provider"), "hello");

        before.release().expect("creator claim");
        after.release().expect("creator claim");
    }

    #[test]
    fn disposable_provider_hook_runs_at_destroy() {
        let scope = RequestScope::new();
        let key: ScopeKey<String> = ScopeKey::new("conn");
        let disposed = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&disposed);
        scope.bind_disposable_provider(
            key,
            || "connection".to_string(),
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            },
        );

        scope.run_in_new_scope(|| {
            let value = scope
                .with_current(|inst| inst.get(key))
                .expect("bound")
                .expect("computed");
            assert_eq!(*value, "connection");
        });
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
    }
}
