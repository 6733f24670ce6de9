//! The scoped store: an ordered key → value map with memoization and
//! per-entry release hooks.
//!
//! The store itself is plain data; all locking lives in the owning
//! [`ScopeInstance`](crate::ScopeInstance), which guards the store and
//! the instance lifecycle with one mutex so that "destroy clears the map"
//! is atomic to concurrent readers.

use core::fmt;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::BoxError;
use crate::scope::ScopeKey;

/// Type-erased stored value.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// One-shot hook invoked when an entry leaves the store.
type DisposeFn = Box<dyn FnOnce(AnyValue) + Send>;

/// Reusable hook shared by every value a provider computes.
type SharedDisposeFn = Arc<dyn Fn(AnyValue) + Send + Sync>;

/// Lazy computation bound for a key.
type ProduceFn = Arc<dyn Fn() -> Result<AnyValue, BoxError> + Send + Sync>;

/// A single memoized entry.
pub(crate) struct Entry {
    name: &'static str,
    value: AnyValue,
    dispose: Option<DisposeFn>,
}

impl Entry {
    /// Runs the entry's release hook, if any, consuming the entry.
    pub(crate) fn dispose(self) {
        if let Some(hook) = self.dispose {
            hook(self.value);
        }
    }

    #[allow(dead_code)]
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("dispose", &self.dispose.is_some())
            .finish_non_exhaustive()
    }
}

/// Ordered mapping from descriptor key to memoized value.
///
/// Lookups are key-unique; iteration (and therefore release-hook order on
/// destroy) follows ascending key identity, which is deterministic.
#[derive(Debug, Default)]
pub(crate) struct ScopeStore {
    entries: BTreeMap<u64, Entry>,
}

impl ScopeStore {
    /// Inserts or overwrites the entry for `key`, returning the previous
    /// entry so the caller can run its release hook outside any lock.
    pub(crate) fn insert<T: Send + Sync + 'static>(
        &mut self,
        key: ScopeKey<T>,
        value: AnyValue,
        dispose: Option<DisposeFn>,
    ) -> Option<Entry> {
        self.entries.insert(
            key.id(),
            Entry {
                name: key.name(),
                value,
                dispose,
            },
        )
    }

    /// Returns the memoized value for `key`, if present.
    pub(crate) fn get(&self, id: u64) -> Option<AnyValue> {
        self.entries.get(&id).map(|entry| Arc::clone(&entry.value))
    }

    /// Removes the entry for `key`, returning it for hook disposal.
    pub(crate) fn remove(&mut self, id: u64) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Drains every entry in ascending key order.
    pub(crate) fn drain(&mut self) -> Vec<Entry> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    /// Number of memoized entries.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A lazy computation registered for a key, plus its optional release
/// hook.
#[derive(Clone)]
pub(crate) struct ScopedProvider {
    name: &'static str,
    produce: ProduceFn,
    dispose: Option<SharedDisposeFn>,
}

impl ScopedProvider {
    /// Runs the computation.
    pub(crate) fn produce(&self) -> Result<AnyValue, BoxError> {
        (self.produce)()
    }

    /// Returns a one-shot hook wrapping the provider's shared hook.
    pub(crate) fn dispose_hook(&self) -> Option<DisposeFn> {
        self.dispose.clone().map(|hook| -> DisposeFn {
            Box::new(move |value| hook(value))
        })
    }

    #[allow(dead_code)]
    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ScopedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedProvider")
            .field("name", &self.name)
            .field("dispose", &self.dispose.is_some())
            .finish_non_exhaustive()
    }
}

/// The set of providers visible to a scope instance.
///
/// Instances snapshot the set at creation (`Arc` clone); registering a
/// provider afterwards builds a new set, so in-flight requests never see
/// a provider appear or vanish mid-request.
#[derive(Debug, Default)]
pub(crate) struct ProviderSet {
    providers: BTreeMap<u64, ScopedProvider>,
}

impl ProviderSet {
    /// Returns a copy of this set with `key` bound to the given
    /// computation and optional release hook.
    pub(crate) fn with_provider<T: Send + Sync + 'static>(
        &self,
        key: ScopeKey<T>,
        produce: impl Fn() -> Result<T, BoxError> + Send + Sync + 'static,
        dispose: Option<Arc<dyn Fn(Arc<T>) + Send + Sync>>,
    ) -> Self {
        let produce: ProduceFn = Arc::new(move || produce().map(|value| Arc::new(value) as AnyValue));
        let dispose: Option<SharedDisposeFn> = dispose.map(|hook| -> SharedDisposeFn {
            Arc::new(move |value: AnyValue| {
                if let Ok(typed) = value.downcast::<T>() {
                    hook(typed);
                }
            })
        });

        let mut providers = self.providers.clone();
        providers.insert(
            key.id(),
            ScopedProvider {
                name: key.name(),
                produce,
                dispose,
            },
        );
        Self { providers }
    }

    /// Returns the provider bound for `key`, if any.
    pub(crate) fn lookup(&self, id: u64) -> Option<&ScopedProvider> {
        self.providers.get(&id)
    }

    /// Returns `true` when `key` already has a provider bound.
    pub(crate) fn contains(&self, id: u64) -> bool {
        self.providers.contains_key(&id)
    }
}
