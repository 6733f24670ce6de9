//! Typed descriptor keys for the scoped store.

use core::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static KEY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// An opaque, typed identity for a slot in a scoped store.
///
/// Keys are compared by identity: every [`ScopeKey::new`] call mints a
/// distinct key, and only the key that stored (or was bound to provide) a
/// value can read it back. The value type travels in the key's type
/// parameter, so lookups are fully typed without the store knowing what a
/// key "means".
///
/// Keys are `Copy` and are usually minted once and shared:
///
/// ```
/// use reqscope::ScopeKey;
/// use std::sync::LazyLock;
///
/// static USER_NAME: LazyLock<ScopeKey<String>> =
///     LazyLock::new(|| ScopeKey::new("user.name"));
/// ```
pub struct ScopeKey<T> {
    id: u64,
    name: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T> ScopeKey<T> {
    /// Mints a fresh key.
    ///
    /// `name` is diagnostic only: it appears in error messages and log
    /// events but plays no part in identity.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            id: KEY_COUNTER.fetch_add(1, Ordering::Relaxed),
            name,
            _value: PhantomData,
        }
    }

    /// Returns the diagnostic name supplied at creation.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the raw identity (internal use).
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

// Manual impls: the derived versions would bound `T`.
impl<T> Clone for ScopeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ScopeKey<T> {}

impl<T> PartialEq for ScopeKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for ScopeKey<T> {}

impl<T> PartialOrd for ScopeKey<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for ScopeKey<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl<T> Hash for ScopeKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for ScopeKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScopeKey({}:{})", self.name, self.id)
    }
}
