//! Identifier types for scope entities.
//!
//! These wrap process-wide atomic counters with type safety. Identity is
//! the only property that matters: two ids minted by different calls are
//! never equal, and ids render compactly in log lines and error messages.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);
static REGISTRY_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a scope instance.
///
/// Minted once per [`create_context`](crate::RequestScope::create_context)
/// call and carried by every error and log event that concerns the scope.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    /// Mints a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// A unique identifier for a thread binding registry.
///
/// Each registry keys its own per-thread slot, so independently
/// constructed registries never observe each other's bindings.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryId(u64);

impl RegistryId {
    /// Mints a fresh identifier.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self(REGISTRY_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegistryId({})", self.0)
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}
