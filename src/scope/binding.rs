//! Per-thread binding slots: how "current scope" is discovered without
//! parameter passing.

use core::fmt;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::scope::ScopeInstance;
use crate::types::RegistryId;

thread_local! {
    /// One slot per registry on each thread, keyed by registry identity.
    /// Distinct threads never contend (the map is thread-local) and
    /// distinct registries never alias (the key is unique per registry).
    static SLOTS: RefCell<HashMap<RegistryId, ScopeInstance>> =
        RefCell::new(HashMap::new());
}

/// A thread binding registry: at most one bound instance per thread.
///
/// The registry is an explicit value rather than a hidden global so
/// independently constructed managers — two tests, say — never observe
/// each other's bindings. Cloning a registry yields a handle to the
/// *same* per-thread slots.
#[derive(Clone)]
pub struct BindingRegistry {
    id: RegistryId,
}

impl BindingRegistry {
    /// Creates a registry with fresh, empty per-thread slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: RegistryId::new(),
        }
    }

    /// Replaces the calling thread's slot content, returning the previous
    /// binding.
    pub(crate) fn replace(&self, binding: Option<ScopeInstance>) -> Option<ScopeInstance> {
        SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            match binding {
                Some(instance) => slots.insert(self.id, instance),
                None => slots.remove(&self.id),
            }
        })
    }

    /// Takes the calling thread's binding, leaving the slot empty.
    pub(crate) fn take(&self) -> Option<ScopeInstance> {
        self.replace(None)
    }

    /// Returns a handle to the calling thread's binding without touching
    /// the slot.
    pub(crate) fn current(&self) -> Option<ScopeInstance> {
        SLOTS.with(|slots| slots.borrow().get(&self.id).cloned())
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BindingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRegistry")
            .field("id", &self.id)
            .field("bound_here", &self.current().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::ProviderSet;
    use std::sync::Arc;

    fn instance() -> ScopeInstance {
        ScopeInstance::new(Arc::new(ProviderSet::default()))
    }

    #[test]
    fn registries_do_not_alias() {
        let a = BindingRegistry::new();
        let b = BindingRegistry::new();

        let inst = instance();
        assert!(a.replace(Some(inst.clone())).is_none());
        assert!(b.current().is_none(), "b must not see a's binding");
        assert!(a.current().is_some());

        a.take();
        assert!(a.current().is_none());
    }

    #[test]
    fn clones_share_slots() {
        let a = BindingRegistry::new();
        let b = a.clone();

        a.replace(Some(instance()));
        assert!(b.current().is_some());
        b.take();
        assert!(a.current().is_none());
    }

    #[test]
    fn bindings_are_per_thread() {
        let registry = BindingRegistry::new();
        registry.replace(Some(instance()));

        let seen = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.current().is_some())
                .join()
                .expect("thread runs")
        };
        assert!(!seen, "another thread must not see this thread's binding");

        registry.take();
    }
}
