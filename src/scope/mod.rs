//! The scope core: keys, store, instances, thread bindings, and the
//! [`RequestScope`] facade.
//!
//! # Ownership Protocol
//!
//! A scope instance tracks outstanding *claims* with an explicit counter
//! rather than relying on `Drop`, because destruction timing is a
//! protocol, not scope exit: the store is cleared on the release that
//! brings the claim count to zero *while no thread has the instance
//! bound*. A release that lands while the instance is still executing on
//! some thread defers destruction to the moment that thread unbinds.
//!
//! Claims are minted twice: once at [`RequestScope::create_context`] (the
//! creator's claim) and once per successful
//! [`RequestScope::suspend_current`] (the suspender's claim). Every claim
//! must be retired by exactly one [`ScopeInstance::release`] call.
//! Cloning a [`ScopeInstance`] handle does *not* mint a claim — handles
//! are cheap aliases, claims are accountable.
//!
//! # Binding
//!
//! "Current scope" is discovered through a [`BindingRegistry`]: a
//! per-thread slot holding at most one bound instance per registry. The
//! registry is an explicit value owned by the [`RequestScope`] that uses
//! it, so independent managers (say, two tests) never observe each
//! other's bindings.

mod binding;
mod instance;
mod key;
mod manager;
mod store;

pub use binding::BindingRegistry;
pub use instance::ScopeInstance;
pub use key::ScopeKey;
pub use manager::RequestScope;

pub(crate) use store::ProviderSet;
