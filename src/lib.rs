//! Reqscope: reference-counted, thread-bindable request scopes.
//!
//! # Overview
//!
//! Request handling needs a container for request-lifetime values that
//! survives the request being suspended on one thread and resumed on
//! another. Reqscope provides that container as an explicit ownership
//! protocol: a scope is created with one claim, bound to at most one
//! thread at a time, handed across threads by suspending it (which mints
//! a new claim), and destroyed exactly once — on the release that brings
//! the claim count to zero while no thread has the scope bound.
//!
//! # Core Guarantees
//!
//! - **At-most-once destruction**: the scoped store is cleared exactly once,
//!   no matter how many components hold claims
//! - **Deferred destruction while bound**: a scope that reaches zero claims
//!   mid-request stays readable until the executing thread unbinds it
//! - **Single-owner binding**: a scope is current on at most one thread at
//!   any instant; rebinding a bound scope fails loudly
//! - **Hand-off visibility**: values stored before a suspend are visible
//!   after the resume, on whichever thread the continuation runs
//! - **Fail-fast usage errors**: over-release and use-after-destroy are
//!   diagnosed, never silently corrupted
//!
//! # Module Structure
//!
//! - [`scope`]: the scope core — keys, store, instance, binding registry,
//!   and the [`RequestScope`] facade
//! - [`executor`]: named worker pools for resuming suspended scopes
//! - [`types`]: identifier types
//! - [`error`]: error types
//!
//! # Example
//!
//! ```
//! use reqscope::{RequestScope, ScopeKey};
//!
//! let scope = RequestScope::new();
//! let key: ScopeKey<String> = ScopeKey::new("user.name");
//!
//! let instance = scope.create_context();
//! instance.put(key, "ada".to_string()).unwrap();
//!
//! let suspended = scope.run_in_scope(instance.clone(), || {
//!     // Handler decides to defer its response.
//!     scope.suspend_current().expect("scope is bound")
//! });
//!
//! // ... later, typically on another thread:
//! scope.run_in_scope(suspended.clone(), || {
//!     assert_eq!(*suspended.get(key).unwrap(), "ada");
//! });
//!
//! suspended.release().unwrap(); // claim minted by suspend_current
//! instance.release().unwrap(); // claim minted by create_context
//! assert!(instance.find(key).is_none());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod executor;
pub mod scope;
pub mod tracing_compat;
pub mod types;

// Re-exports for convenient access to the core surface
pub use error::ScopeError;
pub use executor::{ContinuationPool, ExecutorRegistry, PoolHandle, PoolOptions, SpawnHandle};
pub use scope::{BindingRegistry, RequestScope, ScopeInstance, ScopeKey};
pub use types::RequestId;
