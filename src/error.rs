//! Error types for scope usage and lazy value computation.
//!
//! Scope errors split into two families:
//!
//! - **Usage errors** (releasing past zero, touching a released scope,
//!   binding a scope that is bound elsewhere): a bug in a collaborator.
//!   They are reported loudly and leave the scope state untouched — in
//!   particular the store is never cleared twice.
//! - **Provider failures**: a lazy computation failed. The failure reaches
//!   the caller of `get`; nothing is cached and the scope stays alive.

use std::thread::ThreadId;

use thiserror::Error;

use crate::types::RequestId;

/// Boxed error type carried by failed lazy computations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by scope operations.
#[derive(Debug, Error)]
pub enum ScopeError {
    /// The scope has already been released and its store cleared.
    #[error("scope {id} has been released")]
    Released {
        /// The scope the operation was attempted on.
        id: RequestId,
    },

    /// `release` was called without a matching outstanding claim.
    #[error("scope {id}: release without a matching claim")]
    ReleaseUnderflow {
        /// The scope the release was attempted on.
        id: RequestId,
    },

    /// The scope is currently bound to another thread.
    #[error("scope {id} is already bound to {thread:?}")]
    AlreadyBound {
        /// The scope the binding was attempted on.
        id: RequestId,
        /// The thread currently holding the binding.
        thread: ThreadId,
    },

    /// No stored value and no provider exist for the requested key.
    #[error("scope {id}: no value or provider for key `{name}`")]
    UnknownKey {
        /// The scope the lookup ran against.
        id: RequestId,
        /// Diagnostic name of the key.
        name: &'static str,
    },

    /// A provider's lazy computation failed.
    #[error("provider for key `{name}` failed: {source}")]
    Provider {
        /// Diagnostic name of the key whose provider failed.
        name: &'static str,
        /// The underlying failure.
        #[source]
        source: BoxError,
    },
}

impl ScopeError {
    /// Returns `true` if the error reports a collaborator bug rather than
    /// a failed computation.
    #[must_use]
    pub fn is_usage_error(&self) -> bool {
        !matches!(self, Self::Provider { .. })
    }
}
