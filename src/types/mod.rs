//! Identifier types for scopes and binding registries.

mod id;

pub use id::{RegistryId, RequestId};
