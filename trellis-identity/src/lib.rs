//! Trellis Identity - Canonical Resource Keys
//!
//! Maps every resource reference (`{type, id}`, `{type, lid}`, or both) to a
//! single [`ResourceKey`] object that is reused for the resource's lifetime in
//! the process. Other components key their maps off this object's identity.

mod key;
mod registry;

pub use key::ResourceKey;
pub use registry::{IdAssignment, IdentityRegistry, Preflight, Resolution};
