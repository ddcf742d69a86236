//! Adapters between the reconciliation engine and the Kubernetes API

mod dependents;
mod quantity;
mod store;

pub use dependents::*;
pub use quantity::*;
pub use store::*;
