//! Custom Resource Definitions for the Backstore Operator

mod backup;
mod progress;
mod restore;
mod volume_snapshot;

pub use backup::*;
pub use progress::*;
pub use restore::*;
pub use volume_snapshot::*;
