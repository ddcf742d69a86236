//! Reconcilers for Backup and Restore
//!
//! The reconciliation engine in [`crate::controllers`] is generic; what
//! differs per kind lives behind [`KindPolicy`]:
//! - Validating the spec
//! - Submitting the dependent object (VolumeSnapshot or PersistentVolumeClaim)
//! - Checking whether that object is ready

pub mod backup;
pub mod poller;
pub mod restore;
pub mod status;

pub use backup::BackupPolicy;
pub use poller::{poll_until_ready, PollResult, PollerRegistry};
pub use restore::RestorePolicy;
pub use status::{StatusUpdater, StatusWrite};

use async_trait::async_trait;

use crate::adapters::{CreateOutcome, DependentResourceClient};
use crate::crd::ProgressResource;
use crate::error::Result;
use crate::queue::ObjectKey;

/// Kind-specific steps of a reconciliation
#[async_trait]
pub trait KindPolicy: Send + Sync + 'static {
    type Resource: ProgressResource;

    /// Kind name used in logs, metrics and errors
    const KIND: &'static str;

    /// Kind of the dependent object, for logs and failure messages
    const DEPENDENT_KIND: &'static str;

    /// Reject specs that can never reconcile successfully
    fn validate(&self, resource: &Self::Resource) -> Result<()>;

    /// Create the dependent object, returning its key and whether it was new
    async fn submit(
        &self,
        client: &dyn DependentResourceClient,
        resource: &Self::Resource,
    ) -> Result<(ObjectKey, CreateOutcome)>;

    /// Readiness predicate of the dependent object
    async fn is_ready(&self, client: &dyn DependentResourceClient, dependent: &ObjectKey)
        -> Result<bool>;
}
