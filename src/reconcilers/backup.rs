//! Backup reconciler
//!
//! A Backup becomes a VolumeSnapshot of its claim; it is complete once the
//! snapshot reports ready-to-use.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use super::KindPolicy;
use crate::adapters::{CreateOutcome, DependentResourceClient, SnapshotRequest};
use crate::crd::Backup;
use crate::error::{Error, Result};
use crate::queue::ObjectKey;

/// Validate the Backup spec
pub fn validate(backup: &Backup) -> Result<()> {
    if backup.spec.volume_snapshot_name.trim().is_empty() {
        return Err(Error::validation("volume-snapshot-name must be specified"));
    }

    if backup.spec.pvc.trim().is_empty() {
        return Err(Error::validation("pvc must be specified"));
    }

    Ok(())
}

/// Build the snapshot request for a Backup.
///
/// The snapshot lives in `spec.namespace`, or in the Backup's own namespace
/// when that is empty.
pub fn snapshot_request(backup: &Backup) -> Result<SnapshotRequest> {
    validate(backup)?;

    let namespace = match backup.spec.namespace.trim() {
        "" => ObjectKey::from_resource(backup).namespace,
        ns => ns.to_string(),
    };
    let class = backup.spec.volume_snapshot_class_name.trim();

    Ok(SnapshotRequest {
        name: backup.spec.volume_snapshot_name.trim().to_string(),
        namespace,
        source_claim: backup.spec.pvc.trim().to_string(),
        snapshot_class: (!class.is_empty()).then(|| class.to_string()),
    })
}

pub struct BackupPolicy;

#[async_trait]
impl KindPolicy for BackupPolicy {
    type Resource = Backup;

    const KIND: &'static str = "Backup";

    const DEPENDENT_KIND: &'static str = "VolumeSnapshot";

    fn validate(&self, resource: &Backup) -> Result<()> {
        validate(resource)
    }

    async fn submit(
        &self,
        client: &dyn DependentResourceClient,
        resource: &Backup,
    ) -> Result<(ObjectKey, CreateOutcome)> {
        let request = snapshot_request(resource)?;
        debug!(backup = %resource.name_any(), snapshot = %request.key(), "Submitting VolumeSnapshot");
        let outcome = client.create_snapshot(&request).await?;
        Ok((request.key(), outcome))
    }

    async fn is_ready(
        &self,
        client: &dyn DependentResourceClient,
        dependent: &ObjectKey,
    ) -> Result<bool> {
        client.snapshot_ready(dependent).await
    }
}
